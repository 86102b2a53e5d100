//! In-process store

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::{KvStore, StoreError};

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        self.entries
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(key.to_string()))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.entries.write().insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().remove(key);
        Ok(())
    }
}
