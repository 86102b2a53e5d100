//! Shakehand Store - shared key-value collaborator
//!
//! Servers publish their certificate under their address; clients read it
//! back. Two backends:
//! - `MemoryStore` for a single process
//! - `DirStore` for processes sharing a directory

mod dir;
mod memory;

pub use dir::DirStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Key not found: {0}")]
    NotFound(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Byte-valued key-value store
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Value for `key`, or `StoreError::NotFound`
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError>;

    /// Insert or overwrite
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove `key`; removing an absent key is not an error
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
}

pub type SharedKvStore = Arc<dyn KvStore>;
