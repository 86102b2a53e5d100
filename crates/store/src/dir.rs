//! Directory-backed store: one file per key

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

use crate::{KvStore, StoreError};

/// Longest hex-encoded key used verbatim as a file name
const MAX_HEX_NAME: usize = 128;

/// Keys become hex-encoded file names, so any key is a valid path component.
/// Keys too long for that are named by their SHA-256 instead.
#[derive(Debug)]
pub struct DirStore {
    root: PathBuf,
    tmp_counter: AtomicU64,
}

impl DirStore {
    /// Open or create a store rooted at `root`
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;

        debug!("Opened directory store at {}", root.display());

        Ok(Self {
            root,
            tmp_counter: AtomicU64::new(0),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.entry", entry_name(key)))
    }
}

fn entry_name(key: &str) -> String {
    let encoded = hex::encode(key.as_bytes());
    if encoded.len() <= MAX_HEX_NAME {
        encoded
    } else {
        format!("sha256-{}", hex::encode(Sha256::digest(key.as_bytes())))
    }
}

#[async_trait]
impl KvStore for DirStore {
    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        match tokio::fs::read(self.entry_path(key)).await {
            Ok(value) => Ok(value),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        let path = self.entry_path(key);

        // Readers in other processes never see a partial value
        let n = self.tmp_counter.fetch_add(1, Ordering::Relaxed);
        let tmp = self
            .root
            .join(format!(".{}.{}.{}.tmp", entry_name(key), std::process::id(), n));

        tokio::fs::write(&tmp, value).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::open(dir.path()).await.unwrap();

        store.put("[::1]:8080", b"pem").await.unwrap();
        assert_eq!(store.get("[::1]:8080").await.unwrap(), b"pem");

        store.delete("[::1]:8080").await.unwrap();
        assert!(matches!(
            store.get("[::1]:8080").await,
            Err(StoreError::NotFound(_))
        ));

        store.delete("[::1]:8080").await.unwrap();
    }

    #[tokio::test]
    async fn test_visible_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let writer = DirStore::open(dir.path()).await.unwrap();
        let reader = DirStore::open(dir.path()).await.unwrap();

        writer.put("10.0.0.1:443", b"first").await.unwrap();
        writer.put("10.0.0.1:443", b"second").await.unwrap();

        assert_eq!(reader.get("10.0.0.1:443").await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_long_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirStore::open(dir.path()).await.unwrap();

        let long = "k".repeat(300);
        let longer = "k".repeat(301);
        store.put(&long, b"a").await.unwrap();
        store.put(&longer, b"b").await.unwrap();

        assert_eq!(store.get(&long).await.unwrap(), b"a");
        assert_eq!(store.get(&longer).await.unwrap(), b"b");

        store.delete(&long).await.unwrap();
        assert!(matches!(store.get(&long).await, Err(StoreError::NotFound(_))));
        assert_eq!(store.get(&longer).await.unwrap(), b"b");
    }

    #[test]
    fn test_entry_names_fit_a_path_component() {
        assert_eq!(entry_name("ab"), "6162");
        assert_eq!(entry_name(&"k".repeat(64)).len(), 128);

        let hashed = entry_name(&"k".repeat(65));
        assert!(hashed.starts_with("sha256-"));
        assert_eq!(hashed.len(), 7 + 64);
        assert_ne!(hashed, entry_name(&"k".repeat(66)));
    }

    #[tokio::test]
    async fn test_open_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");

        let store = DirStore::open(&nested).await.unwrap();
        assert!(store.root().is_dir());
    }
}
