//! In-memory storage backend.
//!
//! Data lives in a `BTreeMap` behind a `RwLock` and is gone when the process
//! exits. The server uses it when `APPFORGE_STORAGE=memory`; the core test
//! suites use it everywhere.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::{StorageBackend, StorageError};

/// An in-memory backend. Clones share the same underlying map.
///
/// # Examples
///
/// ```
/// # use appforge_storage::{MemoryBackend, StorageBackend};
/// # #[tokio::main]
/// # async fn main() -> Result<(), appforge_storage::StorageError> {
/// let backend = MemoryBackend::new();
/// backend.put("apps/demo", b"{}").await?;
/// assert_eq!(backend.list("apps/").await?, vec!["apps/demo"]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<RwLock<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    /// Whether the backend holds no keys at all.
    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.entries
            .write()
            .await
            .insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let entries = self.entries.read().await;
        // BTreeMap ordering makes the prefix a contiguous range.
        Ok(entries
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.read().await.contains_key(key))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_key_reads_as_none() {
        let backend = MemoryBackend::new();
        assert_eq!(backend.get("apps/nope").await.unwrap(), None);
        assert!(!backend.exists("apps/nope").await.unwrap());
    }

    #[tokio::test]
    async fn put_overwrites_previous_document() {
        let backend = MemoryBackend::new();
        backend.put("apps/demo", b"v1").await.unwrap();
        backend.put("apps/demo", b"v2").await.unwrap();
        assert_eq!(backend.get("apps/demo").await.unwrap(), Some(b"v2".to_vec()));
        assert_eq!(backend.len().await, 1);
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let backend = MemoryBackend::new();
        backend.put("apps/demo", b"{}").await.unwrap();
        backend.delete("apps/demo").await.unwrap();
        backend.delete("apps/demo").await.unwrap();
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn list_only_returns_prefixed_keys() {
        let backend = MemoryBackend::new();
        backend.put("apps/a", b"1").await.unwrap();
        backend.put("apps/b", b"2").await.unwrap();
        backend.put("artifacts/pending/s1/x", b"3").await.unwrap();
        backend.put("templates/chat", b"4").await.unwrap();

        assert_eq!(backend.list("apps/").await.unwrap(), vec!["apps/a", "apps/b"]);
        assert_eq!(
            backend.list("artifacts/pending/s1/").await.unwrap(),
            vec!["artifacts/pending/s1/x"]
        );
        assert!(backend.list("views/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clones_share_entries() {
        let backend = MemoryBackend::new();
        let other = backend.clone();
        backend.put("templates/chat", b"{}").await.unwrap();
        assert!(other.exists("templates/chat").await.unwrap());
    }
}
