//! Storage backend abstraction for appforge.
//!
//! The [`StorageBackend`] trait is a plain key-value interface. It knows
//! nothing about templates, deployed apps, or configuration trees; the
//! repository in `appforge-core` serialises those to JSON documents and
//! addresses them with `/`-separated keys such as `apps/my-app` or
//! `artifacts/pending/{session}/{id}`.
//!
//! Two implementations are provided:
//!
//! - [`RedbBackend`]: persistent default, backed by redb (feature `redb-backend`)
//! - [`MemoryBackend`]: in-memory, for tests and throwaway dev servers

mod error;
mod memory;
#[cfg(feature = "redb-backend")]
mod redb_backend;

pub use error::StorageError;
pub use memory::MemoryBackend;
#[cfg(feature = "redb-backend")]
pub use redb_backend::RedbBackend;

/// Byte-valued key-value store underneath the appforge repository.
///
/// Keys are `/`-separated paths; values are whatever the caller encoded.
/// Shared between request handlers, so implementations are `Send + Sync`.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// The value under `key`, or `None`.
    ///
    /// # Errors
    ///
    /// [`StorageError::Read`] when the backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Insert or replace the value under `key`.
    ///
    /// # Errors
    ///
    /// [`StorageError::Write`] when the backend fails.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Remove `key`. Absent keys are fine.
    ///
    /// # Errors
    ///
    /// [`StorageError::Delete`] when the backend fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Keys beginning with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// [`StorageError::List`] when the backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// # Errors
    ///
    /// [`StorageError::Read`] when the backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}
