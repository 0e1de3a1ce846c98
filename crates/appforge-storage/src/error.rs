//! Storage error types.

/// A backend failure. Each variant names the key or prefix involved.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("cannot open storage file '{path}': {reason}")]
    Open { path: String, reason: String },

    #[error("read of '{key}' failed: {reason}")]
    Read { key: String, reason: String },

    #[error("write of '{key}' failed: {reason}")]
    Write { key: String, reason: String },

    #[error("delete of '{key}' failed: {reason}")]
    Delete { key: String, reason: String },

    #[error("listing '{prefix}*' failed: {reason}")]
    List { prefix: String, reason: String },

    /// Begin, commit, or the blocking task running them failed.
    #[error("storage transaction failed: {reason}")]
    Transaction { reason: String },
}
