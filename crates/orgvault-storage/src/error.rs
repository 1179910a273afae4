//! Storage error types.
//!
//! Each variant names the key or path involved so a failed write can be
//! traced back to the document it was meant for.

/// A key-value operation against a [`StorageBackend`](crate::StorageBackend) failed.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The database file could not be opened or initialized.
    #[error("cannot open store at '{path}': {reason}")]
    Open { path: String, reason: String },

    #[error("read of '{key}' failed: {reason}")]
    Read { key: String, reason: String },

    #[error("write of '{key}' failed: {reason}")]
    Write { key: String, reason: String },

    #[error("delete of '{key}' failed: {reason}")]
    Delete { key: String, reason: String },

    /// A prefix scan failed part way.
    #[error("scan of prefix '{prefix}' failed: {reason}")]
    List { prefix: String, reason: String },

    /// Beginning or committing a backend transaction failed.
    #[error("storage transaction failed: {reason}")]
    Transaction { reason: String },

    /// The blocking task running a backend call was cancelled or panicked.
    #[error("storage task for '{key}' aborted: {reason}")]
    Task { key: String, reason: String },
}
