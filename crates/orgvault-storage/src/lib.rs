//! Storage backend abstraction for `OrgVault`.
//!
//! This crate defines the [`StorageBackend`] trait, a plain key-value
//! interface that knows nothing about OUs, divisions, users, or credentials.
//! The document collections in `orgvault-core` serialize entities to JSON and
//! lay them out under `/`-separated keys on top of it.
//!
//! Two implementations are provided:
//!
//! - [`RedbBackend`]: persistent, pure Rust, backed by redb (feature `redb-backend`)
//! - [`MemoryBackend`]: in-memory, for tests and development

mod error;
mod memory;
#[cfg(feature = "redb-backend")]
mod redb_backend;

pub use error::StorageError;
pub use memory::MemoryBackend;
#[cfg(feature = "redb-backend")]
pub use redb_backend::RedbBackend;

/// Ordered key-value store shared by every `OrgVault` collection.
///
/// Keys are `/`-separated UTF-8 paths such as `users/<id>` or
/// `rel/division-credentials/<division>/<credential>`. Values are raw bytes;
/// the document layer in `orgvault-core` decides what they contain.
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Read the value under `key`, or `None` when it is absent.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] on backend failure.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Write `value` under `key`, replacing whatever was there.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] on backend failure.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Write `value` under `key` unless the key is taken.
    ///
    /// `Ok(false)` means another writer got there first. Check and write are
    /// one atomic step, so of two racing claims exactly one sees `true`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] or [`StorageError::Transaction`] on backend failure.
    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, StorageError>;

    /// Replace the value under `key` only if it still equals `expected`.
    ///
    /// Returns `Ok(false)`, leaving the stored value alone, when the key is
    /// absent or holds something else. Comparison and write are atomic, which
    /// makes this the primitive for optimistic read-modify-write updates.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] or [`StorageError::Transaction`] on backend failure.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        value: &[u8],
    ) -> Result<bool, StorageError>;

    /// Remove `key`. Removing an absent key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] on backend failure.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Every key beginning with `prefix`, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] on backend failure.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Whether `key` is present. Defaults to a full [`get`](StorageBackend::get).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] on backend failure.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}
