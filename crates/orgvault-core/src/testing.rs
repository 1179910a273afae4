//! Storage double for unit tests: a [`MemoryBackend`] that can be told to
//! fail by key prefix or to let another writer land mid-update.

use std::sync::{Mutex, PoisonError};

use orgvault_storage::{MemoryBackend, StorageBackend, StorageError};

#[derive(Debug, Default)]
pub(crate) struct FaultyBackend {
    inner: MemoryBackend,
    failing_reads: Mutex<Option<String>>,
    failing_writes: Mutex<Option<String>>,
    interleaved: Mutex<Option<(String, Vec<u8>)>>,
}

impl FaultyBackend {
    /// Fail `get` and `list` for keys under `prefix`; `None` heals.
    pub(crate) fn fail_reads_under(&self, prefix: Option<&str>) {
        *self.failing_reads.lock().unwrap_or_else(PoisonError::into_inner) =
            prefix.map(str::to_owned);
    }

    /// Fail every write for keys under `prefix`; `None` heals.
    pub(crate) fn fail_writes_under(&self, prefix: Option<&str>) {
        *self.failing_writes.lock().unwrap_or_else(PoisonError::into_inner) =
            prefix.map(str::to_owned);
    }

    /// Write `value` to `key` just before the next compare-and-swap on it,
    /// as if a concurrent writer got there between read and write.
    pub(crate) fn interleave_before_swap(&self, key: &str, value: Vec<u8>) {
        *self.interleaved.lock().unwrap_or_else(PoisonError::into_inner) =
            Some((key.to_owned(), value));
    }

    fn read_fails(&self, key: &str) -> Result<(), StorageError> {
        Self::check(&self.failing_reads, key, |key| StorageError::Read {
            key,
            reason: "injected read failure".to_owned(),
        })
    }

    fn write_fails(&self, key: &str) -> Result<(), StorageError> {
        Self::check(&self.failing_writes, key, |key| StorageError::Write {
            key,
            reason: "injected write failure".to_owned(),
        })
    }

    fn check(
        slot: &Mutex<Option<String>>,
        key: &str,
        err: impl FnOnce(String) -> StorageError,
    ) -> Result<(), StorageError> {
        let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_deref() {
            Some(prefix) if key.starts_with(prefix) => Err(err(key.to_owned())),
            _ => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl StorageBackend for FaultyBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        self.read_fails(key)?;
        self.inner.get(key).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.write_fails(key)?;
        self.inner.put(key, value).await
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, StorageError> {
        self.write_fails(key)?;
        self.inner.put_if_absent(key, value).await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        value: &[u8],
    ) -> Result<bool, StorageError> {
        self.write_fails(key)?;
        let pending = {
            let mut slot = self.interleaved.lock().unwrap_or_else(PoisonError::into_inner);
            match slot.as_ref() {
                Some((target, _)) if target == key => slot.take(),
                _ => None,
            }
        };
        if let Some((target, other)) = pending {
            self.inner.put(&target, &other).await?;
        }
        self.inner.compare_and_swap(key, expected, value).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.write_fails(key)?;
        self.inner.delete(key).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        self.read_fails(prefix)?;
        self.inner.list(prefix).await
    }
}
