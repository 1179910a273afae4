//! Pure-Rust redb storage backend.
//!
//! [`StorageBackend::put_if_absent`] runs its check and insert inside one
//! redb write transaction. Feature-gated behind `redb-backend`.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadOnlyTable, ReadableTable, Table, TableDefinition};

use crate::{StorageBackend, StorageError};

/// The single table holding every document, index entry and relation key.
const DATA_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orgvault");

type WriteTable<'txn> = Table<'txn, &'static str, &'static [u8]>;
type ReadTable = ReadOnlyTable<&'static str, &'static [u8]>;

/// A storage backend backed by a redb database file.
///
/// Blocking redb calls are offloaded to the Tokio blocking thread pool.
///
/// # Examples
///
/// ```no_run
/// # use orgvault_storage::RedbBackend;
/// let backend = RedbBackend::open("/var/lib/orgvault/orgvault.redb").unwrap();
/// ```
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
    path: PathBuf,
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn txn_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::Transaction {
        reason: e.to_string(),
    }
}

impl RedbBackend {
    /// Open the database file at `path`, creating it and its parent directory if needed.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the file cannot be created or
    /// opened, or [`StorageError::Transaction`] if the data table cannot be
    /// initialized.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Open {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        }

        let db = Database::create(path).map_err(|e| StorageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        // Opening the table in a write transaction creates it.
        write_txn(&db, |_| Ok(()))?;

        tracing::debug!(path = %path.display(), "redb storage opened");

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    /// Location of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn blocking<T, F>(&self, key: &str, op: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || op(&db))
            .await
            .map_err(|e| StorageError::Task {
                key: key.to_owned(),
                reason: e.to_string(),
            })?
    }
}

fn write_txn<T>(
    db: &Database,
    op: impl FnOnce(&mut WriteTable<'_>) -> Result<T, StorageError>,
) -> Result<T, StorageError> {
    let txn = db.begin_write().map_err(txn_err)?;
    let out = {
        let mut table = txn.open_table(DATA_TABLE).map_err(txn_err)?;
        op(&mut table)?
    };
    txn.commit().map_err(txn_err)?;
    Ok(out)
}

fn read_txn<T>(
    db: &Database,
    op: impl FnOnce(&ReadTable) -> Result<T, StorageError>,
) -> Result<T, StorageError> {
    let txn = db.begin_read().map_err(txn_err)?;
    let table = txn.open_table(DATA_TABLE).map_err(txn_err)?;
    op(&table)
}

#[async_trait::async_trait]
impl StorageBackend for RedbBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let owned = key.to_owned();
        self.blocking(key, move |db| {
            read_txn(db, |table| {
                let value = table
                    .get(owned.as_str())
                    .map_err(|e| StorageError::Read {
                        key: owned.clone(),
                        reason: e.to_string(),
                    })?
                    .map(|v| v.value().to_vec());
                Ok(value)
            })
        })
        .await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let owned = key.to_owned();
        let value = value.to_vec();
        self.blocking(key, move |db| {
            write_txn(db, |table| {
                table
                    .insert(owned.as_str(), value.as_slice())
                    .map_err(|e| StorageError::Write {
                        key: owned.clone(),
                        reason: e.to_string(),
                    })?;
                Ok(())
            })
        })
        .await
    }

    async fn put_if_absent(&self, key: &str, value: &[u8]) -> Result<bool, StorageError> {
        let owned = key.to_owned();
        let value = value.to_vec();
        self.blocking(key, move |db| {
            write_txn(db, |table| {
                let present = table
                    .get(owned.as_str())
                    .map_err(|e| StorageError::Read {
                        key: owned.clone(),
                        reason: e.to_string(),
                    })?
                    .is_some();
                if present {
                    return Ok(false);
                }
                table
                    .insert(owned.as_str(), value.as_slice())
                    .map_err(|e| StorageError::Write {
                        key: owned.clone(),
                        reason: e.to_string(),
                    })?;
                Ok(true)
            })
        })
        .await
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected: &[u8],
        value: &[u8],
    ) -> Result<bool, StorageError> {
        let owned = key.to_owned();
        let expected = expected.to_vec();
        let value = value.to_vec();
        self.blocking(key, move |db| {
            write_txn(db, |table| {
                let matches = table
                    .get(owned.as_str())
                    .map_err(|e| StorageError::Read {
                        key: owned.clone(),
                        reason: e.to_string(),
                    })?
                    .is_some_and(|current| current.value() == expected.as_slice());
                if !matches {
                    return Ok(false);
                }
                table
                    .insert(owned.as_str(), value.as_slice())
                    .map_err(|e| StorageError::Write {
                        key: owned.clone(),
                        reason: e.to_string(),
                    })?;
                Ok(true)
            })
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let owned = key.to_owned();
        self.blocking(key, move |db| {
            write_txn(db, |table| {
                table
                    .remove(owned.as_str())
                    .map_err(|e| StorageError::Delete {
                        key: owned.clone(),
                        reason: e.to_string(),
                    })?;
                Ok(())
            })
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let owned = prefix.to_owned();
        self.blocking(prefix, move |db| {
            read_txn(db, |table| {
                let list_err = |e: redb::StorageError| StorageError::List {
                    prefix: owned.clone(),
                    reason: e.to_string(),
                };
                let mut keys = Vec::new();
                for item in table.range(owned.as_str()..).map_err(list_err)? {
                    let (k, _) = item.map_err(list_err)?;
                    let key = k.value();
                    if !key.starts_with(owned.as_str()) {
                        break;
                    }
                    keys.push(key.to_owned());
                }
                Ok(keys)
            })
        })
        .await
    }
}
