//! Typed document collections over a [`StorageBackend`].
//!
//! Entities live in flat collections keyed by id (`ous/<id>`,
//! `divisions/<id>`, `users/<id>`, `credentials/<id>`) and are serialized as
//! JSON. Cross references are never stored inside the documents: each
//! relation set is a family of empty marker keys,
//! `rel/<relation>/<owner>/<member>`, so adding a member is a single
//! idempotent `put` and concurrent additions cannot overwrite each other.
//! Uniqueness claims (`index/<name>/<value>`) are taken with
//! [`StorageBackend::put_if_absent`].

use std::collections::BTreeSet;
use std::fmt::Display;
use std::str::FromStr;
use std::sync::Arc;

use orgvault_storage::StorageBackend;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::StoreError;

pub(crate) const OU_PREFIX: &str = "ous/";
pub(crate) const DIVISION_PREFIX: &str = "divisions/";
pub(crate) const USER_PREFIX: &str = "users/";
pub(crate) const CREDENTIAL_PREFIX: &str = "credentials/";

/// Attempts [`Documents::update`] makes before reporting contention.
const MAX_UPDATE_ATTEMPTS: usize = 8;

/// A named uniqueness index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UniqueIndex {
    DivisionName,
    Username,
}

impl UniqueIndex {
    fn prefix(self) -> &'static str {
        match self {
            Self::DivisionName => "index/division-name/",
            Self::Username => "index/username/",
        }
    }

    fn key(self, value: &str) -> String {
        format!("{}{value}", self.prefix())
    }
}

/// A one-to-many relation set kept as marker keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum Relation {
    /// OU → divisions it owns.
    OuDivisions,
    /// Division → credentials it owns.
    DivisionCredentials,
    /// OU → credentials owned by its divisions.
    OuCredentials,
}

impl Relation {
    fn prefix(self, owner: &(dyn Display + Sync)) -> String {
        let name = match self {
            Self::OuDivisions => "ou-divisions",
            Self::DivisionCredentials => "division-credentials",
            Self::OuCredentials => "ou-credentials",
        };
        format!("rel/{name}/{owner}/")
    }
}

/// JSON document access shared by all stores.
#[derive(Clone)]
pub(crate) struct Documents {
    backend: Arc<dyn StorageBackend>,
}

impl Documents {
    pub(crate) fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    pub(crate) async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(bytes) = self.backend.get(key).await? else {
            return Ok(None);
        };
        decode(key, &bytes).map(Some)
    }

    /// Read-modify-write a document without losing concurrent updates.
    ///
    /// `apply` edits the freshly loaded document and the result is written
    /// with [`StorageBackend::compare_and_swap`]. If another writer changed
    /// the document in between, it is reloaded and `apply` runs again, so
    /// `apply` must only depend on the document it is given. Returns
    /// `Ok(None)` if the document does not exist.
    pub(crate) async fn update<T, E, F>(&self, key: &str, mut apply: F) -> Result<Option<T>, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<StoreError>,
        F: FnMut(&mut T) -> Result<(), E> + Send,
    {
        for attempt in 1..=MAX_UPDATE_ATTEMPTS {
            let Some(current) = self.backend.get(key).await.map_err(StoreError::from)? else {
                return Ok(None);
            };
            let mut doc: T = decode(key, &current)?;
            apply(&mut doc)?;
            let next = encode(key, &doc)?;
            if self
                .backend
                .compare_and_swap(key, &current, &next)
                .await
                .map_err(StoreError::from)?
            {
                return Ok(Some(doc));
            }
            debug!(key, attempt, "document changed underneath update, retrying");
        }
        Err(StoreError::Contended {
            key: key.to_owned(),
        }
        .into())
    }

    pub(crate) async fn save<T: Serialize>(&self, key: &str, doc: &T) -> Result<(), StoreError> {
        let bytes = encode(key, doc)?;
        self.backend.put(key, &bytes).await?;
        Ok(())
    }

    /// Write a document only if the key is free. Returns `false` if taken.
    pub(crate) async fn insert_new<T: Serialize>(
        &self,
        key: &str,
        doc: &T,
    ) -> Result<bool, StoreError> {
        let bytes = encode(key, doc)?;
        Ok(self.backend.put_if_absent(key, &bytes).await?)
    }

    /// Load every document under `prefix`, in key order.
    ///
    /// Keys deleted between listing and loading are skipped.
    pub(crate) async fn load_all<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<T>, StoreError> {
        let keys = self.backend.list(prefix).await?;
        let mut docs = Vec::with_capacity(keys.len());
        for key in &keys {
            if let Some(doc) = self.load(key).await? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }

    pub(crate) async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.backend.exists(key).await?)
    }

    /// Claim `value` in a uniqueness index on behalf of `owner`.
    pub(crate) async fn claim(
        &self,
        index: UniqueIndex,
        value: &str,
        owner: &(dyn Display + Sync),
    ) -> Result<bool, StoreError> {
        Ok(self
            .backend
            .put_if_absent(&index.key(value), owner.to_string().as_bytes())
            .await?)
    }

    /// The owner currently holding `value` in a uniqueness index.
    pub(crate) async fn claimant<I: FromStr>(
        &self,
        index: UniqueIndex,
        value: &str,
    ) -> Result<Option<I>, StoreError> {
        let key = index.key(value);
        let Some(bytes) = self.backend.get(&key).await? else {
            return Ok(None);
        };
        let raw = String::from_utf8(bytes).map_err(|e| StoreError::Decode {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        raw.parse().map(Some).map_err(|_| StoreError::Decode {
            key,
            reason: format!("'{raw}' is not a valid identifier"),
        })
    }

    pub(crate) async fn release(&self, index: UniqueIndex, value: &str) -> Result<(), StoreError> {
        Ok(self.backend.delete(&index.key(value)).await?)
    }

    /// Every `(value, owner)` pair claimed in a uniqueness index.
    ///
    /// Claims whose owner does not parse as `I` are returned with `None`.
    pub(crate) async fn claims<I: FromStr>(
        &self,
        index: UniqueIndex,
    ) -> Result<Vec<(String, Option<I>)>, StoreError> {
        let prefix = index.prefix();
        let mut out = Vec::new();
        for key in self.backend.list(prefix).await? {
            let Some(value) = key.strip_prefix(prefix) else {
                continue;
            };
            let owner = self
                .backend
                .get(&key)
                .await?
                .and_then(|bytes| String::from_utf8(bytes).ok())
                .and_then(|raw| raw.parse().ok());
            out.push((value.to_owned(), owner));
        }
        Ok(out)
    }

    /// Add `member` to a relation set. Adding a present member is a no-op.
    pub(crate) async fn link(
        &self,
        relation: Relation,
        owner: &(dyn Display + Sync),
        member: &(dyn Display + Sync),
    ) -> Result<(), StoreError> {
        let key = format!("{}{member}", relation.prefix(owner));
        Ok(self.backend.put(&key, b"").await?)
    }

    pub(crate) async fn unlink(
        &self,
        relation: Relation,
        owner: &(dyn Display + Sync),
        member: &(dyn Display + Sync),
    ) -> Result<(), StoreError> {
        let key = format!("{}{member}", relation.prefix(owner));
        Ok(self.backend.delete(&key).await?)
    }

    /// Members of a relation set. Entries that do not parse as `I` are
    /// skipped; reconciliation never creates them.
    pub(crate) async fn members<I: FromStr + Ord>(
        &self,
        relation: Relation,
        owner: &(dyn Display + Sync),
    ) -> Result<BTreeSet<I>, StoreError> {
        let prefix = relation.prefix(owner);
        let keys = self.backend.list(&prefix).await?;
        Ok(keys
            .iter()
            .filter_map(|k| k.strip_prefix(&prefix))
            .filter_map(|m| m.parse().ok())
            .collect())
    }
}

fn decode<T: DeserializeOwned>(key: &str, bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Decode {
        key: key.to_owned(),
        reason: e.to_string(),
    })
}

fn encode<T: Serialize>(key: &str, doc: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(doc).map_err(|e| StoreError::Encode {
        key: key.to_owned(),
        reason: e.to_string(),
    })
}
