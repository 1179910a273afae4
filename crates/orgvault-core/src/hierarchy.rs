//! Organizational units and divisions.
//!
//! The [`HierarchyStore`] owns both entity kinds and the relation sets that
//! tie them together: OU → divisions, division → credentials and
//! OU → credentials. OUs and divisions are never deleted; only their
//! descriptions change and their relation sets grow.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use orgvault_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::HierarchyError;
use crate::ids::{CredentialId, DivisionId, OuId};
use crate::store::{DIVISION_PREFIX, Documents, OU_PREFIX, Relation, UniqueIndex};

/// An organizational unit with its derived relation sets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrganizationalUnit {
    pub id: OuId,
    pub name: String,
    pub description: String,
    /// Divisions owned by this OU.
    pub divisions: BTreeSet<DivisionId>,
    /// Credentials owned by this OU's divisions.
    pub credentials: BTreeSet<CredentialId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A division with its derived credential set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Division {
    pub id: DivisionId,
    pub name: String,
    pub description: String,
    /// The owning OU.
    pub ou: OuId,
    /// Credentials owned by this division.
    pub credentials: BTreeSet<CredentialId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// Stored shapes. Relation sets are kept outside the documents.

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct OuDocument {
    pub(crate) id: OuId,
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct DivisionDocument {
    pub(crate) id: DivisionId,
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) ou: OuId,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

fn ou_key(id: OuId) -> String {
    format!("{OU_PREFIX}{id}")
}

fn division_key(id: DivisionId) -> String {
    format!("{DIVISION_PREFIX}{id}")
}

fn required_name(name: &str, what: &str) -> Result<String, HierarchyError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(HierarchyError::Validation {
            reason: format!("{what} name must not be empty"),
        });
    }
    Ok(name.to_owned())
}

/// Store for OUs, divisions and their relation sets.
pub struct HierarchyStore {
    docs: Documents,
}

impl std::fmt::Debug for HierarchyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HierarchyStore").finish_non_exhaustive()
    }
}

impl HierarchyStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            docs: Documents::new(backend),
        }
    }

    /// Create an organizational unit.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Validation`] if `name` is blank.
    pub async fn create_ou(
        &self,
        name: &str,
        description: &str,
    ) -> Result<OrganizationalUnit, HierarchyError> {
        let name = required_name(name, "organizational unit")?;
        let now = Utc::now();
        let doc = OuDocument {
            id: OuId::new(),
            name,
            description: description.trim().to_owned(),
            created_at: now,
            updated_at: now,
        };
        self.docs.save(&ou_key(doc.id), &doc).await?;
        info!(ou_id = %doc.id, name = %doc.name, "organizational unit created");
        Ok(Self::assemble_ou(doc, BTreeSet::new(), BTreeSet::new()))
    }

    /// Create a division under an existing OU.
    ///
    /// Division names are unique across the whole hierarchy.
    ///
    /// # Errors
    ///
    /// - [`HierarchyError::Validation`] if `name` is blank.
    /// - [`HierarchyError::OuNotFound`] if `ou` does not exist.
    /// - [`HierarchyError::DuplicateDivision`] if the name is taken.
    pub async fn create_division(
        &self,
        name: &str,
        description: &str,
        ou: OuId,
    ) -> Result<Division, HierarchyError> {
        let name = required_name(name, "division")?;
        self.load_ou(ou).await?;

        let now = Utc::now();
        let doc = DivisionDocument {
            id: DivisionId::new(),
            name,
            description: description.trim().to_owned(),
            ou,
            created_at: now,
            updated_at: now,
        };

        if !self
            .docs
            .claim(UniqueIndex::DivisionName, &doc.name, &doc.id)
            .await?
        {
            return Err(HierarchyError::DuplicateDivision { name: doc.name });
        }

        if let Err(e) = self.docs.save(&division_key(doc.id), &doc).await {
            // Free the name so the failed create can be retried.
            if let Err(release_err) = self.docs.release(UniqueIndex::DivisionName, &doc.name).await {
                warn!(name = %doc.name, error = %release_err, "failed to release division name claim");
            }
            return Err(e.into());
        }

        self.docs.link(Relation::OuDivisions, &ou, &doc.id).await?;
        info!(division_id = %doc.id, ou_id = %ou, name = %doc.name, "division created");
        Ok(Self::assemble_division(doc, BTreeSet::new()))
    }

    /// Fetch an OU with its relation sets.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::OuNotFound`] if it does not exist.
    pub async fn get_ou(&self, id: OuId) -> Result<OrganizationalUnit, HierarchyError> {
        let doc = self.load_ou(id).await?;
        self.materialize_ou(doc).await
    }

    /// Fetch a division with its credential set.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::DivisionNotFound`] if it does not exist.
    pub async fn get_division(&self, id: DivisionId) -> Result<Division, HierarchyError> {
        let doc = self.load_division(id).await?;
        self.materialize_division(doc).await
    }

    /// All OUs, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Store`] if storage fails.
    pub async fn list_ous(&self) -> Result<Vec<OrganizationalUnit>, HierarchyError> {
        let mut out = Vec::new();
        for doc in self.ou_documents().await? {
            out.push(self.materialize_ou(doc).await?);
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// All divisions, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Store`] if storage fails.
    pub async fn list_divisions(&self) -> Result<Vec<Division>, HierarchyError> {
        let mut out = Vec::new();
        for doc in self.division_documents().await? {
            out.push(self.materialize_division(doc).await?);
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Divisions owned by one OU.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::OuNotFound`] if the OU does not exist.
    pub async fn list_divisions_in_ou(&self, ou: OuId) -> Result<Vec<Division>, HierarchyError> {
        self.load_ou(ou).await?;
        let mut out: Vec<Division> = Vec::new();
        for doc in self.division_documents().await? {
            if doc.ou == ou {
                out.push(self.materialize_division(doc).await?);
            }
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(out)
    }

    /// Look up a division by its unique name.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Store`] if storage fails.
    pub async fn find_division_by_name(&self, name: &str) -> Result<Option<Division>, HierarchyError> {
        let Some(id) = self
            .docs
            .claimant::<DivisionId>(UniqueIndex::DivisionName, name.trim())
            .await?
        else {
            return Ok(None);
        };
        match self.get_division(id).await {
            Ok(division) => Ok(Some(division)),
            Err(HierarchyError::DivisionNotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Look up an OU by name. OU names are not unique; the oldest match wins.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Store`] if storage fails.
    pub async fn find_ou_by_name(&self, name: &str) -> Result<Option<OrganizationalUnit>, HierarchyError> {
        let name = name.trim();
        let oldest = self
            .ou_documents()
            .await?
            .into_iter()
            .filter(|d| d.name == name)
            .min_by_key(|d| d.created_at);
        match oldest {
            Some(doc) => Ok(Some(self.materialize_ou(doc).await?)),
            None => Ok(None),
        }
    }

    /// Replace an OU's description.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::OuNotFound`] if it does not exist.
    pub async fn update_ou_description(
        &self,
        id: OuId,
        description: &str,
    ) -> Result<OrganizationalUnit, HierarchyError> {
        let mut doc = self.load_ou(id).await?;
        description.trim().clone_into(&mut doc.description);
        doc.updated_at = Utc::now();
        self.docs.save(&ou_key(id), &doc).await?;
        info!(ou_id = %id, "organizational unit description updated");
        self.materialize_ou(doc).await
    }

    /// Replace a division's description.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::DivisionNotFound`] if it does not exist.
    pub async fn update_division_description(
        &self,
        id: DivisionId,
        description: &str,
    ) -> Result<Division, HierarchyError> {
        let mut doc = self.load_division(id).await?;
        description.trim().clone_into(&mut doc.description);
        doc.updated_at = Utc::now();
        self.docs.save(&division_key(id), &doc).await?;
        info!(division_id = %id, "division description updated");
        self.materialize_division(doc).await
    }

    /// Resolve a set of division ids. Either every id resolves or none are returned.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::DivisionNotFound`] naming every missing id.
    pub async fn resolve_divisions(
        &self,
        ids: &BTreeSet<DivisionId>,
    ) -> Result<Vec<Division>, HierarchyError> {
        let mut found = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            match self.docs.load::<DivisionDocument>(&division_key(*id)).await? {
                Some(doc) => found.push(doc),
                None => missing.push(id.to_string()),
            }
        }
        if !missing.is_empty() {
            return Err(HierarchyError::DivisionNotFound {
                id: missing.join(", "),
            });
        }
        let mut out = Vec::with_capacity(found.len());
        for doc in found {
            out.push(self.materialize_division(doc).await?);
        }
        Ok(out)
    }

    /// Add a credential to its division's and OU's reference sets.
    ///
    /// Both writes are idempotent, so a retry after a partial failure is safe.
    ///
    /// # Errors
    ///
    /// Returns [`HierarchyError::Store`] if either write fails.
    pub async fn attach_credential(
        &self,
        division: DivisionId,
        ou: OuId,
        credential: CredentialId,
    ) -> Result<(), HierarchyError> {
        self.docs
            .link(Relation::DivisionCredentials, &division, &credential)
            .await?;
        self.docs
            .link(Relation::OuCredentials, &ou, &credential)
            .await?;
        Ok(())
    }

    /// Id-keyed maps of every OU and division document, for read-side joins.
    pub(crate) async fn snapshot(
        &self,
    ) -> Result<(HashMap<OuId, OuDocument>, HashMap<DivisionId, DivisionDocument>), HierarchyError>
    {
        let ous = self
            .ou_documents()
            .await?
            .into_iter()
            .map(|d| (d.id, d))
            .collect();
        let divisions = self
            .division_documents()
            .await?
            .into_iter()
            .map(|d| (d.id, d))
            .collect();
        Ok((ous, divisions))
    }

    pub(crate) fn documents(&self) -> &Documents {
        &self.docs
    }

    pub(crate) async fn ou_documents(&self) -> Result<Vec<OuDocument>, HierarchyError> {
        Ok(self.docs.load_all(OU_PREFIX).await?)
    }

    pub(crate) async fn division_documents(&self) -> Result<Vec<DivisionDocument>, HierarchyError> {
        Ok(self.docs.load_all(DIVISION_PREFIX).await?)
    }

    async fn load_ou(&self, id: OuId) -> Result<OuDocument, HierarchyError> {
        self.docs
            .load(&ou_key(id))
            .await?
            .ok_or_else(|| HierarchyError::OuNotFound { id: id.to_string() })
    }

    async fn load_division(&self, id: DivisionId) -> Result<DivisionDocument, HierarchyError> {
        self.docs
            .load(&division_key(id))
            .await?
            .ok_or_else(|| HierarchyError::DivisionNotFound { id: id.to_string() })
    }

    async fn materialize_ou(&self, doc: OuDocument) -> Result<OrganizationalUnit, HierarchyError> {
        let divisions = self.docs.members(Relation::OuDivisions, &doc.id).await?;
        let credentials = self.docs.members(Relation::OuCredentials, &doc.id).await?;
        Ok(Self::assemble_ou(doc, divisions, credentials))
    }

    async fn materialize_division(&self, doc: DivisionDocument) -> Result<Division, HierarchyError> {
        let credentials = self
            .docs
            .members(Relation::DivisionCredentials, &doc.id)
            .await?;
        Ok(Self::assemble_division(doc, credentials))
    }

    fn assemble_ou(
        doc: OuDocument,
        divisions: BTreeSet<DivisionId>,
        credentials: BTreeSet<CredentialId>,
    ) -> OrganizationalUnit {
        OrganizationalUnit {
            id: doc.id,
            name: doc.name,
            description: doc.description,
            divisions,
            credentials,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }

    fn assemble_division(doc: DivisionDocument, credentials: BTreeSet<CredentialId>) -> Division {
        Division {
            id: doc.id,
            name: doc.name,
            description: doc.description,
            ou: doc.ou,
            credentials,
            created_at: doc.created_at,
            updated_at: doc.updated_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use orgvault_storage::MemoryBackend;

    fn store() -> HierarchyStore {
        HierarchyStore::new(Arc::new(MemoryBackend::new()))
    }

    #[tokio::test]
    async fn create_ou_rejects_blank_name() {
        let err = store().create_ou("   ", "desc").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn division_links_into_its_ou() {
        let store = store();
        let ops = store.create_ou("Ops", "Operations").await.unwrap();
        let infra = store.create_division("Infra", "", ops.id).await.unwrap();

        let ops = store.get_ou(ops.id).await.unwrap();
        assert!(ops.divisions.contains(&infra.id));
        assert_eq!(store.get_division(infra.id).await.unwrap().ou, ops.id);
    }

    #[tokio::test]
    async fn division_requires_existing_ou() {
        let err = store()
            .create_division("Infra", "", OuId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, HierarchyError::OuNotFound { .. }));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn division_names_are_unique_across_ous() {
        let store = store();
        let a = store.create_ou("A", "").await.unwrap();
        let b = store.create_ou("B", "").await.unwrap();
        store.create_division("Infra", "", a.id).await.unwrap();
        let err = store.create_division(" Infra ", "", b.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert_eq!(store.list_divisions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unknown_ids_are_not_found() {
        let store = store();
        assert!(matches!(
            store.get_ou(OuId::new()).await,
            Err(HierarchyError::OuNotFound { .. })
        ));
        assert!(matches!(
            store.get_division(DivisionId::new()).await,
            Err(HierarchyError::DivisionNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn description_edit_keeps_identity() {
        let store = store();
        let ops = store.create_ou("Ops", "old").await.unwrap();
        let updated = store.update_ou_description(ops.id, "new").await.unwrap();
        assert_eq!(updated.id, ops.id);
        assert_eq!(updated.name, "Ops");
        assert_eq!(updated.description, "new");
    }

    #[tokio::test]
    async fn resolve_reports_missing_ids() {
        let store = store();
        let ops = store.create_ou("Ops", "").await.unwrap();
        let infra = store.create_division("Infra", "", ops.id).await.unwrap();
        let ghost = DivisionId::new();

        let ids: BTreeSet<_> = [infra.id, ghost].into_iter().collect();
        let err = store.resolve_divisions(&ids).await.unwrap_err();
        assert!(matches!(err, HierarchyError::DivisionNotFound { ref id } if *id == ghost.to_string()));
    }

    #[tokio::test]
    async fn find_division_by_name_uses_index() {
        let store = store();
        let ops = store.create_ou("Ops", "").await.unwrap();
        let infra = store.create_division("Infra", "", ops.id).await.unwrap();
        let found = store.find_division_by_name("Infra").await.unwrap().unwrap();
        assert_eq!(found.id, infra.id);
        assert!(store.find_division_by_name("Nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_divisions_in_ou_filters_by_owner() {
        let store = store();
        let a = store.create_ou("A", "").await.unwrap();
        let b = store.create_ou("B", "").await.unwrap();
        store.create_division("A1", "", a.id).await.unwrap();
        store.create_division("B1", "", b.id).await.unwrap();
        let in_a = store.list_divisions_in_ou(a.id).await.unwrap();
        assert_eq!(in_a.len(), 1);
        assert_eq!(in_a[0].name, "A1");
    }
}
