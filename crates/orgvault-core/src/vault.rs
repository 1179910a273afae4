//! The credential vault.
//!
//! Credentials are the source of truth; the division and OU credential sets
//! are indexes over them. `add` writes the credential first and then the two
//! index entries. If an index write fails the credential stays stored and
//! the failure is returned as [`VaultError::IndexUpdate`]. Reads by division
//! scan the credential collection, so such a credential is still listed, and
//! its index entries are re-applied on the spot. [`CredentialVault::reconcile`]
//! rebuilds every set from the collections.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use orgvault_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{HierarchyError, VaultError};
use crate::hasher::{Secret, SecretHasher};
use crate::hierarchy::{Division, HierarchyStore};
use crate::identity::User;
use crate::ids::{CredentialId, DivisionId, OuId, UserId};
use crate::role::{self, Role};
use crate::store::{CREDENTIAL_PREFIX, Documents, Relation, USER_PREFIX, UniqueIndex};

/// A stored credential. `username` is a label, not a user reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    pub username: String,
    pub secret_hash: String,
    pub service: String,
    pub division: DivisionId,
    pub ou: OuId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for [`CredentialVault::add`].
#[derive(Debug, Clone)]
pub struct NewCredential {
    pub username: String,
    pub secret: Secret,
    pub service: String,
    pub division: DivisionId,
    pub ou: OuId,
}

/// Partial update for [`CredentialVault::update`]. `None` leaves a field as is.
#[derive(Debug, Clone, Default)]
pub struct CredentialPatch {
    pub username: Option<String>,
    pub secret: Option<Secret>,
    pub service: Option<String>,
}

/// A credential joined with its division's and OU's names for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialView {
    pub credential: Credential,
    pub division_name: Option<String>,
    pub division_description: Option<String>,
    pub ou_name: Option<String>,
    pub ou_description: Option<String>,
}

/// Credentials of one division, as listed for a member.
#[derive(Debug, Clone)]
pub struct DivisionCredentials {
    pub division: Division,
    pub credentials: Vec<Credential>,
}

/// Outcome of [`CredentialVault::reconcile`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// Relation entries that were missing and have been written.
    pub added: usize,
    /// Relation entries pointing at nothing that have been removed.
    pub removed: usize,
    /// Name and username claims whose owner no longer exists, now released.
    pub claims_released: usize,
}

fn credential_key(id: CredentialId) -> String {
    format!("{CREDENTIAL_PREFIX}{id}")
}

fn required(value: &str, field: &str) -> Result<String, VaultError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(VaultError::Validation {
            reason: format!("{field} must not be empty"),
        });
    }
    Ok(trimmed.to_owned())
}

/// Store for credentials and the consistency of their reference sets.
pub struct CredentialVault {
    docs: Documents,
    hierarchy: Arc<HierarchyStore>,
    hasher: Arc<dyn SecretHasher>,
}

impl std::fmt::Debug for CredentialVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialVault").finish_non_exhaustive()
    }
}

impl CredentialVault {
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        hierarchy: Arc<HierarchyStore>,
        hasher: Arc<dyn SecretHasher>,
    ) -> Self {
        Self {
            docs: Documents::new(backend),
            hierarchy,
            hasher,
        }
    }

    /// Store a new credential in one of the caller's divisions.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Validation`] if any text field is blank.
    /// - [`VaultError::Hierarchy`] (`NotFound`) if the division or OU does not exist.
    /// - [`VaultError::NotMember`] if the caller is not a member of the division.
    /// - [`VaultError::OuMismatch`] if the OU does not own the division.
    /// - [`VaultError::IndexUpdate`] if the credential was stored but its
    ///   reference sets could not be updated.
    pub async fn add(&self, caller: &User, new: NewCredential) -> Result<Credential, VaultError> {
        let (username, service) = Self::validate(&new)?;
        let division = self.hierarchy.get_division(new.division).await?;
        self.hierarchy.get_ou(new.ou).await?;

        if !caller.is_member_of(division.id) {
            return Err(VaultError::NotMember {
                division: division.id.to_string(),
            });
        }
        Self::check_owner(&division, new.ou)?;

        let credential = self.store(username, &new.secret, service, &division).await?;
        info!(
            credential_id = %credential.id,
            division_id = %credential.division,
            user_id = %caller.id,
            "credential added"
        );
        Ok(credential)
    }

    /// Store a credential on no user's behalf, as seeding does. Membership
    /// is not checked; everything else is as for [`add`](Self::add).
    ///
    /// # Errors
    ///
    /// As [`add`](Self::add), minus [`VaultError::NotMember`].
    pub async fn import(&self, new: NewCredential) -> Result<Credential, VaultError> {
        let (username, service) = Self::validate(&new)?;
        let division = self.hierarchy.get_division(new.division).await?;
        self.hierarchy.get_ou(new.ou).await?;
        Self::check_owner(&division, new.ou)?;

        let credential = self.store(username, &new.secret, service, &division).await?;
        info!(
            credential_id = %credential.id,
            division_id = %credential.division,
            "credential imported"
        );
        Ok(credential)
    }

    fn validate(new: &NewCredential) -> Result<(String, String), VaultError> {
        let username = required(&new.username, "username")?;
        required(new.secret.expose(), "password")?;
        let service = required(&new.service, "service")?;
        Ok((username, service))
    }

    fn check_owner(division: &Division, ou: OuId) -> Result<(), VaultError> {
        if division.ou != ou {
            return Err(VaultError::OuMismatch {
                division: division.id.to_string(),
                ou: ou.to_string(),
            });
        }
        Ok(())
    }

    /// Hash, save, then index. The credential survives a failed index write.
    async fn store(
        &self,
        username: String,
        secret: &Secret,
        service: String,
        division: &Division,
    ) -> Result<Credential, VaultError> {
        let now = Utc::now();
        let credential = Credential {
            id: CredentialId::new(),
            username,
            secret_hash: self.hasher.hash(secret).await?,
            service,
            division: division.id,
            ou: division.ou,
            created_at: now,
            updated_at: now,
        };
        self.docs
            .save(&credential_key(credential.id), &credential)
            .await?;

        self.hierarchy
            .attach_credential(credential.division, credential.ou, credential.id)
            .await
            .map_err(|e| {
                warn!(
                    credential_id = %credential.id,
                    division_id = %credential.division,
                    error = %e,
                    "credential stored but reference sets not updated"
                );
                VaultError::IndexUpdate {
                    credential: credential.id.to_string(),
                    reason: e.to_string(),
                }
            })?;
        Ok(credential)
    }

    /// Apply a partial update. Requires management or higher.
    ///
    /// # Errors
    ///
    /// - [`VaultError::Role`] if the caller is below management.
    /// - [`VaultError::CredentialNotFound`] if the id is unknown.
    /// - [`VaultError::Validation`] if a supplied field is blank.
    pub async fn update(
        &self,
        caller: &User,
        id: CredentialId,
        patch: CredentialPatch,
    ) -> Result<Credential, VaultError> {
        role::require(caller.role, Role::Management)?;
        let mut credential = self.load(id).await?;

        let username = patch
            .username
            .as_deref()
            .map(|v| required(v, "username"))
            .transpose()?;
        let service = patch
            .service
            .as_deref()
            .map(|v| required(v, "service"))
            .transpose()?;
        let secret_hash = match &patch.secret {
            Some(secret) => {
                required(secret.expose(), "password")?;
                Some(self.hasher.hash(secret).await?)
            }
            None => None,
        };

        if let Some(username) = username {
            credential.username = username;
        }
        if let Some(service) = service {
            credential.service = service;
        }
        if let Some(hash) = secret_hash {
            credential.secret_hash = hash;
        }
        credential.updated_at = Utc::now();
        self.docs.save(&credential_key(id), &credential).await?;

        info!(credential_id = %id, user_id = %caller.id, "credential updated");
        Ok(credential)
    }

    /// Fetch one credential with names joined in.
    ///
    /// # Errors
    ///
    /// - [`VaultError::CredentialNotFound`] if the id is unknown.
    /// - [`VaultError::Hierarchy`] (`Internal`) if the division or OU cannot
    ///   be read. A division or OU that no longer exists leaves its names unset.
    pub async fn get(&self, id: CredentialId) -> Result<CredentialView, VaultError> {
        let credential = self.load(id).await?;
        let division = match self.hierarchy.get_division(credential.division).await {
            Ok(division) => Some(division),
            Err(HierarchyError::DivisionNotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        let ou = match self.hierarchy.get_ou(credential.ou).await {
            Ok(ou) => Some(ou),
            Err(HierarchyError::OuNotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        Ok(CredentialView {
            credential,
            division_name: division.as_ref().map(|d| d.name.clone()),
            division_description: division.map(|d| d.description),
            ou_name: ou.as_ref().map(|o| o.name.clone()),
            ou_description: ou.map(|o| o.description),
        })
    }

    /// Fetch one credential on behalf of a caller, who must be a member of
    /// its division or hold management or higher.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::CredentialNotFound`] or [`VaultError::NotMember`].
    pub async fn get_for(&self, caller: &User, id: CredentialId) -> Result<CredentialView, VaultError> {
        let view = self.get(id).await?;
        let division = view.credential.division;
        if !caller.is_member_of(division) && !role::permits(caller.role, Role::Management) {
            return Err(VaultError::NotMember {
                division: division.to_string(),
            });
        }
        Ok(view)
    }

    /// All credentials of a division, optionally narrowed to one OU.
    ///
    /// Credentials missing from the division's or the OU's reference set are
    /// still returned and their entries re-applied.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Hierarchy`] (`NotFound`) if the division does not exist.
    pub async fn list_for_division(
        &self,
        division: DivisionId,
        ou_filter: Option<OuId>,
    ) -> Result<Vec<Credential>, VaultError> {
        let division = self.hierarchy.get_division(division).await?;
        let ou_credentials: BTreeSet<CredentialId> = self
            .hierarchy
            .documents()
            .members(Relation::OuCredentials, &division.ou)
            .await?;
        let mut out = Vec::new();
        for credential in self.all_credentials().await? {
            if credential.division != division.id {
                continue;
            }
            // A credential filed under another OU is indexed there; reconcile owns that case.
            let indexed = division.credentials.contains(&credential.id)
                && (credential.ou != division.ou || ou_credentials.contains(&credential.id));
            if !indexed {
                self.repair(&credential).await;
            }
            if ou_filter.is_none_or(|ou| ou == credential.ou) {
                out.push(credential);
            }
        }
        Ok(out)
    }

    /// [`list_for_division`](Self::list_for_division) for a caller who must
    /// be a member of the division, or an admin.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::NotMember`] if the caller may not see the division.
    pub async fn list_for_member(
        &self,
        caller: &User,
        division: DivisionId,
        ou_filter: Option<OuId>,
    ) -> Result<Vec<Credential>, VaultError> {
        // Resolve first so an unknown division is NotFound rather than Forbidden.
        self.hierarchy.get_division(division).await?;
        if !caller.is_member_of(division) && !role::permits(caller.role, Role::Admin) {
            return Err(VaultError::NotMember {
                division: division.to_string(),
            });
        }
        self.list_for_division(division, ou_filter).await
    }

    /// Credentials of every division the caller belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Store`] if storage fails.
    pub async fn list_for_caller(&self, caller: &User) -> Result<Vec<DivisionCredentials>, VaultError> {
        let mut out = Vec::with_capacity(caller.divisions.len());
        for id in &caller.divisions {
            let division = match self.hierarchy.get_division(*id).await {
                Ok(d) => d,
                Err(HierarchyError::DivisionNotFound { .. }) => continue,
                Err(e) => return Err(e.into()),
            };
            let credentials = self.list_for_division(division.id, None).await?;
            out.push(DivisionCredentials {
                division,
                credentials,
            });
        }
        Ok(out)
    }

    /// Every credential, with division and OU names joined in.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Store`] if storage fails.
    pub async fn list_all(&self) -> Result<Vec<CredentialView>, VaultError> {
        let (ous, divisions) = self.hierarchy.snapshot().await?;
        Ok(self
            .all_credentials()
            .await?
            .into_iter()
            .map(|credential| {
                let division = divisions.get(&credential.division);
                let ou = ous.get(&credential.ou);
                CredentialView {
                    division_name: division.map(|d| d.name.clone()),
                    division_description: division.map(|d| d.description.clone()),
                    ou_name: ou.map(|o| o.name.clone()),
                    ou_description: ou.map(|o| o.description.clone()),
                    credential,
                }
            })
            .collect())
    }

    /// Rebuild every reference set from the entity collections.
    ///
    /// Missing entries are written and entries whose target does not exist,
    /// or belongs elsewhere, are removed. Division-name and username claims
    /// left behind by a create that never wrote its document are released.
    /// Idempotent. A create still in flight holds a claim with no document
    /// yet, so run this while no creates are in progress.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Store`] if storage fails part way; rerunning
    /// completes the repair.
    pub async fn reconcile(&self) -> Result<ReconcileReport, VaultError> {
        let (ous, divisions) = self.hierarchy.snapshot().await?;
        let credentials = self.all_credentials().await?;
        let rel = self.hierarchy.documents();

        let mut expected: BTreeMap<(Relation, String), BTreeSet<String>> = BTreeMap::new();
        for ou in ous.keys() {
            expected.entry((Relation::OuDivisions, ou.to_string())).or_default();
            expected.entry((Relation::OuCredentials, ou.to_string())).or_default();
        }
        for division in divisions.values() {
            expected
                .entry((Relation::DivisionCredentials, division.id.to_string()))
                .or_default();
            if ous.contains_key(&division.ou) {
                expected
                    .entry((Relation::OuDivisions, division.ou.to_string()))
                    .or_default()
                    .insert(division.id.to_string());
            }
        }
        for credential in &credentials {
            if divisions.contains_key(&credential.division) {
                expected
                    .entry((Relation::DivisionCredentials, credential.division.to_string()))
                    .or_default()
                    .insert(credential.id.to_string());
            }
            if ous.contains_key(&credential.ou) {
                expected
                    .entry((Relation::OuCredentials, credential.ou.to_string()))
                    .or_default()
                    .insert(credential.id.to_string());
            }
        }

        let mut report = ReconcileReport::default();
        for ((relation, owner), want) in &expected {
            let have: BTreeSet<String> = rel.members(*relation, owner).await?;
            for member in want.difference(&have) {
                rel.link(*relation, owner, member).await?;
                report.added += 1;
            }
            for member in have.difference(want) {
                rel.unlink(*relation, owner, member).await?;
                report.removed += 1;
            }
        }

        for (name, owner) in rel.claims::<DivisionId>(UniqueIndex::DivisionName).await? {
            let live = owner
                .and_then(|id| divisions.get(&id))
                .is_some_and(|division| division.name == name);
            if !live {
                warn!(name = %name, "releasing orphaned division name claim");
                rel.release(UniqueIndex::DivisionName, &name).await?;
                report.claims_released += 1;
            }
        }
        for (username, owner) in rel.claims::<UserId>(UniqueIndex::Username).await? {
            let live = match owner {
                Some(id) => rel.exists(&format!("{USER_PREFIX}{id}")).await?,
                None => false,
            };
            if !live {
                warn!(username = %username, "releasing orphaned username claim");
                rel.release(UniqueIndex::Username, &username).await?;
                report.claims_released += 1;
            }
        }

        info!(
            added = report.added,
            removed = report.removed,
            claims_released = report.claims_released,
            "reference sets reconciled"
        );
        Ok(report)
    }

    async fn load(&self, id: CredentialId) -> Result<Credential, VaultError> {
        self.docs
            .load(&credential_key(id))
            .await?
            .ok_or_else(|| VaultError::CredentialNotFound { id: id.to_string() })
    }

    async fn all_credentials(&self) -> Result<Vec<Credential>, VaultError> {
        Ok(self.docs.load_all(CREDENTIAL_PREFIX).await?)
    }

    async fn repair(&self, credential: &Credential) {
        warn!(
            credential_id = %credential.id,
            division_id = %credential.division,
            "credential missing from a reference set, re-indexing"
        );
        if let Err(e) = self
            .hierarchy
            .attach_credential(credential.division, credential.ou, credential.id)
            .await
        {
            warn!(credential_id = %credential.id, error = %e, "lazy re-index failed");
        }
    }
}
