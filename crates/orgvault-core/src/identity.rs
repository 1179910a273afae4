//! Users, memberships and per-division secrets.
//!
//! A user belongs to one OU and any number of divisions. Each membership
//! carries its own hashed secret used for division-scoped login; the primary
//! password hash backs single-context login. The key set of
//! [`User::division_secrets`] always equals [`User::divisions`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use orgvault_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::IdentityError;
use crate::hasher::{Secret, SecretHasher};
use crate::hierarchy::{Division, HierarchyStore};
use crate::ids::{DivisionId, OuId, UserId};
use crate::role::Role;
use crate::store::{Documents, USER_PREFIX, UniqueIndex};

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Primary password hash, used by single-context login.
    pub password_hash: String,
    pub role: Role,
    pub ou: OuId,
    /// Division memberships.
    pub divisions: BTreeSet<DivisionId>,
    /// One secret hash per membership, used by division-scoped login.
    pub division_secrets: BTreeMap<DivisionId, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// Whether the user is a member of `division`.
    #[must_use]
    pub fn is_member_of(&self, division: DivisionId) -> bool {
        self.divisions.contains(&division)
    }
}

/// One membership in an [`IdentityStore::assign_memberships`] call.
#[derive(Debug, Clone, Deserialize)]
pub struct MembershipGrant {
    pub division: DivisionId,
    /// Secret for this membership. May be omitted only for a membership the
    /// user already holds, in which case the existing secret is kept.
    #[serde(default)]
    pub secret: Option<Secret>,
}

impl MembershipGrant {
    pub fn new(division: DivisionId, secret: impl Into<Secret>) -> Self {
        Self {
            division,
            secret: Some(secret.into()),
        }
    }

    /// Keep an existing membership and its secret.
    pub fn retain(division: DivisionId) -> Self {
        Self {
            division,
            secret: None,
        }
    }
}

fn user_key(id: UserId) -> String {
    format!("{USER_PREFIX}{id}")
}

fn non_empty(value: &str, field: &str) -> Result<(), IdentityError> {
    if value.trim().is_empty() {
        return Err(IdentityError::Validation {
            reason: format!("{field} must not be empty"),
        });
    }
    Ok(())
}

/// Store for user identities.
pub struct IdentityStore {
    docs: Documents,
    hierarchy: Arc<HierarchyStore>,
    hasher: Arc<dyn SecretHasher>,
}

impl std::fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityStore").finish_non_exhaustive()
    }
}

impl IdentityStore {
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

    /// Register a user bound to one OU and one initial division.
    ///
    /// The secret becomes both the primary password and the division secret
    /// for the initial membership. New users always get [`Role::Normal`].
    ///
    /// # Errors
    ///
    /// - [`IdentityError::Validation`] if the username or secret is blank.
    /// - [`IdentityError::Hierarchy`] (`NotFound`) if the OU or division does not exist.
    /// - [`IdentityError::UsernameTaken`] if the username is registered.
    pub async fn register(
        &self,
        username: &str,
        secret: &Secret,
        ou: OuId,
        division: DivisionId,
    ) -> Result<User, IdentityError> {
        non_empty(username, "username")?;
        non_empty(secret.expose(), "password")?;
        let username = username.trim().to_owned();

        self.hierarchy.get_ou(ou).await?;
        self.hierarchy.get_division(division).await?;

        if self.find_by_username(&username).await?.is_some() {
            return Err(IdentityError::UsernameTaken { username });
        }

        let password_hash = self.hasher.hash(secret).await?;
        let now = Utc::now();
        let user = User {
            id: UserId::new(),
            username,
            password_hash: password_hash.clone(),
            role: Role::Normal,
            ou,
            divisions: BTreeSet::from([division]),
            division_secrets: BTreeMap::from([(division, password_hash)]),
            created_at: now,
            updated_at: now,
        };

        // The claim is the authoritative uniqueness check; the lookup above
        // only avoids hashing for an obvious duplicate.
        if !self
            .docs
            .claim(UniqueIndex::Username, &user.username, &user.id)
            .await?
        {
            return Err(IdentityError::UsernameTaken {
                username: user.username,
            });
        }

        if let Err(e) = self.docs.save(&user_key(user.id), &user).await {
            if let Err(release_err) = self.docs.release(UniqueIndex::Username, &user.username).await {
                warn!(user_id = %user.id, error = %release_err, "failed to release username claim");
            }
            return Err(e.into());
        }

        info!(user_id = %user.id, ou_id = %ou, division_id = %division, "user registered");
        Ok(user)
    }

    /// Look up a user by username.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::Store`] if storage fails.
    pub async fn find_by_username(&self, username: &str) -> Result<Option<User>, IdentityError> {
        let Some(id) = self
            .docs
            .claimant::<UserId>(UniqueIndex::Username, username.trim())
            .await?
        else {
            return Ok(None);
        };
        Ok(self.docs.load(&user_key(id)).await?)
    }

    /// Fetch a user by id.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::UserNotFound`] if no such user exists.
    pub async fn get_user(&self, id: UserId) -> Result<User, IdentityError> {
        self.docs
            .load(&user_key(id))
            .await?
            .ok_or_else(|| IdentityError::UserNotFound {
                reference: id.to_string(),
            })
    }

    /// Replace a user's memberships and OU.
    ///
    /// Every grant is validated and every new secret hashed before the write,
    /// so the user is either fully reassigned or left untouched. The write is
    /// a compare-and-swap on the user document, so a concurrent role change
    /// is kept rather than overwritten. Secrets of dropped memberships are
    /// discarded.
    ///
    /// # Errors
    ///
    /// - [`IdentityError::Validation`] if `grants` is empty.
    /// - [`IdentityError::UserNotFound`] if the username is unknown.
    /// - [`IdentityError::Hierarchy`] (`NotFound`) if the OU or any division does not exist.
    /// - [`IdentityError::MissingDivisionSecret`] if a new membership has no secret.
    pub async fn assign_memberships(
        &self,
        username: &str,
        grants: &[MembershipGrant],
        ou: OuId,
    ) -> Result<User, IdentityError> {
        if grants.is_empty() {
            return Err(IdentityError::Validation {
                reason: "at least one division is required".to_owned(),
            });
        }
        let found = self.require_by_username(username).await?;
        self.hierarchy.get_ou(ou).await?;

        let requested: BTreeSet<DivisionId> = grants.iter().map(|g| g.division).collect();
        self.hierarchy.resolve_divisions(&requested).await?;

        let mut supplied = BTreeMap::new();
        for grant in grants {
            if let Some(secret) = grant.secret.as_ref().filter(|s| !s.is_empty()) {
                supplied.insert(grant.division, self.hasher.hash(secret).await?);
            }
        }

        let user = self
            .docs
            .update(&user_key(found.id), |user: &mut User| -> Result<(), IdentityError> {
                let mut secrets = supplied.clone();
                for division in &requested {
                    if secrets.contains_key(division) {
                        continue;
                    }
                    let existing = user.division_secrets.get(division).ok_or_else(|| {
                        IdentityError::MissingDivisionSecret {
                            division: division.to_string(),
                        }
                    })?;
                    secrets.insert(*division, existing.clone());
                }
                user.divisions = requested.clone();
                user.division_secrets = secrets;
                user.ou = ou;
                user.updated_at = Utc::now();
                Ok(())
            })
            .await?
            .ok_or_else(|| IdentityError::UserNotFound {
                reference: found.id.to_string(),
            })?;

        info!(
            user_id = %user.id,
            ou_id = %ou,
            divisions = user.divisions.len(),
            "memberships assigned"
        );
        Ok(user)
    }

    /// Set a user's role. Setting the current role again is a no-op write.
    ///
    /// Only the role is replaced; memberships written concurrently survive.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::UserNotFound`] if the username is unknown.
    pub async fn set_role(&self, username: &str, role: Role) -> Result<User, IdentityError> {
        let found = self.require_by_username(username).await?;
        let mut previous = found.role;
        let user = self
            .docs
            .update(&user_key(found.id), |user: &mut User| -> Result<(), IdentityError> {
                previous = user.role;
                user.role = role;
                user.updated_at = Utc::now();
                Ok(())
            })
            .await?
            .ok_or_else(|| IdentityError::UserNotFound {
                reference: found.id.to_string(),
            })?;
        info!(user_id = %user.id, from = %previous, to = %role, "role changed");
        Ok(user)
    }

    /// The divisions a user belongs to, resolved to entities.
    ///
    /// Memberships whose division has disappeared are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::UserNotFound`] if the user does not exist.
    pub async fn divisions_for_user(&self, id: UserId) -> Result<Vec<Division>, IdentityError> {
        let user = self.get_user(id).await?;
        let mut out = Vec::with_capacity(user.divisions.len());
        for division in &user.divisions {
            match self.hierarchy.get_division(*division).await {
                Ok(d) => out.push(d),
                Err(crate::error::HierarchyError::DivisionNotFound { .. }) => {
                    warn!(user_id = %id, division_id = %division, "membership references missing division");
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(out)
    }

    async fn require_by_username(&self, username: &str) -> Result<User, IdentityError> {
        self.find_by_username(username)
            .await?
            .ok_or_else(|| IdentityError::UserNotFound {
                reference: username.trim().to_owned(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::hasher::Argon2Hasher;
    use crate::testing::FaultyBackend;

    struct Fixture {
        backend: Arc<FaultyBackend>,
        hierarchy: Arc<HierarchyStore>,
        identity: IdentityStore,
        hasher: Arc<dyn SecretHasher>,
        ou: OuId,
        infra: DivisionId,
        web: DivisionId,
    }

    async fn fixture() -> Fixture {
        let backend = Arc::new(FaultyBackend::default());
        let shared: Arc<dyn StorageBackend> = backend.clone();
        let hierarchy = Arc::new(HierarchyStore::new(Arc::clone(&shared)));
        let hasher: Arc<dyn SecretHasher> =
            Arc::new(Argon2Hasher::with_params(8, 1, 1, None).unwrap());
        let identity = IdentityStore::new(shared, Arc::clone(&hierarchy), Arc::clone(&hasher));
        let ou = hierarchy.create_ou("Ops", "").await.unwrap().id;
        let infra = hierarchy.create_division("Infra", "", ou).await.unwrap().id;
        let web = hierarchy.create_division("Web", "", ou).await.unwrap().id;
        Fixture {
            backend,
            hierarchy,
            identity,
            hasher,
            ou,
            infra,
            web,
        }
    }

    #[tokio::test]
    async fn register_binds_initial_membership() {
        let f = fixture().await;
        let user = f
            .identity
            .register("alice", &Secret::from("pw"), f.ou, f.infra)
            .await
            .unwrap();
        assert_eq!(user.role, Role::Normal);
        assert_eq!(user.divisions, BTreeSet::from([f.infra]));
        assert!(f
            .hasher
            .verify(&Secret::from("pw"), &user.division_secrets[&f.infra])
            .await
            .unwrap());
        assert_eq!(
            f.identity.find_by_username("alice").await.unwrap().unwrap().id,
            user.id
        );
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let f = fixture().await;
        f.identity
            .register("alice", &Secret::from("pw"), f.ou, f.infra)
            .await
            .unwrap();
        let err = f
            .identity
            .register("alice", &Secret::from("other"), f.ou, f.web)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn register_with_unknown_division_is_not_found() {
        let f = fixture().await;
        let err = f
            .identity
            .register("bob", &Secret::from("pw"), f.ou, DivisionId::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(f.identity.find_by_username("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn register_rejects_blank_fields() {
        let f = fixture().await;
        let err = f
            .identity
            .register(" ", &Secret::from("pw"), f.ou, f.infra)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = f
            .identity
            .register("carol", &Secret::from(""), f.ou, f.infra)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn assign_replaces_memberships_and_keeps_retained_secret() {
        let f = fixture().await;
        let user = f
            .identity
            .register("alice", &Secret::from("pw"), f.ou, f.infra)
            .await
            .unwrap();
        let infra_hash = user.division_secrets[&f.infra].clone();

        let updated = f
            .identity
            .assign_memberships(
                "alice",
                &[
                    MembershipGrant::retain(f.infra),
                    MembershipGrant::new(f.web, "web-secret"),
                ],
                f.ou,
            )
            .await
            .unwrap();

        assert_eq!(updated.divisions, BTreeSet::from([f.infra, f.web]));
        assert_eq!(updated.division_secrets[&f.infra], infra_hash);
        assert!(f
            .hasher
            .verify(&Secret::from("web-secret"), &updated.division_secrets[&f.web])
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn assign_drops_secrets_of_removed_memberships() {
        let f = fixture().await;
        f.identity
            .register("alice", &Secret::from("pw"), f.ou, f.infra)
            .await
            .unwrap();
        let updated = f
            .identity
            .assign_memberships("alice", &[MembershipGrant::new(f.web, "w")], f.ou)
            .await
            .unwrap();
        let keys: BTreeSet<_> = updated.division_secrets.keys().copied().collect();
        assert_eq!(keys, updated.divisions);
        assert!(!updated.is_member_of(f.infra));
    }

    #[tokio::test]
    async fn assign_is_atomic_when_a_division_is_unknown() {
        let f = fixture().await;
        let before = f
            .identity
            .register("alice", &Secret::from("pw"), f.ou, f.infra)
            .await
            .unwrap();
        let err = f
            .identity
            .assign_memberships(
                "alice",
                &[
                    MembershipGrant::new(f.web, "w"),
                    MembershipGrant::new(DivisionId::new(), "x"),
                ],
                f.ou,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        let after = f.identity.get_user(before.id).await.unwrap();
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn assign_requires_secret_for_new_membership() {
        let f = fixture().await;
        f.identity
            .register("alice", &Secret::from("pw"), f.ou, f.infra)
            .await
            .unwrap();
        let err = f
            .identity
            .assign_memberships("alice", &[MembershipGrant::retain(f.web)], f.ou)
            .await
            .unwrap_err();
        assert!(matches!(err, IdentityError::MissingDivisionSecret { .. }));
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn assign_rejects_empty_and_unknown_user() {
        let f = fixture().await;
        let err = f
            .identity
            .assign_memberships("alice", &[], f.ou)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        let err = f
            .identity
            .assign_memberships("ghost", &[MembershipGrant::new(f.web, "w")], f.ou)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn set_role_is_idempotent() {
        let f = fixture().await;
        f.identity
            .register("alice", &Secret::from("pw"), f.ou, f.infra)
            .await
            .unwrap();
        let once = f.identity.set_role("alice", Role::Management).await.unwrap();
        let twice = f.identity.set_role("alice", Role::Management).await.unwrap();
        assert_eq!(once.role, Role::Management);
        assert_eq!(twice.role, Role::Management);
        assert_eq!(once.divisions, twice.divisions);
    }

    #[tokio::test]
    async fn role_change_keeps_assignment_written_meanwhile() {
        let f = fixture().await;
        let alice = f
            .identity
            .register("alice", &Secret::from("pw"), f.ou, f.infra)
            .await
            .unwrap();

        // Another admin's assignment lands between set_role's read and write.
        let mut assigned = alice.clone();
        assigned.divisions.insert(f.web);
        assigned
            .division_secrets
            .insert(f.web, alice.password_hash.clone());
        f.backend.interleave_before_swap(
            &format!("users/{}", alice.id),
            serde_json::to_vec(&assigned).unwrap(),
        );

        let user = f.identity.set_role("alice", Role::Management).await.unwrap();
        assert_eq!(user.role, Role::Management);
        assert_eq!(user.divisions, BTreeSet::from([f.infra, f.web]));
        assert_eq!(f.identity.get_user(alice.id).await.unwrap(), user);
    }

    #[tokio::test]
    async fn assignment_keeps_role_written_meanwhile() {
        let f = fixture().await;
        let alice = f
            .identity
            .register("alice", &Secret::from("pw"), f.ou, f.infra)
            .await
            .unwrap();

        let mut promoted = alice.clone();
        promoted.role = Role::Admin;
        f.backend.interleave_before_swap(
            &format!("users/{}", alice.id),
            serde_json::to_vec(&promoted).unwrap(),
        );

        let user = f
            .identity
            .assign_memberships(
                "alice",
                &[
                    MembershipGrant::retain(f.infra),
                    MembershipGrant::new(f.web, "web-pw"),
                ],
                f.ou,
            )
            .await
            .unwrap();
        assert_eq!(user.role, Role::Admin);
        assert_eq!(user.divisions, BTreeSet::from([f.infra, f.web]));
        assert_eq!(f.identity.get_user(alice.id).await.unwrap(), user);
    }

    #[tokio::test]
    async fn divisions_for_user_resolves_entities() {
        let f = fixture().await;
        let user = f
            .identity
            .register("alice", &Secret::from("pw"), f.ou, f.infra)
            .await
            .unwrap();
        let divisions = f.identity.divisions_for_user(user.id).await.unwrap();
        assert_eq!(divisions.len(), 1);
        assert_eq!(divisions[0].name, "Infra");
        assert_eq!(
            f.hierarchy.get_division(f.infra).await.unwrap().id,
            divisions[0].id
        );
    }
}
