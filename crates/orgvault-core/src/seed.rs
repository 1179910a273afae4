//! Startup seeding from a JSON document.
//!
//! Registration always yields [`Role::Normal`], so the first admin has to come
//! from somewhere: a seed file names OUs with their divisions, users with
//! their role, OU and memberships, and sample credentials filed under a
//! division. Applying a seed is idempotent; entities that already exist
//! (matched by name, or by username and service for credentials) are left
//! untouched.
//!
//! ```json
//! {
//!   "ous": [
//!     { "name": "News management", "description": "Editorial",
//!       "divisions": [{ "name": "IT", "description": "Information Technology" }] }
//!   ],
//!   "users": [
//!     { "username": "admin", "secret": "change-me", "role": "admin",
//!       "ou": "News management", "divisions": ["IT"] }
//!   ],
//!   "credentials": [
//!     { "username": "john_doe", "secret": "password123", "service": "Email",
//!       "division": "IT" }
//!   ]
//! }
//! ```

use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::error::SeedError;
use crate::hasher::Secret;
use crate::hierarchy::HierarchyStore;
use crate::identity::{IdentityStore, MembershipGrant};
use crate::role::Role;
use crate::vault::{CredentialVault, NewCredential};

/// A seed document.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub ous: Vec<SeedOu>,
    #[serde(default)]
    pub users: Vec<SeedUser>,
    #[serde(default)]
    pub credentials: Vec<SeedCredential>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedOu {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub divisions: Vec<SeedDivision>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedDivision {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A seeded user. `ou` and `divisions` are names, not ids. The secret is
/// used as the primary password and as every membership's secret.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedUser {
    pub username: String,
    pub secret: Secret,
    #[serde(default)]
    pub role: Role,
    pub ou: String,
    pub divisions: Vec<String>,
}

/// A seeded credential. `division` is a name; the OU is the division's owner.
#[derive(Debug, Clone, Deserialize)]
pub struct SeedCredential {
    pub username: String,
    pub secret: Secret,
    pub service: String,
    pub division: String,
}

/// What [`apply_seed`] did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedReport {
    pub ous_created: usize,
    pub divisions_created: usize,
    pub users_created: usize,
    pub credentials_created: usize,
    /// Entries that already existed.
    pub skipped: usize,
}

impl Seed {
    /// Read and parse a seed file.
    ///
    /// # Errors
    ///
    /// Returns [`SeedError::Io`] or [`SeedError::Parse`].
    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self, SeedError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SeedError::Io {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        Self::from_json(&raw)
    }

    /// Parse a seed document.
    ///
    /// # Errors
    ///
    /// Returns [`SeedError::Parse`] if the JSON does not match the seed schema.
    pub fn from_json(raw: &str) -> Result<Self, SeedError> {
        serde_json::from_str(raw).map_err(|e| SeedError::Parse {
            reason: e.to_string(),
        })
    }
}

/// Create whatever the seed describes that does not exist yet.
///
/// # Errors
///
/// - [`SeedError::UnknownReference`] if a user or credential names an OU or
///   division that neither the store nor the seed provides.
/// - [`SeedError::Parse`] if a user lists no divisions.
/// - Hierarchy, identity or vault errors from creating entities.
pub async fn apply_seed(
    seed: &Seed,
    hierarchy: &HierarchyStore,
    identity: &IdentityStore,
    vault: &CredentialVault,
) -> Result<SeedReport, SeedError> {
    let mut report = SeedReport::default();

    for ou in &seed.ous {
        let ou_id = match hierarchy.find_ou_by_name(&ou.name).await? {
            Some(existing) => {
                debug!(name = %ou.name, "seed: organizational unit exists");
                report.skipped += 1;
                existing.id
            }
            None => {
                report.ous_created += 1;
                hierarchy.create_ou(&ou.name, &ou.description).await?.id
            }
        };

        for division in &ou.divisions {
            if hierarchy.find_division_by_name(&division.name).await?.is_some() {
                debug!(name = %division.name, "seed: division exists");
                report.skipped += 1;
                continue;
            }
            hierarchy
                .create_division(&division.name, &division.description, ou_id)
                .await?;
            report.divisions_created += 1;
        }
    }

    for user in &seed.users {
        if identity.find_by_username(&user.username).await?.is_some() {
            debug!(username = %user.username, "seed: user exists");
            report.skipped += 1;
            continue;
        }

        let ou = hierarchy
            .find_ou_by_name(&user.ou)
            .await?
            .ok_or_else(|| SeedError::UnknownReference {
                entry: user.username.clone(),
                what: "organizational unit",
                name: user.ou.clone(),
            })?;

        let mut divisions = Vec::with_capacity(user.divisions.len());
        for name in &user.divisions {
            let division = hierarchy
                .find_division_by_name(name)
                .await?
                .ok_or_else(|| SeedError::UnknownReference {
                    entry: user.username.clone(),
                    what: "division",
                    name: name.clone(),
                })?;
            divisions.push(division.id);
        }
        let Some((&first, rest)) = divisions.split_first() else {
            return Err(SeedError::Parse {
                reason: format!("user '{}' must list at least one division", user.username),
            });
        };

        identity
            .register(&user.username, &user.secret, ou.id, first)
            .await?;
        if !rest.is_empty() {
            let grants: Vec<MembershipGrant> = std::iter::once(MembershipGrant::retain(first))
                .chain(rest.iter().map(|d| MembershipGrant::new(*d, user.secret.clone())))
                .collect();
            identity
                .assign_memberships(&user.username, &grants, ou.id)
                .await?;
        }
        if user.role != Role::Normal {
            identity.set_role(&user.username, user.role).await?;
        }
        report.users_created += 1;
    }

    for credential in &seed.credentials {
        let division = hierarchy
            .find_division_by_name(&credential.division)
            .await?
            .ok_or_else(|| SeedError::UnknownReference {
                entry: credential.username.clone(),
                what: "division",
                name: credential.division.clone(),
            })?;

        let username = credential.username.trim();
        let service = credential.service.trim();
        let present = vault
            .list_for_division(division.id, None)
            .await?
            .iter()
            .any(|c| c.username == username && c.service == service);
        if present {
            debug!(username, service, "seed: credential exists");
            report.skipped += 1;
            continue;
        }

        vault
            .import(NewCredential {
                username: credential.username.clone(),
                secret: credential.secret.clone(),
                service: credential.service.clone(),
                division: division.id,
                ou: division.ou,
            })
            .await?;
        report.credentials_created += 1;
    }

    info!(
        ous = report.ous_created,
        divisions = report.divisions_created,
        users = report.users_created,
        credentials = report.credentials_created,
        skipped = report.skipped,
        "seed applied"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::hasher::{Argon2Hasher, SecretHasher};
    use orgvault_storage::{MemoryBackend, StorageBackend};

    const SEED: &str = r#"{
        "ous": [
            { "name": "News management", "description": "Editorial",
              "divisions": [
                { "name": "IT", "description": "Information Technology" },
                { "name": "Finance" }
              ] }
        ],
        "users": [
            { "username": "admin_user", "secret": "adminPassword123", "role": "admin",
              "ou": "News management", "divisions": ["IT", "Finance"] },
            { "username": "normal_user", "secret": "userPassword789",
              "ou": "News management", "divisions": ["Finance"] }
        ],
        "credentials": [
            { "username": "john_doe", "secret": "password123", "service": "Email",
              "division": "IT" },
            { "username": "charlie_white", "secret": "topSecret2023", "service": "Finance",
              "division": "Finance" }
        ]
    }"#;

    struct Stores {
        hierarchy: Arc<HierarchyStore>,
        identity: IdentityStore,
        vault: CredentialVault,
    }

    impl Stores {
        async fn apply(&self, seed: &Seed) -> Result<SeedReport, SeedError> {
            apply_seed(seed, &self.hierarchy, &self.identity, &self.vault).await
        }
    }

    fn stores() -> Stores {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let hierarchy = Arc::new(HierarchyStore::new(Arc::clone(&backend)));
        let hasher: Arc<dyn SecretHasher> =
            Arc::new(Argon2Hasher::with_params(8, 1, 1, None).unwrap());
        let identity =
            IdentityStore::new(Arc::clone(&backend), Arc::clone(&hierarchy), Arc::clone(&hasher));
        let vault = CredentialVault::new(backend, Arc::clone(&hierarchy), hasher);
        Stores {
            hierarchy,
            identity,
            vault,
        }
    }

    #[tokio::test]
    async fn seed_creates_and_is_idempotent() {
        let s = stores();
        let (hierarchy, identity) = (&s.hierarchy, &s.identity);
        let seed = Seed::from_json(SEED).unwrap();

        let first = s.apply(&seed).await.unwrap();
        assert_eq!(
            first,
            SeedReport {
                ous_created: 1,
                divisions_created: 2,
                users_created: 2,
                credentials_created: 2,
                skipped: 0,
            }
        );

        let admin = identity.find_by_username("admin_user").await.unwrap().unwrap();
        assert_eq!(admin.role, Role::Admin);
        assert_eq!(admin.divisions.len(), 2);
        let normal = identity.find_by_username("normal_user").await.unwrap().unwrap();
        assert_eq!(normal.role, Role::Normal);

        let it = hierarchy.find_division_by_name("IT").await.unwrap().unwrap();
        let seeded = s.vault.list_for_division(it.id, None).await.unwrap();
        assert_eq!(seeded.len(), 1);
        assert_eq!(seeded[0].username, "john_doe");
        assert_eq!(seeded[0].ou, it.ou);
        assert_ne!(seeded[0].secret_hash, "password123");
        assert!(it.credentials.contains(&seeded[0].id));
        let ou = hierarchy.get_ou(it.ou).await.unwrap();
        assert_eq!(ou.credentials.len(), 2);

        let second = s.apply(&seed).await.unwrap();
        assert_eq!(
            second.ous_created
                + second.divisions_created
                + second.users_created
                + second.credentials_created,
            0
        );
        assert_eq!(second.skipped, 7);
        assert_eq!(hierarchy.list_ous().await.unwrap().len(), 1);
        assert_eq!(s.vault.list_all().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn credential_with_unknown_division_is_reported() {
        let s = stores();
        let seed = Seed::from_json(
            r#"{ "credentials": [{ "username": "svc", "secret": "s", "service": "Email",
                                   "division": "Nope" }] }"#,
        )
        .unwrap();
        let err = s.apply(&seed).await.unwrap_err();
        assert!(matches!(err, SeedError::UnknownReference { what: "division", .. }));
    }

    #[tokio::test]
    async fn unknown_division_reference_is_reported() {
        let s = stores();
        let seed = Seed::from_json(
            r#"{ "ous": [{ "name": "Ops" }],
                 "users": [{ "username": "u", "secret": "s", "ou": "Ops", "divisions": ["Nope"] }] }"#,
        )
        .unwrap();
        let err = s.apply(&seed).await.unwrap_err();
        assert!(matches!(err, SeedError::UnknownReference { what: "division", .. }));
    }

    #[test]
    fn malformed_document_is_a_parse_error() {
        assert!(matches!(
            Seed::from_json("{ \"ous\": 5 }"),
            Err(SeedError::Parse { .. })
        ));
    }
}
