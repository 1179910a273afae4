//! HTTP route handlers for `OrgVault`.
//!
//! Routes are organized by area:
//! - `user`: Registration, login, and the caller's own records
//! - `hierarchy`: OU and division listing and admin edits
//! - `assignment`: Admin membership and role changes
//! - `credentials`: The credential vault
//! - `sys`: Health
//!
//! Areas with both public and authenticated routes expose two routers so the
//! auth middleware is attached only where it belongs.

pub mod assignment;
pub mod credentials;
pub mod hierarchy;
pub mod sys;
pub mod user;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use orgvault_core::{Credential, CredentialId, CredentialView, DivisionId, OuId, Role, User, UserId};

// ── Shared response types ────────────────────────────────────────────
//
// Stored records carry hashes; these views are what leaves the server.

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: UserId,
    pub username: String,
    pub role: Role,
    pub ou: OuId,
    pub divisions: BTreeSet<DivisionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            role: user.role,
            ou: user.ou,
            divisions: user.divisions.clone(),
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CredentialResponse {
    pub id: CredentialId,
    pub username: String,
    pub service: String,
    pub division: DivisionId,
    pub ou: OuId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Credential> for CredentialResponse {
    fn from(credential: &Credential) -> Self {
        Self {
            id: credential.id,
            username: credential.username.clone(),
            service: credential.service.clone(),
            division: credential.division,
            ou: credential.ou,
            created_at: credential.created_at,
            updated_at: credential.updated_at,
        }
    }
}

/// A credential with its division and OU names joined in.
#[derive(Debug, Serialize)]
pub struct CredentialDetailResponse {
    #[serde(flatten)]
    pub credential: CredentialResponse,
    pub division_name: Option<String>,
    pub division_description: Option<String>,
    pub ou_name: Option<String>,
    pub ou_description: Option<String>,
}

impl From<CredentialView> for CredentialDetailResponse {
    fn from(view: CredentialView) -> Self {
        Self {
            credential: CredentialResponse::from(&view.credential),
            division_name: view.division_name,
            division_description: view.division_description,
            ou_name: view.ou_name,
            ou_description: view.ou_description,
        }
    }
}
