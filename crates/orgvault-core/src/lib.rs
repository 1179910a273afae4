//! Core library for `OrgVault`.
//!
//! Contains the OU / division hierarchy, user identities and memberships,
//! the role guard, login and session tokens, the credential vault, and
//! startup seeding. Entities are stored as JSON documents on any
//! `orgvault-storage` backend; this crate knows nothing about HTTP.

pub mod error;
pub mod hasher;
pub mod hierarchy;
pub mod identity;
pub mod ids;
pub mod role;
pub mod seed;
pub mod session;
pub(crate) mod store;
#[cfg(test)]
mod testing;
pub mod token;
pub mod vault;

pub use error::ErrorKind;
pub use hasher::{Argon2Hasher, Secret, SecretHasher};
pub use hierarchy::{Division, HierarchyStore, OrganizationalUnit};
pub use identity::{IdentityStore, MembershipGrant, User};
pub use ids::{CredentialId, DivisionId, OuId, UserId};
pub use role::Role;
pub use session::{AuthSession, LoginRequest, Session};
pub use token::{Claims, JwtSigner, TokenSigner};
pub use vault::{Credential, CredentialPatch, CredentialVault, CredentialView, NewCredential};
