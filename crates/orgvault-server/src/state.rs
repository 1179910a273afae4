//! Shared application state for the `OrgVault` server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`. Every store sits on the same storage backend.

use std::sync::Arc;

use orgvault_core::{
    AuthSession, CredentialVault, HierarchyStore, IdentityStore, SecretHasher, TokenSigner,
};
use orgvault_storage::StorageBackend;

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// OUs, divisions and their reference sets.
    pub hierarchy: Arc<HierarchyStore>,
    /// Users, memberships and roles.
    pub identity: Arc<IdentityStore>,
    /// Login and token verification.
    pub session: Arc<AuthSession>,
    /// Credential storage.
    pub vault: Arc<CredentialVault>,
}

impl AppState {
    /// Wire every store onto one backend.
    pub fn new(
        backend: Arc<dyn StorageBackend>,
        hasher: Arc<dyn SecretHasher>,
        signer: Arc<dyn TokenSigner>,
    ) -> Self {
        let hierarchy = Arc::new(HierarchyStore::new(Arc::clone(&backend)));
        let identity = Arc::new(IdentityStore::new(
            Arc::clone(&backend),
            Arc::clone(&hierarchy),
            Arc::clone(&hasher),
        ));
        let session = Arc::new(AuthSession::new(
            Arc::clone(&identity),
            Arc::clone(&hasher),
            signer,
        ));
        let vault = Arc::new(CredentialVault::new(backend, Arc::clone(&hierarchy), hasher));
        Self {
            hierarchy,
            identity,
            session,
            vault,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
