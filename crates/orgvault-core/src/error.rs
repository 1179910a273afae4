//! Error types for `orgvault-core`.
//!
//! Each subsystem has its own enum so callers can match on exactly the
//! failures an operation can produce. Every enum also maps onto the shared
//! [`ErrorKind`] taxonomy, which the HTTP layer turns into status codes.
//! Messages never contain secrets or hashes.

use orgvault_storage::StorageError;

use crate::role::Role;

/// Coarse failure classes shared by every operation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed or missing input.
    Validation,
    /// Missing, malformed, or expired session token.
    Unauthenticated,
    /// Login credentials did not match.
    Unauthorized,
    /// Authenticated, but role or membership is insufficient.
    Forbidden,
    /// A referenced entity does not exist.
    NotFound,
    /// A uniqueness constraint was violated.
    Conflict,
    /// Storage, hashing, or signing failure.
    Internal,
}

/// Errors from the typed document layer over a [`StorageBackend`](orgvault_storage::StorageBackend).
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The storage backend failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A document could not be serialized.
    #[error("failed to encode document '{key}': {reason}")]
    Encode { key: String, reason: String },

    /// A stored document could not be deserialized.
    #[error("failed to decode document '{key}': {reason}")]
    Decode { key: String, reason: String },

    /// An update kept losing to concurrent writers and gave up.
    #[error("document '{key}' is being modified concurrently, retry later")]
    Contended { key: String },
}

/// Errors from the secret hashing service.
#[derive(Debug, thiserror::Error)]
pub enum HashError {
    /// Hashing a secret failed.
    #[error("secret hashing failed: {reason}")]
    Hash { reason: String },

    /// A stored hash could not be parsed.
    #[error("stored hash is malformed: {reason}")]
    MalformedHash { reason: String },

    /// Hasher parameters were rejected.
    #[error("invalid hasher parameters: {reason}")]
    InvalidParams { reason: String },
}

/// Errors from role parsing and role checks.
#[derive(Debug, thiserror::Error)]
pub enum RoleError {
    /// The value is not one of `normal`, `management`, `admin`.
    #[error("unknown role '{value}': expected normal, management or admin")]
    Unknown { value: String },

    /// The caller's role is below the operation's minimum.
    #[error("role '{actual}' does not satisfy required role '{required}'")]
    Insufficient { required: Role, actual: Role },
}

impl RoleError {
    /// Taxonomy class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unknown { .. } => ErrorKind::Validation,
            Self::Insufficient { .. } => ErrorKind::Forbidden,
        }
    }
}

/// Errors from the OU / division hierarchy.
#[derive(Debug, thiserror::Error)]
pub enum HierarchyError {
    /// Input failed validation.
    #[error("invalid input: {reason}")]
    Validation { reason: String },

    /// No OU with this identifier exists.
    #[error("organizational unit not found: {id}")]
    OuNotFound { id: String },

    /// No division with this identifier exists.
    #[error("division not found: {id}")]
    DivisionNotFound { id: String },

    /// A division with this name already exists.
    #[error("division name already taken: {name}")]
    DuplicateDivision { name: String },

    /// The document store failed.
    #[error("hierarchy store error: {0}")]
    Store(#[from] StoreError),
}

impl HierarchyError {
    /// Taxonomy class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
            Self::OuNotFound { .. } | Self::DivisionNotFound { .. } => ErrorKind::NotFound,
            Self::DuplicateDivision { .. } => ErrorKind::Conflict,
            Self::Store(_) => ErrorKind::Internal,
        }
    }
}

/// Errors from the identity store.
#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    /// Input failed validation.
    #[error("invalid input: {reason}")]
    Validation { reason: String },

    /// The username is already registered.
    #[error("username already taken: {username}")]
    UsernameTaken { username: String },

    /// No user matches the given username or identifier.
    #[error("user not found: {reference}")]
    UserNotFound { reference: String },

    /// A new membership was granted without a division secret.
    #[error("a secret is required for new membership in division {division}")]
    MissingDivisionSecret { division: String },

    /// An OU or division reference did not resolve.
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),

    /// Hashing a secret failed.
    #[error(transparent)]
    Hash(#[from] HashError),

    /// The document store failed.
    #[error("identity store error: {0}")]
    Store(#[from] StoreError),
}

impl IdentityError {
    /// Taxonomy class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::MissingDivisionSecret { .. } => ErrorKind::Validation,
            Self::UsernameTaken { .. } => ErrorKind::Conflict,
            Self::UserNotFound { .. } => ErrorKind::NotFound,
            Self::Hierarchy(inner) => inner.kind(),
            Self::Hash(_) | Self::Store(_) => ErrorKind::Internal,
        }
    }
}

/// Errors from login and token handling.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Username, division, or secret did not match. Deliberately vague.
    #[error("invalid username, division or password")]
    InvalidCredentials,

    /// No bearer token was presented.
    #[error("missing bearer token")]
    TokenMissing,

    /// The token is malformed or its signature does not verify.
    #[error("invalid token: {reason}")]
    TokenInvalid { reason: String },

    /// The token's expiry has passed.
    #[error("token expired")]
    TokenExpired,

    /// The token's subject no longer exists.
    #[error("token subject no longer exists")]
    UnknownSubject,

    /// Signing a token failed.
    #[error("token signing failed: {reason}")]
    Signing { reason: String },

    /// Hashing or verifying a secret failed.
    #[error(transparent)]
    Hash(#[from] HashError),

    /// Loading the user failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),
}

impl AuthError {
    /// Taxonomy class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCredentials => ErrorKind::Unauthorized,
            Self::TokenMissing
            | Self::TokenInvalid { .. }
            | Self::TokenExpired
            | Self::UnknownSubject => ErrorKind::Unauthenticated,
            Self::Signing { .. } | Self::Hash(_) => ErrorKind::Internal,
            Self::Identity(inner) => inner.kind(),
        }
    }
}

/// Errors from the credential vault.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// Input failed validation.
    #[error("invalid input: {reason}")]
    Validation { reason: String },

    /// No credential with this identifier exists.
    #[error("credential not found: {id}")]
    CredentialNotFound { id: String },

    /// The caller is not a member of the target division.
    #[error("caller is not a member of division {division}")]
    NotMember { division: String },

    /// The credential's OU is not the OU that owns its division.
    #[error("division {division} does not belong to organizational unit {ou}")]
    OuMismatch { division: String, ou: String },

    /// The credential was stored but a reference set could not be updated.
    #[error("credential {credential} stored but reference index update failed: {reason}")]
    IndexUpdate { credential: String, reason: String },

    /// The caller's role is insufficient.
    #[error(transparent)]
    Role(#[from] RoleError),

    /// A division or OU reference did not resolve.
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),

    /// Hashing a secret failed.
    #[error(transparent)]
    Hash(#[from] HashError),

    /// The document store failed.
    #[error("vault store error: {0}")]
    Store(#[from] StoreError),
}

impl VaultError {
    /// Taxonomy class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } | Self::OuMismatch { .. } => ErrorKind::Validation,
            Self::CredentialNotFound { .. } => ErrorKind::NotFound,
            Self::NotMember { .. } => ErrorKind::Forbidden,
            Self::IndexUpdate { .. } | Self::Hash(_) | Self::Store(_) => ErrorKind::Internal,
            Self::Role(inner) => inner.kind(),
            Self::Hierarchy(inner) => inner.kind(),
        }
    }
}

/// Errors from loading or applying a seed document.
#[derive(Debug, thiserror::Error)]
pub enum SeedError {
    /// The seed file could not be read.
    #[error("failed to read seed file '{path}': {reason}")]
    Io { path: String, reason: String },

    /// The seed document is not valid JSON for the seed schema.
    #[error("invalid seed document: {reason}")]
    Parse { reason: String },

    /// A seed entry refers to an OU or division the seed does not define.
    #[error("seed entry '{entry}' references unknown {what} '{name}'")]
    UnknownReference {
        entry: String,
        what: &'static str,
        name: String,
    },

    /// Creating hierarchy entities failed.
    #[error(transparent)]
    Hierarchy(#[from] HierarchyError),

    /// Creating users failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Storing credentials failed.
    #[error(transparent)]
    Vault(#[from] VaultError),
}

impl SeedError {
    /// Taxonomy class of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Internal,
            Self::Parse { .. } | Self::UnknownReference { .. } => ErrorKind::Validation,
            Self::Hierarchy(inner) => inner.kind(),
            Self::Identity(inner) => inner.kind(),
            Self::Vault(inner) => inner.kind(),
        }
    }
}
