//! One-way keyed hashing of secrets.
//!
//! User passwords, per-division secrets, and stored credential secrets all go
//! through a [`SecretHasher`]. The production implementation is
//! [`Argon2Hasher`]: Argon2id with a random salt per hash, PHC-encoded, and an
//! optional server-side pepper prepended to the input.

use std::fmt;
use std::sync::Arc;

use argon2::password_hash::SaltString;
use argon2::password_hash::rand_core::OsRng;
use argon2::{Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version};
use serde::Deserialize;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::HashError;

/// A plaintext secret held only as long as needed.
///
/// The buffer is wiped on drop and `Debug` never prints the value.
#[derive(Clone, Zeroize, ZeroizeOnDrop, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the plaintext.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// An opaque one-way keyed hash service.
#[async_trait::async_trait]
pub trait SecretHasher: Send + Sync + 'static {
    /// Hash a secret for storage.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::Hash`] if hashing fails.
    async fn hash(&self, secret: &Secret) -> Result<String, HashError>;

    /// Check a secret against a stored hash.
    ///
    /// A mismatch is `Ok(false)`, never an error.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::MalformedHash`] if `hash` cannot be parsed.
    async fn verify(&self, secret: &Secret, hash: &str) -> Result<bool, HashError>;
}

/// Argon2id implementation of [`SecretHasher`].
///
/// Hashing runs on the blocking thread pool so request tasks never stall
/// on the memory-hard computation.
#[derive(Clone)]
pub struct Argon2Hasher {
    params: Params,
    pepper: Option<Arc<Secret>>,
}

impl fmt::Debug for Argon2Hasher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Argon2Hasher")
            .field("m_cost", &self.params.m_cost())
            .field("t_cost", &self.params.t_cost())
            .field("peppered", &self.pepper.is_some())
            .finish()
    }
}

impl Argon2Hasher {
    /// Create a hasher with the default Argon2id parameters.
    #[must_use]
    pub fn new(pepper: Option<Secret>) -> Self {
        Self {
            params: Params::default(),
            pepper: pepper.filter(|p| !p.is_empty()).map(Arc::new),
        }
    }

    /// Create a hasher with explicit cost parameters.
    ///
    /// `m_cost` is in KiB. Low values are only suitable for tests.
    ///
    /// # Errors
    ///
    /// Returns [`HashError::InvalidParams`] if Argon2 rejects the parameters.
    pub fn with_params(
        m_cost: u32,
        t_cost: u32,
        p_cost: u32,
        pepper: Option<Secret>,
    ) -> Result<Self, HashError> {
        let params =
            Params::new(m_cost, t_cost, p_cost, None).map_err(|e| HashError::InvalidParams {
                reason: e.to_string(),
            })?;
        Ok(Self {
            params,
            pepper: pepper.filter(|p| !p.is_empty()).map(Arc::new),
        })
    }

    fn engine(params: Params) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
    }

    fn peppered(pepper: Option<&Secret>, secret: &Secret) -> Zeroizing<Vec<u8>> {
        let mut input = Zeroizing::new(Vec::new());
        if let Some(p) = pepper {
            input.extend_from_slice(p.expose().as_bytes());
        }
        input.extend_from_slice(secret.expose().as_bytes());
        input
    }
}

#[async_trait::async_trait]
impl SecretHasher for Argon2Hasher {
    async fn hash(&self, secret: &Secret) -> Result<String, HashError> {
        let input = Self::peppered(self.pepper.as_deref(), secret);
        let params = self.params.clone();
        tokio::task::spawn_blocking(move || {
            let salt = SaltString::generate(&mut OsRng);
            Self::engine(params)
                .hash_password(&input, &salt)
                .map(|h| h.to_string())
                .map_err(|e| HashError::Hash {
                    reason: e.to_string(),
                })
        })
        .await
        .map_err(|e| HashError::Hash {
            reason: format!("hashing task failed: {e}"),
        })?
    }

    async fn verify(&self, secret: &Secret, hash: &str) -> Result<bool, HashError> {
        let input = Self::peppered(self.pepper.as_deref(), secret);
        let params = self.params.clone();
        let hash = hash.to_owned();
        tokio::task::spawn_blocking(move || {
            let parsed = PasswordHash::new(&hash).map_err(|e| HashError::MalformedHash {
                reason: e.to_string(),
            })?;
            match Self::engine(params).verify_password(&input, &parsed) {
                Ok(()) => Ok(true),
                Err(argon2::password_hash::Error::Password) => Ok(false),
                Err(e) => Err(HashError::Hash {
                    reason: e.to_string(),
                }),
            }
        })
        .await
        .map_err(|e| HashError::Hash {
            reason: format!("verification task failed: {e}"),
        })?
    }
}
