//! Session token claims and signing.
//!
//! Tokens are HS256 JWTs. The claim set carries the subject, role, OU and the
//! full division membership set at issuance; `exp` is `iat` plus the signer's
//! lifetime (one hour unless configured otherwise). Verification allows no
//! clock leeway.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::identity::User;
use crate::ids::{DivisionId, OuId, UserId};
use crate::role::Role;

/// Default session lifetime in seconds.
pub const DEFAULT_TOKEN_TTL_SECS: i64 = 3600;

/// Claims embedded in every session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject: the user id.
    pub sub: UserId,
    /// Role at issuance.
    pub role: Role,
    /// OU at issuance.
    pub ou: OuId,
    /// Every division the user belonged to at issuance.
    pub divisions: Vec<DivisionId>,
    /// Issued-at (Unix seconds).
    pub iat: i64,
    /// Expiry (Unix seconds).
    pub exp: i64,
}

impl Claims {
    /// Build claims for `user`, issued at `now` and valid for `ttl`.
    #[must_use]
    pub fn for_user(user: &User, now: DateTime<Utc>, ttl: Duration) -> Self {
        let iat = now.timestamp();
        Self {
            sub: user.id,
            role: user.role,
            ou: user.ou,
            divisions: user.divisions.iter().copied().collect(),
            iat,
            exp: iat.saturating_add(ttl.num_seconds()),
        }
    }

    /// Expiry as a timestamp.
    #[must_use]
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }
}

/// Opaque token signer and verifier.
pub trait TokenSigner: Send + Sync + 'static {
    /// Lifetime applied to newly issued tokens.
    fn ttl(&self) -> Duration;

    /// Sign a claim set.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Signing`] if encoding fails.
    fn sign(&self, claims: &Claims) -> Result<String, AuthError>;

    /// Verify signature and expiry and return the claims.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenExpired`] for an expired token and
    /// [`AuthError::TokenInvalid`] for anything else that fails to verify.
    fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}

/// HS256 JWT implementation of [`TokenSigner`].
#[derive(Clone)]
pub struct JwtSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl: Duration,
}

impl fmt::Debug for JwtSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JwtSigner")
            .field("algorithm", &"HS256")
            .field("ttl_secs", &self.ttl.num_seconds())
            .finish_non_exhaustive()
    }
}

impl JwtSigner {
    /// Create a signer from a shared secret key.
    #[must_use]
    pub fn new(key: &[u8], ttl: Duration) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["sub", "exp"]);
        Self {
            encoding: EncodingKey::from_secret(key),
            decoding: DecodingKey::from_secret(key),
            validation,
            ttl,
        }
    }
}

impl TokenSigner for JwtSigner {
    fn ttl(&self) -> Duration {
        self.ttl
    }

    fn sign(&self, claims: &Claims) -> Result<String, AuthError> {
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), claims, &self.encoding).map_err(|e| {
            AuthError::Signing {
                reason: e.to_string(),
            }
        })
    }

    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::TokenInvalid {
                    reason: e.to_string(),
                },
            })
    }
}
