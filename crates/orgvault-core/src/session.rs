//! Login and session tokens.
//!
//! Two login modes share one entry point. Without a division the secret is
//! checked against the user's primary password. With a division the user must
//! hold that membership and the secret is checked against the membership's
//! own hash. Every mismatch, including an unknown username, is reported as
//! [`AuthError::InvalidCredentials`] so usernames cannot be enumerated.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};

use crate::error::AuthError;
use crate::hasher::{Secret, SecretHasher};
use crate::identity::{IdentityStore, User};
use crate::ids::DivisionId;
use crate::token::{Claims, TokenSigner};

/// A login attempt.
#[derive(Debug, Clone)]
pub struct LoginRequest {
    pub username: String,
    pub secret: Secret,
    /// Division context; `None` selects single-context login.
    pub division: Option<DivisionId>,
}

/// An issued session.
#[derive(Debug, Clone)]
pub struct Session {
    /// The signed bearer token.
    pub token: String,
    pub claims: Claims,
    pub user: User,
}

/// Authenticates users and verifies session tokens.
pub struct AuthSession {
    identity: Arc<IdentityStore>,
    hasher: Arc<dyn SecretHasher>,
    signer: Arc<dyn TokenSigner>,
}

impl std::fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSession").finish_non_exhaustive()
    }
}

impl AuthSession {
    pub fn new(
        identity: Arc<IdentityStore>,
        hasher: Arc<dyn SecretHasher>,
        signer: Arc<dyn TokenSigner>,
    ) -> Self {
        Self {
            identity,
            hasher,
            signer,
        }
    }

    /// Authenticate and issue a token.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] for any mismatch, or an
    /// internal error if hashing, storage or signing fails.
    pub async fn login(&self, request: &LoginRequest) -> Result<Session, AuthError> {
        let Some(user) = self.identity.find_by_username(&request.username).await? else {
            debug!("login rejected: unknown username");
            return Err(AuthError::InvalidCredentials);
        };

        let stored_hash = match request.division {
            None => &user.password_hash,
            Some(division) => {
                if !user.is_member_of(division) {
                    debug!(user_id = %user.id, division_id = %division, "login rejected: not a member");
                    return Err(AuthError::InvalidCredentials);
                }
                let Some(hash) = user.division_secrets.get(&division) else {
                    debug!(user_id = %user.id, division_id = %division, "login rejected: no division secret");
                    return Err(AuthError::InvalidCredentials);
                };
                hash
            }
        };

        if !self.hasher.verify(&request.secret, stored_hash).await? {
            debug!(user_id = %user.id, "login rejected: secret mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        let session = self.issue(user)?;
        info!(
            user_id = %session.user.id,
            division_id = ?request.division,
            "login succeeded"
        );
        Ok(session)
    }

    /// Issue a token for an already authenticated user.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Signing`] if the token cannot be signed.
    pub fn issue(&self, user: User) -> Result<Session, AuthError> {
        let claims = Claims::for_user(&user, Utc::now(), self.signer.ttl());
        let token = self.signer.sign(&claims)?;
        Ok(Session {
            token,
            claims,
            user,
        })
    }

    /// Verify a bearer token's signature and expiry.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::TokenExpired`] or [`AuthError::TokenInvalid`].
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        self.signer.verify(token)
    }

    /// Verify a token and load its subject's current record.
    ///
    /// Role and memberships come from storage, not from the claims, so
    /// administrative changes apply to tokens already issued.
    ///
    /// # Errors
    ///
    /// Returns a token error, or [`AuthError::UnknownSubject`] if the user no
    /// longer exists.
    pub async fn authenticate(&self, token: &str) -> Result<User, AuthError> {
        let claims = self.verify(token)?;
        self.current_user(&claims).await
    }

    /// Load the current record of a verified token's subject.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::UnknownSubject`] if the user no longer exists.
    pub async fn current_user(&self, claims: &Claims) -> Result<User, AuthError> {
        match self.identity.get_user(claims.sub).await {
            Ok(user) => Ok(user),
            Err(crate::error::IdentityError::UserNotFound { .. }) => Err(AuthError::UnknownSubject),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::hasher::Argon2Hasher;
    use crate::hierarchy::HierarchyStore;
    use crate::identity::MembershipGrant;
    use crate::token::JwtSigner;
    use orgvault_storage::{MemoryBackend, StorageBackend};

    struct Fixture {
        identity: Arc<IdentityStore>,
        session: AuthSession,
        ou: crate::ids::OuId,
        infra: DivisionId,
        web: DivisionId,
    }

    async fn fixture() -> Fixture {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryBackend::new());
        let hierarchy = Arc::new(HierarchyStore::new(Arc::clone(&backend)));
        let hasher: Arc<dyn SecretHasher> =
            Arc::new(Argon2Hasher::with_params(8, 1, 1, None).unwrap());
        let identity = Arc::new(IdentityStore::new(
            backend,
            Arc::clone(&hierarchy),
            Arc::clone(&hasher),
        ));
        let signer: Arc<dyn TokenSigner> =
            Arc::new(JwtSigner::new(b"session-test", chrono::Duration::hours(1)));
        let session = AuthSession::new(Arc::clone(&identity), hasher, signer);
        let ou = hierarchy.create_ou("Ops", "").await.unwrap().id;
        let infra = hierarchy.create_division("Infra", "", ou).await.unwrap().id;
        let web = hierarchy.create_division("Web", "", ou).await.unwrap().id;
        identity
            .register("alice", &Secret::from("alice-pw"), ou, infra)
            .await
            .unwrap();
        Fixture {
            identity,
            session,
            ou,
            infra,
            web,
        }
    }

    fn login(username: &str, secret: &str, division: Option<DivisionId>) -> LoginRequest {
        LoginRequest {
            username: username.to_owned(),
            secret: Secret::from(secret),
            division,
        }
    }

    #[tokio::test]
    async fn single_context_login_issues_token() {
        let f = fixture().await;
        let session = f.session.login(&login("alice", "alice-pw", None)).await.unwrap();
        let claims = f.session.verify(&session.token).unwrap();
        assert_eq!(claims.sub, session.user.id);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[tokio::test]
    async fn division_login_claims_carry_every_membership() {
        let f = fixture().await;
        f.identity
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
        let session = f
            .session
            .login(&login("alice", "web-pw", Some(f.web)))
            .await
            .unwrap();
        assert!(session.claims.divisions.contains(&f.infra));
        assert!(session.claims.divisions.contains(&f.web));
    }

    #[tokio::test]
    async fn every_mismatch_is_unauthorized() {
        let f = fixture().await;
        let cases = [
            login("nobody", "alice-pw", None),
            login("alice", "wrong", None),
            login("alice", "alice-pw", Some(f.web)),
            login("alice", "wrong", Some(f.infra)),
            login("alice", "alice-pw", Some(DivisionId::new())),
        ];
        for case in &cases {
            let err = f.session.login(case).await.unwrap_err();
            assert!(matches!(err, AuthError::InvalidCredentials));
            assert_eq!(err.kind(), ErrorKind::Unauthorized);
        }
    }

    #[tokio::test]
    async fn division_login_uses_the_division_secret() {
        let f = fixture().await;
        f.identity
            .assign_memberships(
                "alice",
                &[MembershipGrant::new(f.infra, "infra-only")],
                f.ou,
            )
            .await
            .unwrap();
        assert!(f
            .session
            .login(&login("alice", "alice-pw", Some(f.infra)))
            .await
            .is_err());
        assert!(f
            .session
            .login(&login("alice", "infra-only", Some(f.infra)))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn authenticate_sees_role_changes() {
        let f = fixture().await;
        let session = f.session.login(&login("alice", "alice-pw", None)).await.unwrap();
        f.identity
            .set_role("alice", crate::role::Role::Management)
            .await
            .unwrap();
        let user = f.session.authenticate(&session.token).await.unwrap();
        assert_eq!(user.role, crate::role::Role::Management);
    }

    #[tokio::test]
    async fn tampered_token_is_unauthenticated() {
        let f = fixture().await;
        let session = f.session.login(&login("alice", "alice-pw", None)).await.unwrap();
        let mut token = session.token;
        token.push('x');
        let err = f.session.authenticate(&token).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    }
}
