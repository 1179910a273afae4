//! Authentication middleware for `OrgVault`.
//!
//! Extracts the `Authorization: Bearer <token>` header, verifies the token,
//! re-loads the subject's user record and injects it into the request
//! extensions. Handlers gate on the fresh record, so role and membership
//! changes apply to tokens issued before the change.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use orgvault_core::error::AuthError;
use orgvault_core::{Role, User, role};

use crate::error::AppError;
use crate::state::AppState;

/// Authentication context injected into request extensions.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The caller's current user record.
    pub user: User,
}

impl AuthContext {
    /// Fail with `403` unless the caller's role is at least `required`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Forbidden`] when the role is insufficient.
    pub fn require(&self, required: Role) -> Result<(), AppError> {
        role::require(self.user.role, required).map_err(AppError::from)
    }
}

fn bearer_token(req: &Request) -> Option<String> {
    let value = req.headers().get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then(|| token.to_owned())
}

/// Middleware that validates the bearer token.
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Response {
    let Some(token) = bearer_token(&req) else {
        return AppError::from(AuthError::TokenMissing).into_response();
    };

    match state.session.authenticate(&token).await {
        Ok(user) => {
            req.extensions_mut().insert(AuthContext { user });
            next.run(req).await
        }
        Err(err) => AppError::from(err).into_response(),
    }
}
