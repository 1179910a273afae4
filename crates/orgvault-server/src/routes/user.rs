//! User routes: `/user/*`
//!
//! Registration and login are public. The remaining routes describe the
//! authenticated caller.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Extension, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orgvault_core::hierarchy::Division;
use orgvault_core::{DivisionId, LoginRequest, OuId, Secret, Session};

use super::{CredentialResponse, UserResponse};
use crate::error::AppError;
use crate::extract::Json;
use crate::middleware::AuthContext;
use crate::state::AppState;

/// Build the public `/user` router.
pub fn public_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
}

/// Build the authenticated `/user` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/me", get(me))
        .route("/divisions", get(divisions))
        .route("/division-credentials", get(division_credentials))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub password: Secret,
    pub ou: OuId,
    pub division: DivisionId,
}

#[derive(Debug, Deserialize)]
pub struct LoginBody {
    pub username: String,
    pub password: Secret,
    /// Division context for division-scoped login.
    #[serde(default)]
    pub division: Option<DivisionId>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
    pub user: UserResponse,
}

impl From<Session> for SessionResponse {
    fn from(session: Session) -> Self {
        Self {
            expires_at: session.claims.expires_at(),
            user: UserResponse::from(&session.user),
            token: session.token,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DivisionsResponse {
    pub divisions: Vec<Division>,
}

#[derive(Debug, Serialize)]
pub struct DivisionCredentialsEntry {
    pub division: Division,
    pub credentials: Vec<CredentialResponse>,
}

#[derive(Debug, Serialize)]
pub struct DivisionCredentialsResponse {
    pub user: UserResponse,
    pub divisions: Vec<DivisionCredentialsEntry>,
}

// ── Handlers ─────────────────────────────────────────────────────────

/// Register a user with an initial OU and division, and log them in.
async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), AppError> {
    let user = state
        .identity
        .register(&body.username, &body.password, body.ou, body.division)
        .await?;
    let session = state.session.issue(user)?;
    Ok((StatusCode::CREATED, Json(session.into())))
}

/// Authenticate and issue a session token.
async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginBody>,
) -> Result<Json<SessionResponse>, AppError> {
    let request = LoginRequest {
        username: body.username,
        secret: body.password,
        division: body.division,
    };
    let session = state.session.login(&request).await?;
    Ok(Json(session.into()))
}

/// The caller's own record.
async fn me(Extension(ctx): Extension<AuthContext>) -> Json<UserResponse> {
    Json(UserResponse::from(&ctx.user))
}

/// Divisions the caller belongs to.
async fn divisions(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<DivisionsResponse>, AppError> {
    let divisions = state.identity.divisions_for_user(ctx.user.id).await?;
    Ok(Json(DivisionsResponse { divisions }))
}

/// Credentials of every division the caller belongs to.
async fn division_credentials(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<DivisionCredentialsResponse>, AppError> {
    let grouped = state.vault.list_for_caller(&ctx.user).await?;
    Ok(Json(DivisionCredentialsResponse {
        user: UserResponse::from(&ctx.user),
        divisions: grouped
            .into_iter()
            .map(|entry| DivisionCredentialsEntry {
                credentials: entry.credentials.iter().map(CredentialResponse::from).collect(),
                division: entry.division,
            })
            .collect(),
    }))
}
