//! Credential routes: `/credentials/*`
//!
//! Adding requires membership of the target division. Listing everything and
//! updating require management. Secret hashes never leave the server.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Extension, Router};
use serde::{Deserialize, Serialize};

use orgvault_core::{CredentialId, CredentialPatch, DivisionId, NewCredential, OuId, Role, Secret};

use super::{CredentialDetailResponse, CredentialResponse};
use crate::error::AppError;
use crate::extract::{Json, Path, Query};
use crate::middleware::AuthContext;
use crate::state::AppState;

/// Build the `/credentials` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_all).post(add_credential))
        .route("/{id}", get(get_credential).put(update_credential))
        .route("/division/{id}", get(list_for_division))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AddCredentialRequest {
    pub username: String,
    pub password: Secret,
    pub service: String,
    pub division: DivisionId,
    pub ou: OuId,
}

#[derive(Debug, Deserialize)]
pub struct UpdateCredentialRequest {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<Secret>,
    #[serde(default)]
    pub service: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DivisionFilter {
    /// Narrow to credentials of this OU.
    #[serde(default)]
    pub ou: Option<OuId>,
}

#[derive(Debug, Serialize)]
pub struct CredentialEnvelope {
    pub credential: CredentialResponse,
}

#[derive(Debug, Serialize)]
pub struct CredentialsResponse {
    pub credentials: Vec<CredentialResponse>,
}

#[derive(Debug, Serialize)]
pub struct CredentialDetailsResponse {
    pub credentials: Vec<CredentialDetailResponse>,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn add_credential(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<AddCredentialRequest>,
) -> Result<(StatusCode, Json<CredentialEnvelope>), AppError> {
    let credential = state
        .vault
        .add(
            &ctx.user,
            NewCredential {
                username: body.username,
                secret: body.password,
                service: body.service,
                division: body.division,
                ou: body.ou,
            },
        )
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CredentialEnvelope {
            credential: CredentialResponse::from(&credential),
        }),
    ))
}

async fn update_credential(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<CredentialId>,
    Json(body): Json<UpdateCredentialRequest>,
) -> Result<Json<CredentialEnvelope>, AppError> {
    let patch = CredentialPatch {
        username: body.username,
        secret: body.password,
        service: body.service,
    };
    let credential = state.vault.update(&ctx.user, id, patch).await?;
    Ok(Json(CredentialEnvelope {
        credential: CredentialResponse::from(&credential),
    }))
}

async fn get_credential(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<CredentialId>,
) -> Result<Json<CredentialDetailResponse>, AppError> {
    let view = state.vault.get_for(&ctx.user, id).await?;
    Ok(Json(view.into()))
}

async fn list_for_division(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<DivisionId>,
    Query(filter): Query<DivisionFilter>,
) -> Result<Json<CredentialsResponse>, AppError> {
    let credentials = state.vault.list_for_member(&ctx.user, id, filter.ou).await?;
    Ok(Json(CredentialsResponse {
        credentials: credentials.iter().map(CredentialResponse::from).collect(),
    }))
}

/// Every credential with names joined in.
async fn list_all(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<CredentialDetailsResponse>, AppError> {
    ctx.require(Role::Management)?;
    let credentials = state.vault.list_all().await?;
    Ok(Json(CredentialDetailsResponse {
        credentials: credentials.into_iter().map(Into::into).collect(),
    }))
}
