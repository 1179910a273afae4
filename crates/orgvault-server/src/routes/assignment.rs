//! Assignment routes: `/assignment/*`
//!
//! Admin-only changes to a user's memberships, OU and role.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{post, put};
use axum::{Extension, Router};
use serde::{Deserialize, Serialize};

use orgvault_core::{MembershipGrant, OuId, Role};

use super::UserResponse;
use crate::error::AppError;
use crate::extract::Json;
use crate::middleware::AuthContext;
use crate::state::AppState;

/// Build the `/assignment` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/assign-user", post(assign_user))
        .route("/change-role", put(change_role))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct AssignUserRequest {
    pub username: String,
    /// The complete new membership set. A secret is required for each
    /// division the user does not already belong to.
    pub divisions: Vec<MembershipGrant>,
    pub ou: OuId,
}

#[derive(Debug, Deserialize)]
pub struct ChangeRoleRequest {
    pub username: String,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct AssignmentResponse {
    pub message: &'static str,
    pub user: UserResponse,
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn assign_user(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<AssignUserRequest>,
) -> Result<Json<AssignmentResponse>, AppError> {
    ctx.require(Role::Admin)?;
    let user = state
        .identity
        .assign_memberships(&body.username, &body.divisions, body.ou)
        .await?;
    Ok(Json(AssignmentResponse {
        message: "user assigned",
        user: UserResponse::from(&user),
    }))
}

async fn change_role(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<ChangeRoleRequest>,
) -> Result<Json<AssignmentResponse>, AppError> {
    ctx.require(Role::Admin)?;
    let role: Role = body.role.parse()?;
    let user = state.identity.set_role(&body.username, role).await?;
    Ok(Json(AssignmentResponse {
        message: "role updated",
        user: UserResponse::from(&user),
    }))
}
