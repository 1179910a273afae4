//! Hierarchy routes: `/hierarchy/*`
//!
//! Listing and lookup are public and leave out credential id sets.
//! Creating OUs and divisions, editing descriptions and rebuilding
//! reference sets require admin.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post, put};
use axum::{Extension, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orgvault_core::vault::ReconcileReport;
use orgvault_core::{Division, DivisionId, OrganizationalUnit, OuId, Role};

use crate::error::AppError;
use crate::extract::{Json, Path};
use crate::middleware::AuthContext;
use crate::state::AppState;

/// Build the public `/hierarchy` router.
pub fn public_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ous", get(list_ous))
        .route("/ous/{id}", get(get_ou))
        .route("/ous/{id}/divisions", get(list_divisions_in_ou))
        .route("/divisions", get(list_divisions))
        .route("/divisions/{id}", get(get_division))
}

/// Build the authenticated `/hierarchy` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ou", post(create_ou))
        .route("/division", post(create_division))
        .route("/ous/{id}/description", put(update_ou_description))
        .route("/divisions/{id}/description", put(update_division_description))
        .route("/reconcile", post(reconcile))
}

// ── Request / Response types ─────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateOuRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateDivisionRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub ou: OuId,
}

#[derive(Debug, Deserialize)]
pub struct DescriptionRequest {
    pub description: String,
}

/// Public shape of an OU.
#[derive(Debug, Serialize)]
pub struct OuView {
    pub id: OuId,
    pub name: String,
    pub description: String,
    pub divisions: BTreeSet<DivisionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<OrganizationalUnit> for OuView {
    fn from(ou: OrganizationalUnit) -> Self {
        Self {
            id: ou.id,
            name: ou.name,
            description: ou.description,
            divisions: ou.divisions,
            created_at: ou.created_at,
            updated_at: ou.updated_at,
        }
    }
}

/// Public shape of a division.
#[derive(Debug, Serialize)]
pub struct DivisionView {
    pub id: DivisionId,
    pub name: String,
    pub description: String,
    pub ou: OuId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Division> for DivisionView {
    fn from(division: Division) -> Self {
        Self {
            id: division.id,
            name: division.name,
            description: division.description,
            ou: division.ou,
            created_at: division.created_at,
            updated_at: division.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OusResponse {
    pub ous: Vec<OuView>,
}

#[derive(Debug, Serialize)]
pub struct DivisionsResponse {
    pub divisions: Vec<DivisionView>,
}

impl From<Vec<Division>> for DivisionsResponse {
    fn from(divisions: Vec<Division>) -> Self {
        Self {
            divisions: divisions.into_iter().map(DivisionView::from).collect(),
        }
    }
}

// ── Public handlers ──────────────────────────────────────────────────

async fn list_ous(State(state): State<Arc<AppState>>) -> Result<Json<OusResponse>, AppError> {
    let ous = state.hierarchy.list_ous().await?;
    Ok(Json(OusResponse {
        ous: ous.into_iter().map(OuView::from).collect(),
    }))
}

async fn get_ou(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OuId>,
) -> Result<Json<OuView>, AppError> {
    Ok(Json(state.hierarchy.get_ou(id).await?.into()))
}

async fn list_divisions_in_ou(
    State(state): State<Arc<AppState>>,
    Path(id): Path<OuId>,
) -> Result<Json<DivisionsResponse>, AppError> {
    let divisions = state.hierarchy.list_divisions_in_ou(id).await?;
    Ok(Json(divisions.into()))
}

async fn list_divisions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DivisionsResponse>, AppError> {
    let divisions = state.hierarchy.list_divisions().await?;
    Ok(Json(divisions.into()))
}

async fn get_division(
    State(state): State<Arc<AppState>>,
    Path(id): Path<DivisionId>,
) -> Result<Json<DivisionView>, AppError> {
    Ok(Json(state.hierarchy.get_division(id).await?.into()))
}

// ── Admin handlers ───────────────────────────────────────────────────

async fn create_ou(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<CreateOuRequest>,
) -> Result<(StatusCode, Json<OrganizationalUnit>), AppError> {
    ctx.require(Role::Admin)?;
    let ou = state.hierarchy.create_ou(&body.name, &body.description).await?;
    Ok((StatusCode::CREATED, Json(ou)))
}

async fn create_division(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Json(body): Json<CreateDivisionRequest>,
) -> Result<(StatusCode, Json<Division>), AppError> {
    ctx.require(Role::Admin)?;
    let division = state
        .hierarchy
        .create_division(&body.name, &body.description, body.ou)
        .await?;
    Ok((StatusCode::CREATED, Json(division)))
}

async fn update_ou_description(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<OuId>,
    Json(body): Json<DescriptionRequest>,
) -> Result<Json<OrganizationalUnit>, AppError> {
    ctx.require(Role::Admin)?;
    Ok(Json(
        state
            .hierarchy
            .update_ou_description(id, &body.description)
            .await?,
    ))
}

async fn update_division_description(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
    Path(id): Path<DivisionId>,
    Json(body): Json<DescriptionRequest>,
) -> Result<Json<Division>, AppError> {
    ctx.require(Role::Admin)?;
    Ok(Json(
        state
            .hierarchy
            .update_division_description(id, &body.description)
            .await?,
    ))
}

/// Rebuild every credential and division reference set.
async fn reconcile(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<AuthContext>,
) -> Result<Json<ReconcileReport>, AppError> {
    ctx.require(Role::Admin)?;
    Ok(Json(state.vault.reconcile().await?))
}
