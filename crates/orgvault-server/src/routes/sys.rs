//! System routes: `/sys/*`

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use serde::Serialize;

use crate::extract::Json;
use crate::state::AppState;

/// Build the `/sys` router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health))
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
