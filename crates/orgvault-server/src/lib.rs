//! `OrgVault` HTTP server.
//!
//! Wires the core stores, the storage backend and the HTTP routes into an
//! Axum application. The binary in `main.rs` adds configuration, logging,
//! seeding and graceful shutdown around [`build_router`].

pub mod config;
pub mod error;
pub mod extract;
pub mod middleware;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderValue;
use axum::middleware as axum_mw;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::middleware::auth_middleware;
use crate::state::AppState;

/// Concurrent login / registration requests. Both hash a secret.
const AUTH_CONCURRENCY_LIMIT: usize = 32;

/// Assemble every route area, the auth gate and the response layers.
pub fn build_router(state: Arc<AppState>) -> Router {
    // Everything here needs a valid bearer token.
    let authenticated_routes = Router::new()
        .nest("/user", routes::user::router())
        .nest("/hierarchy", routes::hierarchy::router())
        .nest("/assignment", routes::assignment::router())
        .nest("/credentials", routes::credentials::router())
        .route_layer(axum_mw::from_fn_with_state(
            Arc::clone(&state),
            auth_middleware,
        ));

    // Concurrency-limit register/login to bound hashing work.
    let login_routes = Router::new()
        .nest("/user", routes::user::public_router())
        .layer(tower::limit::ConcurrencyLimitLayer::new(AUTH_CONCURRENCY_LIMIT));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            axum::http::Method::GET,
            axum::http::Method::POST,
            axum::http::Method::PUT,
        ])
        .allow_headers([
            axum::http::header::CONTENT_TYPE,
            axum::http::header::AUTHORIZATION,
        ]);

    Router::new()
        .merge(login_routes)
        .nest("/hierarchy", routes::hierarchy::public_router())
        .nest("/sys", routes::sys::router())
        .merge(authenticated_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .with_state(state)
}
