//! HTTP error types for the `OrgVault` server.
//!
//! Maps domain errors from `orgvault-core` into HTTP responses through their
//! [`ErrorKind`]. Every error produces a JSON body with a machine-readable
//! `error` field and a human-readable `message`.

use std::fmt::Display;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use orgvault_core::error::{
    AuthError, ErrorKind, HierarchyError, IdentityError, RoleError, SeedError, VaultError,
};

/// Application-level error returned from HTTP handlers.
#[derive(Debug)]
pub enum AppError {
    /// Client sent invalid input.
    BadRequest(String),
    /// Missing, invalid or expired session token.
    Unauthenticated(String),
    /// Login credentials did not match.
    Unauthorized(String),
    /// Role or membership is insufficient.
    Forbidden(String),
    /// Requested resource not found.
    NotFound(String),
    /// A uniqueness conflict (e.g., username or division name taken).
    Conflict(String),
    /// Internal server error. The detail is logged, never returned.
    Internal(String),
}

/// JSON error response body.
#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl AppError {
    /// Classify a domain error by its taxonomy kind.
    pub fn from_kind(kind: ErrorKind, err: &impl Display) -> Self {
        let message = err.to_string();
        match kind {
            ErrorKind::Validation => Self::BadRequest(message),
            ErrorKind::Unauthenticated => Self::Unauthenticated(message),
            ErrorKind::Unauthorized => Self::Unauthorized(message),
            ErrorKind::Forbidden => Self::Forbidden(message),
            ErrorKind::NotFound => Self::NotFound(message),
            ErrorKind::Conflict => Self::Conflict(message),
            ErrorKind::Internal => Self::Internal(message),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            Self::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, "unauthenticated", msg),
            Self::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            Self::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            Self::Internal(detail) => {
                error!(error = %detail, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "internal server error".to_owned(),
                )
            }
        };

        let body = ErrorBody {
            error: error_type,
            message,
        };

        (status, axum::Json(body)).into_response()
    }
}

macro_rules! from_domain_error {
    ($($err:ty),+ $(,)?) => {
        $(
            impl From<$err> for AppError {
                fn from(err: $err) -> Self {
                    Self::from_kind(err.kind(), &err)
                }
            }
        )+
    };
}

from_domain_error!(
    AuthError,
    HierarchyError,
    IdentityError,
    RoleError,
    SeedError,
    VaultError,
);

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgvault_core::Role;

    #[test]
    fn kinds_map_to_statuses() {
        let cases = [
            (ErrorKind::Validation, StatusCode::BAD_REQUEST),
            (ErrorKind::Unauthenticated, StatusCode::UNAUTHORIZED),
            (ErrorKind::Unauthorized, StatusCode::UNAUTHORIZED),
            (ErrorKind::Forbidden, StatusCode::FORBIDDEN),
            (ErrorKind::NotFound, StatusCode::NOT_FOUND),
            (ErrorKind::Conflict, StatusCode::CONFLICT),
            (ErrorKind::Internal, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (kind, status) in cases {
            let response = AppError::from_kind(kind, &"x").into_response();
            assert_eq!(response.status(), status, "{kind:?}");
        }
    }

    #[test]
    fn role_errors_keep_their_kind() {
        let err: AppError = RoleError::Insufficient {
            required: Role::Admin,
            actual: Role::Normal,
        }
        .into();
        assert!(matches!(err, AppError::Forbidden(_)));
    }
}
