//! Error handling
//!
//! One `AppError` enum mapped to the error kinds of the control-plane
//! contract: `InvalidArgument`, `Unauthenticated`, `PermissionDenied`,
//! `NotFound`, `FailedPrecondition`, `RateLimited`, `Internal`.

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub enum AppError {
    /// Malformed JSON, out-of-range values.
    InvalidArgument(String),

    /// Missing/expired access token, bad refresh.
    Unauthenticated(String),

    /// Token/agent mismatch, exhausted/revoked registration token,
    /// terminal-command mutation.
    PermissionDenied(String),

    /// Agent/command/update ID unknown.
    NotFound(String),

    /// Illegal state transition, duplicate registration.
    FailedPrecondition(String),

    /// Admission control rejected the request; `retry_after_secs` feeds
    /// the `Retry-After` header.
    RateLimited { retry_after_secs: u64 },

    /// Store failure or other unexpected condition.
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::InvalidArgument(msg) => (StatusCode::BAD_REQUEST, msg.as_str()),
            AppError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg.as_str()),
            AppError::PermissionDenied(msg) => (StatusCode::FORBIDDEN, msg.as_str()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.as_str()),
            AppError::FailedPrecondition(msg) => (StatusCode::CONFLICT, msg.as_str()),
            AppError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "rate limited"),
            AppError::Internal(msg) => {
                tracing::error!("internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
        };

        let body = Json(json!({
            "error": message,
            "status": status.as_u16(),
        }));

        let mut response = (status, body).into_response();

        if let AppError::RateLimited { retry_after_secs } = &self {
            let headers = response.headers_mut();
            insert_header(headers, "Retry-After", retry_after_secs.to_string());
        }

        response
    }
}

fn insert_header(headers: &mut HeaderMap, name: &'static str, value: String) {
    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(name, value);
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(_: jsonwebtoken::errors::Error) -> Self {
        AppError::Unauthenticated("invalid access token".to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::InvalidArgument(err.to_string())
    }
}
