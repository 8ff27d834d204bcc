//! HTTP error envelope (spec §7 "User-visible behavior"): every failure path
//! out of a handler is mapped to `{error:{kind,message,retryable}}` plus the
//! status code spec §7 assigns to that error kind.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use agent_memory_core::{CoreError, EmbedError, RecallError, StoreError, ValidationError};

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    kind: &'static str,
    message: String,
    retryable: bool,
}

/// Adapter-local error: wraps core errors plus the adapter's own auth/rate
/// limit/validation failures (spec §7: `AuthError`/`RateLimitError` never
/// originate in the core).
#[derive(Debug)]
pub enum ApiError {
    Core(CoreError),
    Recall(RecallError),
    Auth(String),
    RateLimit,
    BadRequest(String),
    NotFound(String),
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        ApiError::Core(e)
    }
}

impl From<RecallError> for ApiError {
    fn from(e: RecallError) -> Self {
        ApiError::Recall(e)
    }
}

impl From<ValidationError> for ApiError {
    fn from(e: ValidationError) -> Self {
        ApiError::Core(CoreError::Validation(e))
    }
}

fn core_status_kind(e: &CoreError) -> (StatusCode, &'static str, bool) {
    match e {
        CoreError::Config(_) => (StatusCode::INTERNAL_SERVER_ERROR, "ConfigError", false),
        CoreError::Store(StoreError::NotFound(_)) => (StatusCode::NOT_FOUND, "StoreError", false),
        CoreError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "StoreError", true),
        CoreError::Embed(EmbedError::CircuitOpen) => (StatusCode::SERVICE_UNAVAILABLE, "EmbedError", true),
        CoreError::Embed(EmbedError::Transient(_)) => (StatusCode::BAD_GATEWAY, "EmbedError", true),
        CoreError::Embed(_) => (StatusCode::BAD_GATEWAY, "EmbedError", false),
        CoreError::Validation(_) => (StatusCode::BAD_REQUEST, "ValidationError", false),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, retryable, message) = match self {
            ApiError::Core(e) => {
                let (status, kind, retryable) = core_status_kind(&e);
                (status, kind, retryable, e.to_string())
            }
            ApiError::Recall(RecallError::Timeout) => {
                (StatusCode::GATEWAY_TIMEOUT, "TimeoutError", true, "recall deadline exceeded".to_string())
            }
            ApiError::Recall(RecallError::Core(e)) => {
                let (status, kind, retryable) = core_status_kind(&e);
                (status, kind, retryable, e.to_string())
            }
            ApiError::Auth(message) => (StatusCode::UNAUTHORIZED, "AuthError", false, message),
            ApiError::RateLimit => (StatusCode::TOO_MANY_REQUESTS, "RateLimitError", true, "rate limit exceeded".to_string()),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, "ValidationError", false, message),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, "StoreError", false, message),
        };

        (status, Json(ErrorBody { error: ErrorDetail { kind, message, retryable } })).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
