//! Error types for probed

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request body missing fields or malformed (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Store failure (500)
    #[error("Store error: {0}")]
    Store(#[from] probedb::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Store(ref err) => {
                tracing::warn!(error = %err, "Failed to store metric");
                (StatusCode::INTERNAL_SERVER_ERROR, "STORE_ERROR", err.to_string())
            }
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
