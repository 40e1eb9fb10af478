//! Error types for mdm-hub
//!
//! Every handler failure is rendered as `{"error": {"code", "message"}}`.

use crate::pipeline::PipelineError;
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
    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Every inference endpoint is unhealthy (503); the batch may be retried
    #[error("Inference backend unavailable: {0}")]
    BackendUnavailable(String),

    /// Upstream dependency unreachable (502)
    #[error("Upstream error: {0}")]
    BadGateway(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::InvalidRequest(msg) => ApiError::BadRequest(msg),
            unavailable @ PipelineError::BackendUnavailable { .. } => {
                ApiError::BackendUnavailable(unavailable.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::BackendUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "BACKEND_UNAVAILABLE", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "BAD_GATEWAY", msg),
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
