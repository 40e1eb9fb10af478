//! Inference backend diagnostics

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;
use tracing::warn;

use crate::dispatcher::EndpointStatus;
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub endpoint: String,
    /// HTTP status returned by the endpoint's model listing
    pub status: u16,
}

/// GET /llm/ping
///
/// 502 when the first configured endpoint cannot be reached.
pub async fn ping(State(state): State<AppState>) -> ApiResult<Json<PingResponse>> {
    let (endpoint, result) = state.pool.ping().await;
    match result {
        Ok(status) => Ok(Json(PingResponse { endpoint, status })),
        Err(e) => {
            warn!(endpoint = %endpoint, error = %e, "Inference endpoint unreachable");
            Err(ApiError::BadGateway(format!("{}: {}", endpoint, e)))
        }
    }
}

/// GET /llm/endpoints
pub async fn endpoints(State(state): State<AppState>) -> Json<Vec<EndpointStatus>> {
    Json(state.pool.health_snapshot())
}

pub fn llm_routes() -> Router<AppState> {
    Router::new()
        .route("/llm/ping", get(ping))
        .route("/llm/endpoints", get(endpoints))
}
