//! Batch processing endpoint

use axum::{
    extract::{rejection::JsonRejection, State},
    routing::post,
    Json, Router,
};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::pipeline::{BatchRequest, BatchResponse};
use crate::AppState;

/// POST /mdm/process
///
/// Malformed bodies are reported as 400 with the extractor's message.
pub async fn process_batch(
    State(state): State<AppState>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> ApiResult<Json<BatchResponse>> {
    let Json(request) = payload.map_err(|rejection| ApiError::BadRequest(rejection.body_text()))?;

    let response = state.coordinator.process(request).await?;
    info!(
        batch_id = %response.batch_id,
        clusters = response.clusters.len(),
        issues = response.issues.len(),
        "Batch processed"
    );
    Ok(Json(response))
}

pub fn process_routes() -> Router<AppState> {
    Router::new().route("/mdm/process", post(process_batch))
}
