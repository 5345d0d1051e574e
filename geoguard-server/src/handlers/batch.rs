use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
};
use serde::Serialize;

use geoguard_core::{BatchKey, BatchStatus, FinalizeOutcome, FinalizeRequest};

use crate::infra::{
    app_state::AppState,
    errors::{AppError, AppResult},
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    #[serde(flatten)]
    pub outcome: FinalizeOutcome,
    pub batch_completed: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetResponse {
    pub key: BatchKey,
    pub reset: bool,
    /// Whether a batch existed before the reset.
    pub existed: bool,
}

/// `POST /api/finalize`
///
/// The run is detached from the request, so a client that hangs up
/// mid-delivery does not cancel it.
pub async fn finalize_handler(
    State(state): State<AppState>,
    payload: Result<Json<FinalizeRequest>, JsonRejection>,
) -> AppResult<Json<FinalizeResponse>> {
    let Json(request) = payload?;
    let parsed = request.validate()?;
    let pipeline = Arc::clone(&state.pipeline);
    let outcome = tokio::spawn(async move { pipeline.finalize(parsed).await })
        .await
        .map_err(|err| AppError::internal(format!("finalize task failed: {err}")))??;

    Ok(Json(FinalizeResponse {
        batch_completed: outcome.completed,
        outcome,
    }))
}

/// `GET /api/batches/{key}`
pub async fn batch_status_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> AppResult<Json<BatchStatus>> {
    let key = BatchKey::new(key)?;
    let status = state.accumulator.status(&key).await?;
    Ok(Json(status))
}

/// `DELETE /api/batches/{key}`: operator-initiated reset.
pub async fn reset_batch_handler(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> AppResult<Json<ResetResponse>> {
    let key = BatchKey::new(key)?;
    let existed = state.accumulator.reset(&key).await?;
    Ok(Json(ResetResponse {
        key,
        reset: true,
        existed,
    }))
}
