use std::sync::Arc;

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
};
use serde::Serialize;
use tracing::{debug, info, warn};

use geoguard_core::{
    BatchKey, CaptureRequest, FinalizeError, ParsedFinalize, ScanReceipt,
    ScanRequest,
};

use crate::infra::{app_state::AppState, errors::AppResult};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureResponse {
    pub pending: bool,
    /// An earlier unconsumed capture for the operator was overwritten.
    pub replaced: bool,
}

/// `POST /api/scan` (and `/api/submit`).
pub async fn submit_scan_handler(
    State(state): State<AppState>,
    payload: Result<Json<ScanRequest>, JsonRejection>,
) -> AppResult<Json<ScanReceipt>> {
    let Json(request) = payload?;
    let scan = request.validate()?;
    let receipt = state.accumulator.submit(scan).await?;

    if receipt.capacity_reached && state.auto_finalize {
        spawn_auto_finalize(&state, receipt.key.clone());
    }

    Ok(Json(receipt))
}

/// `POST /api/capture`: holds a photo for the operator's next scan.
pub async fn capture_handler(
    State(state): State<AppState>,
    payload: Result<Json<CaptureRequest>, JsonRejection>,
) -> AppResult<Json<CaptureResponse>> {
    let Json(request) = payload?;
    let capture = request.validate()?;
    state
        .accumulator
        .validator()
        .check_operator(&capture.operator_id)?;

    let replaced = state
        .accumulator
        .pairing()
        .capture(&capture.operator_id, capture.image);
    debug!(operator = %capture.operator_id, replaced, "image captured");

    Ok(Json(CaptureResponse {
        pending: true,
        replaced,
    }))
}

fn spawn_auto_finalize(state: &AppState, key: BatchKey) {
    let pipeline = Arc::clone(&state.pipeline);
    tokio::spawn(async move {
        match pipeline.finalize(ParsedFinalize::for_key(key.clone())).await {
            Ok(outcome) => info!(
                key = %key,
                scans = outcome.scan_count,
                "auto-finalize completed"
            ),
            Err(FinalizeError::AlreadyProcessing { .. }) => {
                debug!(key = %key, "auto-finalize skipped; already running")
            }
            Err(err) => warn!(
                key = %key,
                code = %err.code(),
                error = %err,
                "auto-finalize failed"
            ),
        }
    });
}
