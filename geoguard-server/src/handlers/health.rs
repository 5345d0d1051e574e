use axum::{Json, response::IntoResponse};
use chrono::Utc;
use serde_json::json;

pub async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "geoguard",
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
