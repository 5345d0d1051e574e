use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderValue, Method, header},
    routing::{get, post},
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use geoguard_config::CorsConfig;
use geoguard_core::batch::pairing::MAX_IMAGE_BYTES;

use crate::handlers::{batch, health, scan};
use crate::infra::app_state::AppState;

/// Body limit for requests carrying at most one image: the base64 form of
/// `MAX_IMAGE_BYTES` plus room for the surrounding JSON.
pub const SCAN_BODY_LIMIT: usize = MAX_IMAGE_BYTES.div_ceil(3) * 4 + 64 * 1024;

/// A finalize request may carry every scan of a full batch, each with an
/// image.
pub fn finalize_body_limit(capacity: u32) -> usize {
    SCAN_BODY_LIMIT.saturating_mul(capacity.max(1) as usize)
}

/// API routes, without middleware.
pub fn create_api_router(capacity: u32) -> Router<AppState> {
    let scan_limit = DefaultBodyLimit::max(SCAN_BODY_LIMIT);
    Router::new()
        .route(
            "/scan",
            post(scan::submit_scan_handler).layer(scan_limit),
        )
        .route(
            "/submit",
            post(scan::submit_scan_handler).layer(scan_limit),
        )
        .route("/capture", post(scan::capture_handler).layer(scan_limit))
        .route(
            "/finalize",
            post(batch::finalize_handler)
                .layer(DefaultBodyLimit::max(finalize_body_limit(capacity))),
        )
        .route(
            "/batches/{key}",
            get(batch::batch_status_handler).delete(batch::reset_batch_handler),
        )
}

/// The full application: liveness routes, the `/api` tree, CORS and
/// request tracing.
pub fn create_app(state: AppState, cors: &CorsConfig) -> Router {
    let capacity = state.accumulator.capacity();
    Router::new()
        .route("/", get(health::health_handler))
        .route("/health", get(health::health_handler))
        .nest("/api", create_api_router(capacity))
        .layer(build_cors_layer(cors))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    let allow_origin = if cors.is_wildcard_included() {
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = cors
            .allowed_origins
            .iter()
            .filter_map(|origin| HeaderValue::from_str(origin.trim()).ok())
            .collect();
        if origins.is_empty() {
            AllowOrigin::any()
        } else {
            AllowOrigin::list(origins)
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode, header},
    };
    use tower::ServiceExt;

    use geoguard_core::{
        BatchAccumulator, CleanupManager, DeliveryService, FinalizePipeline,
        ImagePairing, InMemoryBatchStore, OpenRegistry, ScanValidator,
        SmtpTransport, StaticCredentials,
    };

    use super::*;

    fn state() -> AppState {
        let accumulator = Arc::new(BatchAccumulator::new(
            Arc::new(InMemoryBatchStore::new()),
            ScanValidator::new(Arc::new(OpenRegistry), 3),
            Arc::new(ImagePairing::new()),
        ));
        let delivery = Arc::new(DeliveryService::new(
            Arc::new(SmtpTransport::new("smtp.invalid", 465)),
            Arc::new(StaticCredentials::missing()),
            None,
            false,
        ));
        let pipeline = Arc::new(FinalizePipeline::new(
            accumulator,
            delivery,
            CleanupManager::default(),
        ));
        AppState::new(pipeline, false)
    }

    fn cors(origins: &[&str]) -> CorsConfig {
        CorsConfig {
            allowed_origins: origins.iter().map(|o| o.to_string()).collect(),
        }
    }

    #[tokio::test]
    async fn wildcard_cors_allows_any_origin() {
        let app = create_app(state(), &cors(&["*"]));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, "http://scanner.local")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }

    #[tokio::test]
    async fn listed_origin_is_echoed() {
        let app = create_app(state(), &cors(&["http://scanner.local"]));

        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/scan")
                    .header(header::ORIGIN, "http://scanner.local")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://scanner.local"
        );
    }

    #[test]
    fn body_limits_admit_the_largest_image() {
        assert!(SCAN_BODY_LIMIT > MAX_IMAGE_BYTES / 3 * 4);
        assert!(SCAN_BODY_LIMIT > 2 * 1024 * 1024);
        assert_eq!(finalize_body_limit(0), SCAN_BODY_LIMIT);
        assert_eq!(finalize_body_limit(3), 3 * SCAN_BODY_LIMIT);
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let app = create_app(state(), &cors(&["*"]));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/nope")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
