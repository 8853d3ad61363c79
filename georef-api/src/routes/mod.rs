//! REST API Routes Module
//!
//! One router per tier plus the routes every tier shares:
//! - Feed accessor: normalized government data
//! - Storage accessor: cached, fingerprinted reads and bulk writes
//! - Manager: public `/v1` surface orchestrating the other two
//! - Health, version and Prometheus metrics on every tier
//! - CORS support for browser-based clients

pub mod feed;
pub mod health;
pub mod manager;
pub mod storage;

use std::time::Duration;

use axum::{
    http::{header, header::HeaderName, HeaderMap, HeaderValue, Method, StatusCode},
    middleware::from_fn,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use georef_core::Fingerprint;
use tower_http::cors::{Any, CorsLayer};

use crate::config::GeorefConfig;
use crate::gateway::CORRELATION_HEADER;
use crate::middleware::{cancellation_middleware, correlation_middleware};
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

// Re-export route creation functions for convenience
pub use feed::create_router as feed_router;
pub use health::create_router as health_router;
pub use manager::create_router as manager_router;
pub use storage::create_router as storage_router;

/// Response header telling whether a read was served from the cache.
pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// Serve a JSON body under its fingerprint, or `304 Not Modified` with no
/// body when the request's `If-None-Match` already names it.
pub(crate) fn conditional_json(
    request_headers: &HeaderMap,
    body: Vec<u8>,
    fingerprint: &Fingerprint,
) -> Response {
    let not_modified = request_headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
        .map(|v| fingerprint.matches_if_none_match(v))
        .unwrap_or(false);

    let mut response = if not_modified {
        StatusCode::NOT_MODIFIED.into_response()
    } else {
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response()
    };
    if let Ok(etag) = HeaderValue::from_str(&fingerprint.header_value()) {
        response.headers_mut().insert(header::ETAG, etag);
    }
    response
}

/// Attach the shared routes and the middleware stack to a tier router.
///
/// Outermost first: CORS, observability span, request cancellation,
/// correlation id.
pub fn finish_router(tier_router: Router, state: AppState) -> Router {
    let cors = build_cors_layer(&state.config.snapshot().config);

    tier_router
        .merge(health_router(state))
        .route("/metrics", get(metrics_handler))
        .layer(from_fn(correlation_middleware))
        .layer(from_fn(cancellation_middleware))
        .layer(from_fn(observability_middleware))
        .layer(cors)
}

/// Build CORS layer based on configuration.
///
/// In development mode (no origins configured), allows all origins.
/// In production mode, only allows explicitly configured origins.
fn build_cors_layer(config: &GeorefConfig) -> CorsLayer {
    let correlation = HeaderName::from_static(CORRELATION_HEADER);
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .expose_headers([
            header::ETAG,
            correlation.clone(),
            HeaderName::from_static(CACHE_STATUS_HEADER),
        ])
        .max_age(Duration::from_secs(86400));

    if config.cors_origins.is_empty() {
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any).allow_headers(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        cors.allow_origin(origins).allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::IF_NONE_MATCH,
            correlation,
        ])
    }
}
