//! Prometheus Metrics Definitions
//!
//! Defines all georef metrics with appropriate labels and types.
//! Exposes a /metrics endpoint for Prometheus scraping.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Peer call latency buckets (seconds). Feed downloads can take a while.
const GATEWAY_LATENCY_BUCKETS: &[f64] =
    &[0.005, 0.025, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<GeorefMetrics>> = Lazy::new(GeorefMetrics::new);

/// Container for all georef metrics.
#[derive(Clone)]
pub struct GeorefMetrics {
    /// HTTP request counter - labels: method, path, status
    pub http_requests_total: CounterVec,

    /// HTTP request duration histogram - labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    /// Records written by bulk upserts - labels: entity, outcome (committed/failed)
    pub upsert_records_total: CounterVec,

    /// Store cost units charged for committed writes - labels: entity
    pub store_cost_units_total: CounterVec,

    /// Cache tag evictions - labels: tag, result (evicted/skipped)
    pub cache_evictions_total: CounterVec,

    /// Cached read lookups - labels: tag, result (hit/miss)
    pub cache_lookups_total: CounterVec,

    /// Peer invocations - labels: target, outcome
    pub gateway_calls_total: CounterVec,

    /// Peer invocation duration - labels: target
    pub gateway_call_duration_seconds: HistogramVec,
}

impl GeorefMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "georef_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "georef_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e)))?,

            upsert_records_total: register_counter_vec!(
                "georef_upsert_records_total",
                "Records processed by bulk upserts",
                &["entity", "outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register upsert_records_total: {}", e)))?,

            store_cost_units_total: register_counter_vec!(
                "georef_store_cost_units_total",
                "Store cost units charged for committed writes",
                &["entity"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register store_cost_units_total: {}", e)))?,

            cache_evictions_total: register_counter_vec!(
                "georef_cache_evictions_total",
                "Cache tag eviction requests",
                &["tag", "result"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache_evictions_total: {}", e)))?,

            cache_lookups_total: register_counter_vec!(
                "georef_cache_lookups_total",
                "Cached read lookups",
                &["tag", "result"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cache_lookups_total: {}", e)))?,

            gateway_calls_total: register_counter_vec!(
                "georef_gateway_calls_total",
                "Invocations of peer tiers",
                &["target", "outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register gateway_calls_total: {}", e)))?,

            gateway_call_duration_seconds: register_histogram_vec!(
                "georef_gateway_call_duration_seconds",
                "Peer invocation duration in seconds",
                &["target"],
                GATEWAY_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register gateway_call_duration_seconds: {}", e)))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// Record the result of one bulk upsert.
    pub fn record_upsert(&self, entity: &str, committed: usize, failed: usize, cost_units: f64) {
        self.upsert_records_total
            .with_label_values(&[entity, "committed"])
            .inc_by(committed as f64);
        self.upsert_records_total
            .with_label_values(&[entity, "failed"])
            .inc_by(failed as f64);
        self.store_cost_units_total
            .with_label_values(&[entity])
            .inc_by(cost_units.max(0.0));
    }

    /// Record an eviction request against a cache tag.
    pub fn record_eviction(&self, tag: &str, evicted: bool) {
        let result = if evicted { "evicted" } else { "skipped" };
        self.cache_evictions_total
            .with_label_values(&[tag, result])
            .inc();
    }

    /// Record a cached read.
    pub fn record_cache_lookup(&self, tag: &str, result: &str) {
        self.cache_lookups_total
            .with_label_values(&[tag, result])
            .inc();
    }

    /// Record a peer invocation.
    pub fn record_gateway_call(&self, target: &str, outcome: &str, duration_secs: f64) {
        self.gateway_calls_total
            .with_label_values(&[target, outcome])
            .inc();
        self.gateway_call_duration_seconds
            .with_label_values(&[target])
            .observe(duration_secs);
    }
}

/// Handler for GET /metrics endpoint.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::core::Collector;

    #[test]
    fn test_metrics_creation() -> Result<(), String> {
        // Force initialization
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        assert!(!metrics.http_requests_total.desc().is_empty());
        Ok(())
    }

    #[test]
    fn test_record_upsert_counts_both_outcomes() -> Result<(), String> {
        let metrics = METRICS
            .as_ref()
            .map_err(|e| format!("Metrics init failed: {}", e.message))?;
        let committed = metrics
            .upsert_records_total
            .with_label_values(&["TestEntity", "committed"]);
        let failed = metrics
            .upsert_records_total
            .with_label_values(&["TestEntity", "failed"]);
        let (before_ok, before_failed) = (committed.get(), failed.get());

        metrics.record_upsert("TestEntity", 3, 1, 12.5);

        assert_eq!(committed.get() - before_ok, 3.0);
        assert_eq!(failed.get() - before_failed, 1.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_metrics_handler_renders_text() {
        if let Ok(metrics) = METRICS.as_ref() {
            metrics.record_eviction("localities", true);
        }
        let response = metrics_handler().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
