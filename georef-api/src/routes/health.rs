//! Health and Version Endpoints
//!
//! Every tier serves:
//! - /health - Aggregate check (peer tiers included on the manager)
//! - /liveness - Process alive check
//! - /readiness - Same checks as /health
//! - /version - Build information, plus each peer's on the manager
//!
//! No correlation id is required for these endpoints.

use std::collections::BTreeMap;
use std::time::Instant;

use axum::{
    extract::State, http::Method, http::StatusCode, response::IntoResponse, routing::get, Json,
    Router,
};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};

use crate::config::{ConfigHandle, Tier};
use crate::gateway::{InvocationContext, ServiceGateway};
use crate::middleware::RequestContext;
use crate::state::{AppState, Peers};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// One named check contributing to the overall status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub tier: String,
    pub uptime_seconds: u64,
    pub config_version: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub checks: Vec<ComponentHealth>,
    pub duration_ms: u64,
}

/// Build information of one service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub version: String,
    pub commit: String,
    pub build_time: String,
}

impl VersionInfo {
    /// Read `VERSION`, `GIT_COMMIT` and `BUILD_TIME`.
    pub fn from_env() -> Self {
        Self {
            version: std::env::var("VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            commit: std::env::var("GIT_COMMIT").unwrap_or_else(|_| "unknown".to_string()),
            build_time: std::env::var("BUILD_TIME").unwrap_or_else(|_| "unknown".to_string()),
        }
    }
}

/// Version response: this service's build plus each peer's, `null` when a
/// peer could not be asked.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionResponse {
    pub tier: String,
    #[serde(flatten)]
    pub info: VersionInfo,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub peers: BTreeMap<String, Option<VersionInfo>>,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /liveness - Process liveness check
pub async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": HealthStatus::Healthy })))
}

/// GET /health and /readiness
pub async fn health(
    State(tier): State<Tier>,
    State(start_time): State<Instant>,
    State(config): State<ConfigHandle>,
    State(peers): State<Peers>,
    ctx: RequestContext,
) -> impl IntoResponse {
    let started = Instant::now();
    let checks = match &peers.gateway {
        Some(gateway) => check_peers(gateway, &peers.services, &ctx.invocation()).await,
        None => Vec::new(),
    };

    let overall = if checks.iter().all(|c| c.status == HealthStatus::Healthy) {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    };

    let response = HealthResponse {
        status: overall,
        tier: tier.to_string(),
        uptime_seconds: start_time.elapsed().as_secs(),
        config_version: config.version(),
        checks,
        duration_ms: started.elapsed().as_millis() as u64,
    };

    let status_code = if overall == HealthStatus::Healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(response))
}

/// GET /version
pub async fn version(
    State(tier): State<Tier>,
    State(peers): State<Peers>,
    ctx: RequestContext,
) -> impl IntoResponse {
    let mut peer_versions = BTreeMap::new();
    if let Some(gateway) = &peers.gateway {
        let invocation = ctx.invocation();
        let lookups = peers.services.iter().map(|service| {
            let invocation = &invocation;
            async move {
                let info = gateway
                    .get_json::<VersionInfo>(service, "/version", invocation)
                    .await
                    .map(|fetched| fetched.value)
                    .ok();
                (service.clone(), info)
            }
        });
        peer_versions.extend(join_all(lookups).await);
    }

    Json(VersionResponse {
        tier: tier.to_string(),
        info: VersionInfo::from_env(),
        peers: peer_versions,
    })
}

async fn check_peers(
    gateway: &ServiceGateway,
    services: &[String],
    ctx: &InvocationContext,
) -> Vec<ComponentHealth> {
    let checks = services.iter().map(|service| async move {
        let start = Instant::now();
        match gateway
            .invoke(Method::GET, service, "/health", None, ctx)
            .await
        {
            Ok(_) => ComponentHealth {
                name: service.clone(),
                status: HealthStatus::Healthy,
                latency_ms: Some(start.elapsed().as_millis() as u64),
                error: None,
            },
            Err(err) => ComponentHealth {
                name: service.clone(),
                status: HealthStatus::Unhealthy,
                latency_ms: None,
                error: Some(err.to_string()),
            },
        }
    });
    join_all(checks).await
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the health and version router shared by every tier.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/readiness", get(health))
        .route("/liveness", get(liveness))
        .route("/version", get(version))
        .with_state(state)
}
