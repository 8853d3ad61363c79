//! georef API Server Entry Point
//!
//! Selects the tier from the first argument or `GEOREF_TIER`, loads the
//! configuration from the environment and starts the Axum HTTP server.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use georef_api::telemetry::{init_tracer, TelemetryConfig};
use georef_api::{
    feed_router, finish_router, manager_router, storage_router, ApiError, ApiResult, AppState,
    ConfigHandle, GeorefConfig, GovernmentFeed, HttpFeedClient, HttpTransport, ManagerState,
    Peers, ServiceGateway, Tier, FEED_SERVICE, STORAGE_SERVICE,
};
use georef_storage::{
    CacheController, DocumentStore, GeolocationStore, InMemoryResponseCache, StoreBackend,
};

#[tokio::main]
async fn main() -> ApiResult<()> {
    let tier = resolve_tier()?;

    let telemetry_config = TelemetryConfig::default().for_service(format!("georef-{}", tier));
    init_tracer(&telemetry_config)?;

    let config = GeorefConfig::from_env()?;
    let handle = ConfigHandle::new(config);

    let app = build_app(tier, &handle).await?;

    #[cfg(unix)]
    spawn_reload_on_sighup(handle.clone());

    let addr = resolve_bind_addr(tier)?;
    tracing::info!(%addr, %tier, "Starting georef server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| ApiError::internal_error(format!("Failed to bind {}: {}", addr, e)))?;

    let server = axum::serve(listener, app);
    tokio::select! {
        result = server => {
            result.map_err(|e| ApiError::internal_error(format!("Server error: {}", e)))?;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    Ok(())
}

async fn build_app(tier: Tier, handle: &ConfigHandle) -> ApiResult<Router> {
    let config = handle.snapshot().config.clone();

    let (tier_router, peers) = match tier {
        Tier::Feed => {
            let client = HttpFeedClient::new(config.feed_retry_policy(), config.request_timeout())?;
            let feed = GovernmentFeed::new(Arc::new(client), handle.clone());
            (feed_router(feed), Peers::none())
        }
        Tier::Storage => {
            let backend = match config.store_backend.as_str() {
                "lmdb" => StoreBackend::lmdb(&config.store_path, config.store_max_size_mb)
                    .map_err(|e| {
                        ApiError::internal_error(format!("Failed to open LMDB store: {}", e))
                    })?,
                _ => StoreBackend::memory(),
            };
            backend.initialize().await.map_err(|e| {
                ApiError::internal_error(format!("Failed to initialize store: {}", e))
            })?;
            tracing::info!(backend = backend.kind(), "Document store ready");

            let cache = InMemoryResponseCache::new(config.cache_config());
            let controller = CacheController::new(Arc::new(cache));
            let service =
                GeolocationStore::new(Arc::new(backend), config.store_retry_policy(), controller)
                    .with_timestamp_fingerprints(config.fingerprint_timestamps);
            (storage_router(service), Peers::none())
        }
        Tier::Manager => {
            let transport = HttpTransport::new(config.request_timeout())
                .map_err(|e| ApiError::internal_error(e.to_string()))?
                .with_endpoint(STORAGE_SERVICE, config.storage_url.clone())
                .with_endpoint(FEED_SERVICE, config.feed_url.clone());
            let gateway = ServiceGateway::new(Arc::new(transport));
            let peers = Peers::new(
                gateway.clone(),
                vec![STORAGE_SERVICE.to_string(), FEED_SERVICE.to_string()],
            );
            let state = ManagerState::new(gateway, handle.clone());
            (manager_router(state), peers)
        }
    };

    Ok(finish_router(
        tier_router,
        AppState::new(tier, handle.clone(), peers),
    ))
}

/// Re-read the environment into the live configuration on every SIGHUP.
#[cfg(unix)]
fn spawn_reload_on_sighup(handle: ConfigHandle) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "SIGHUP handler unavailable, config reload disabled");
            return;
        }
    };
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            match handle.reload_from_env() {
                Ok(version) => tracing::info!(version, "Configuration reloaded"),
                Err(e) => tracing::warn!(error = %e, "Configuration reload rejected"),
            }
        }
    });
}

fn resolve_tier() -> ApiResult<Tier> {
    let raw = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GEOREF_TIER").ok())
        .unwrap_or_else(|| Tier::Manager.as_str().to_string());
    Ok(raw.parse::<Tier>()?)
}

fn resolve_bind_addr(tier: Tier) -> ApiResult<SocketAddr> {
    let host = std::env::var("GEOREF_BIND").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port_str = std::env::var("PORT")
        .ok()
        .or_else(|| std::env::var("GEOREF_PORT").ok())
        .unwrap_or_else(|| tier.default_port().to_string());
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ApiError::invalid_input(format!("Invalid port value: {}", port_str)))?;

    let addr = format!("{}:{}", host, port);
    addr.parse::<SocketAddr>()
        .map_err(|e| ApiError::invalid_input(format!("Invalid bind address {}: {}", addr, e)))
}
