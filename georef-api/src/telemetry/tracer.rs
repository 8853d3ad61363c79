//! Tracing Subscriber Initialization
//!
//! Installs a JSON `tracing-subscriber` filtered by `RUST_LOG`, falling back
//! to a per-tier default filter.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::error::{ApiError, ApiResult};

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name stamped on the startup event
    pub service_name: String,
    /// Service version
    pub service_version: String,
    /// Environment (production, staging, development)
    pub environment: String,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: std::env::var("GEOREF_SERVICE_NAME")
                .unwrap_or_else(|_| "georef-api".to_string()),
            service_version: std::env::var("GEOREF_SERVICE_VERSION")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            environment: std::env::var("GEOREF_ENVIRONMENT")
                .unwrap_or_else(|_| "development".to_string()),
            default_filter: std::env::var("GEOREF_LOG_FILTER").unwrap_or_else(|_| {
                "georef_api=debug,georef_storage=info,georef_core=info,tower_http=debug,info"
                    .to_string()
            }),
        }
    }
}

impl TelemetryConfig {
    /// Name the service after the tier it hosts.
    pub fn for_service(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = service_name.into();
        self
    }
}

/// Initialize the tracing subscriber.
///
/// Must be called once at startup, before any tracing occurs.
pub fn init_tracer(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().json())
        .try_init()
        .map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = config.service_name,
        service_version = config.service_version,
        environment = config.environment,
        "Telemetry initialized"
    );

    Ok(())
}
