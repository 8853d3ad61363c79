//! Tier Configuration Module
//!
//! Settings for retries, ingestion, caching, the government feed, peer
//! tiers, the document store and CORS. Loaded from `GEOREF_*` environment
//! variables with defaults suitable for a local deployment, and published
//! through a [`ConfigHandle`] so a reload swaps the whole snapshot at once.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use georef_core::{ConfigError, RetryPolicy, DEFAULT_CHUNK_SIZE, DEFAULT_SENTINEL_STREET_ID};
use georef_storage::CacheConfig;

// ============================================================================
// TIER
// ============================================================================

/// Which of the three services this process hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Feed,
    Storage,
    Manager,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Feed => "feed",
            Tier::Storage => "storage",
            Tier::Manager => "manager",
        }
    }

    /// Port used when neither `PORT` nor `GEOREF_PORT` is set.
    pub fn default_port(&self) -> u16 {
        match self {
            Tier::Manager => 3000,
            Tier::Storage => 3001,
            Tier::Feed => 3002,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "feed" => Ok(Tier::Feed),
            "storage" => Ok(Tier::Storage),
            "manager" => Ok(Tier::Manager),
            other => Err(ConfigError::InvalidValue {
                field: "GEOREF_TIER".to_string(),
                value: other.to_string(),
                reason: "expected one of feed, storage, manager".to_string(),
            }),
        }
    }
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Full configuration for every tier.
#[derive(Debug, Clone, PartialEq)]
pub struct GeorefConfig {
    // ========================================================================
    // Retry
    // ========================================================================
    /// Retries per record for store writes.
    pub retry_count: u32,

    /// Exclusive upper bound of retry jitter, in milliseconds.
    pub retry_jitter_ms: u64,

    /// Cap on the exponential part of store write backoff.
    pub retry_backoff_cap_secs: u64,

    /// Retries for government feed downloads.
    pub feed_retry_count: u32,

    // ========================================================================
    // Ingestion
    // ========================================================================
    /// Maximum streets per chunk sent from the manager to storage.
    pub chunk_size: usize,

    /// Street code the feed uses for "unknown street".
    pub sentinel_street_id: String,

    // ========================================================================
    // Response cache
    // ========================================================================
    pub cache_expiration_secs: u64,
    pub cache_max_entries: usize,

    /// Append a generation timestamp to issued fingerprints.
    pub fingerprint_timestamps: bool,

    // ========================================================================
    // Government feed
    // ========================================================================
    pub feed_base_url: String,
    pub localities_endpoint: String,
    pub streets_endpoint: String,

    // ========================================================================
    // Peer tiers
    // ========================================================================
    pub storage_url: String,
    pub feed_url: String,

    /// Timeout for any single outbound HTTP request.
    pub request_timeout_secs: u64,

    // ========================================================================
    // Document store
    // ========================================================================
    /// `memory` or `lmdb`.
    pub store_backend: String,
    pub store_path: String,
    pub store_max_size_mb: usize,

    // ========================================================================
    // CORS
    // ========================================================================
    /// Allowed CORS origins. Empty means allow all origins (dev mode).
    pub cors_origins: Vec<String>,
}

impl Default for GeorefConfig {
    fn default() -> Self {
        Self {
            retry_count: 5,
            retry_jitter_ms: 100,
            retry_backoff_cap_secs: 8,
            feed_retry_count: 3,

            chunk_size: DEFAULT_CHUNK_SIZE,
            sentinel_street_id: DEFAULT_SENTINEL_STREET_ID.to_string(),

            cache_expiration_secs: 120,
            cache_max_entries: 10_000,
            fingerprint_timestamps: false,

            feed_base_url: "https://data.gov.il/api/3/action/".to_string(),
            localities_endpoint: "localities".to_string(),
            streets_endpoint: "streets".to_string(),

            storage_url: "http://localhost:3001".to_string(),
            feed_url: "http://localhost:3002".to_string(),
            request_timeout_secs: 30,

            store_backend: "memory".to_string(),
            store_path: "./data/georef".to_string(),
            store_max_size_mb: 1024,

            cors_origins: Vec::new(),
        }
    }
}

impl GeorefConfig {
    /// Create GeorefConfig from environment variables.
    ///
    /// Environment variables (unparseable values fall back to the default):
    /// - `GEOREF_RETRY_COUNT` (default: 5)
    /// - `GEOREF_RETRY_JITTER_MS` (default: 100)
    /// - `GEOREF_RETRY_BACKOFF_CAP_SECS` (default: 8)
    /// - `GEOREF_FEED_RETRY_COUNT` (default: 3)
    /// - `GEOREF_CHUNK_SIZE` (default: 1000)
    /// - `GEOREF_SENTINEL_STREET_ID` (default: "9000")
    /// - `GEOREF_CACHE_EXPIRATION_SECS` (default: 120)
    /// - `GEOREF_CACHE_MAX_ENTRIES` (default: 10000)
    /// - `GEOREF_FINGERPRINT_TIMESTAMPS`: "true" or "false" (default: false)
    /// - `GEOREF_FEED_BASE_URL`, `GEOREF_FEED_LOCALITIES_ENDPOINT`,
    ///   `GEOREF_FEED_STREETS_ENDPOINT`
    /// - `GEOREF_STORAGE_URL`, `GEOREF_FEED_URL`: peer tier base URLs
    /// - `GEOREF_REQUEST_TIMEOUT_SECS` (default: 30)
    /// - `GEOREF_STORE_BACKEND`, `GEOREF_STORE_PATH`, `GEOREF_STORE_MAX_SIZE_MB`
    /// - `GEOREF_CORS_ORIGINS`: comma-separated allowed origins
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup, then validate it.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let text = |key: &str, default: String| {
            lookup(key)
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(default)
        };

        let fingerprint_timestamps = lookup("GEOREF_FINGERPRINT_TIMESTAMPS")
            .map(|s| s.to_lowercase() == "true")
            .unwrap_or(defaults.fingerprint_timestamps);

        let cors_origins = lookup("GEOREF_CORS_ORIGINS")
            .map(|s| {
                s.split(',')
                    .map(|o| o.trim().to_string())
                    .filter(|o| !o.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let config = Self {
            retry_count: parse_or(&lookup, "GEOREF_RETRY_COUNT", defaults.retry_count),
            retry_jitter_ms: parse_or(&lookup, "GEOREF_RETRY_JITTER_MS", defaults.retry_jitter_ms),
            retry_backoff_cap_secs: parse_or(&lookup, "GEOREF_RETRY_BACKOFF_CAP_SECS", defaults.retry_backoff_cap_secs),
            feed_retry_count: parse_or(&lookup, "GEOREF_FEED_RETRY_COUNT", defaults.feed_retry_count),

            chunk_size: parse_or(&lookup, "GEOREF_CHUNK_SIZE", defaults.chunk_size),
            sentinel_street_id: text("GEOREF_SENTINEL_STREET_ID", defaults.sentinel_street_id),

            cache_expiration_secs: parse_or(&lookup, "GEOREF_CACHE_EXPIRATION_SECS", defaults.cache_expiration_secs),
            cache_max_entries: parse_or(&lookup, "GEOREF_CACHE_MAX_ENTRIES", defaults.cache_max_entries),
            fingerprint_timestamps,

            feed_base_url: text("GEOREF_FEED_BASE_URL", defaults.feed_base_url),
            localities_endpoint: text(
                "GEOREF_FEED_LOCALITIES_ENDPOINT",
                defaults.localities_endpoint,
            ),
            streets_endpoint: text("GEOREF_FEED_STREETS_ENDPOINT", defaults.streets_endpoint),

            storage_url: text("GEOREF_STORAGE_URL", defaults.storage_url),
            feed_url: text("GEOREF_FEED_URL", defaults.feed_url),
            request_timeout_secs: parse_or(&lookup, "GEOREF_REQUEST_TIMEOUT_SECS", defaults.request_timeout_secs),

            store_backend: text("GEOREF_STORE_BACKEND", defaults.store_backend).to_lowercase(),
            store_path: text("GEOREF_STORE_PATH", defaults.store_path),
            store_max_size_mb: parse_or(&lookup, "GEOREF_STORE_MAX_SIZE_MB", defaults.store_max_size_mb),

            cors_origins,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject values no tier can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(invalid("GEOREF_CHUNK_SIZE", "0", "must be at least 1"));
        }
        if self.cache_max_entries == 0 {
            return Err(invalid("GEOREF_CACHE_MAX_ENTRIES", "0", "must be at least 1"));
        }
        if !matches!(self.store_backend.as_str(), "memory" | "lmdb") {
            return Err(invalid(
                "GEOREF_STORE_BACKEND",
                &self.store_backend,
                "expected memory or lmdb",
            ));
        }
        for (field, url) in [
            ("GEOREF_FEED_BASE_URL", &self.feed_base_url),
            ("GEOREF_STORAGE_URL", &self.storage_url),
            ("GEOREF_FEED_URL", &self.feed_url),
        ] {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(invalid(field, url, "expected an http(s) URL"));
            }
        }
        Ok(())
    }

    /// Retry policy for per-record store writes.
    pub fn store_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::store_writes()
            .with_max_retries(self.retry_count)
            .with_jitter_max_ms(self.retry_jitter_ms)
            .with_backoff_cap(Duration::from_secs(self.retry_backoff_cap_secs))
    }

    /// Retry policy for government feed downloads.
    pub fn feed_retry_policy(&self) -> RetryPolicy {
        RetryPolicy::feed_downloads()
            .with_max_retries(self.feed_retry_count)
            .with_jitter_max_ms(self.retry_jitter_ms)
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig::new()
            .with_expiration(Duration::from_secs(self.cache_expiration_secs))
            .with_max_entries(self.cache_max_entries)
    }

    /// Full URL of a feed endpoint under the configured base URL.
    pub fn feed_endpoint_url(&self, endpoint: &str) -> String {
        format!(
            "{}/{}",
            self.feed_base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        )
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

// ============================================================================
// LIVE HANDLE
// ============================================================================

/// A published configuration plus its reload generation.
#[derive(Debug)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub config: GeorefConfig,
}

/// Shared, atomically swappable configuration.
///
/// Request handlers take one [`snapshot`](Self::snapshot) at the start of a
/// request and use it throughout, so a reload never changes settings under
/// a request that is already running.
#[derive(Clone)]
pub struct ConfigHandle {
    current: Arc<ArcSwap<ConfigSnapshot>>,
}

impl ConfigHandle {
    pub fn new(config: GeorefConfig) -> Self {
        Self {
            current: Arc::new(ArcSwap::from_pointee(ConfigSnapshot { version: 1, config })),
        }
    }

    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current.load_full()
    }

    pub fn version(&self) -> u64 {
        self.current.load().version
    }

    /// Publish `config` as the next version. Returns the new version.
    pub fn replace(&self, config: GeorefConfig) -> u64 {
        let previous = self.current.rcu(|current| ConfigSnapshot {
            version: current.version + 1,
            config: config.clone(),
        });
        previous.version + 1
    }

    /// Re-read the environment and publish the result if it validates.
    /// An invalid environment leaves the current snapshot in place.
    pub fn reload_from_env(&self) -> Result<u64, ConfigError> {
        let config = GeorefConfig::from_env()?;
        let version = self.replace(config);
        tracing::info!(version, "Configuration reloaded");
        Ok(version)
    }
}

impl fmt::Debug for ConfigHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigHandle")
            .field("version", &self.version())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = GeorefConfig::default();
        assert_eq!(config.retry_count, 5);
        assert_eq!(config.retry_jitter_ms, 100);
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.cache_expiration_secs, 120);
        assert_eq!(config.sentinel_street_id, "9000");
        assert!(!config.fingerprint_timestamps);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_lookup_overrides_and_fallbacks() -> Result<(), ConfigError> {
        let config = GeorefConfig::from_lookup(lookup(&[
            ("GEOREF_CHUNK_SIZE", "250"),
            ("GEOREF_RETRY_COUNT", "not-a-number"),
            ("GEOREF_FINGERPRINT_TIMESTAMPS", "TRUE"),
            ("GEOREF_CORS_ORIGINS", "https://a.example, ,https://b.example"),
        ]))?;
        assert_eq!(config.chunk_size, 250);
        assert_eq!(config.retry_count, 5);
        assert!(config.fingerprint_timestamps);
        assert_eq!(config.cors_origins.len(), 2);
        Ok(())
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let result = GeorefConfig::from_lookup(lookup(&[("GEOREF_CHUNK_SIZE", "0")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        let result = GeorefConfig::from_lookup(lookup(&[("GEOREF_STORE_BACKEND", "cosmos")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));

        let result = GeorefConfig::from_lookup(lookup(&[("GEOREF_STORAGE_URL", "storage:3001")]));
        assert!(matches!(result, Err(ConfigError::InvalidValue { .. })));
    }

    #[test]
    fn test_retry_policies_follow_config() {
        let config = GeorefConfig {
            retry_count: 2,
            retry_jitter_ms: 0,
            ..GeorefConfig::default()
        };
        let policy = config.store_retry_policy();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.jitter_max_ms, 0);
        assert_eq!(config.feed_retry_policy().max_retries, 3);
    }

    #[test]
    fn test_feed_endpoint_url_joins_slashes() {
        let config = GeorefConfig::default();
        assert_eq!(
            config.feed_endpoint_url("/localities"),
            "https://data.gov.il/api/3/action/localities"
        );
    }

    #[test]
    fn test_tier_parsing() {
        assert_eq!("Manager".parse::<Tier>().ok(), Some(Tier::Manager));
        assert!("gateway".parse::<Tier>().is_err());
        assert_eq!(Tier::Storage.default_port(), 3001);
    }

    #[test]
    fn test_handle_replace_bumps_version() {
        let handle = ConfigHandle::new(GeorefConfig::default());
        let before = handle.snapshot();
        let version = handle.replace(GeorefConfig {
            chunk_size: 10,
            ..GeorefConfig::default()
        });
        assert_eq!(version, 2);
        assert_eq!(before.config.chunk_size, 1000);
        assert_eq!(handle.snapshot().config.chunk_size, 10);
    }
}
