//! Government feed access.
//!
//! [`HttpFeedClient`] downloads raw open-data payloads with bounded retry;
//! [`GovernmentFeed`] resolves endpoints from the live configuration and
//! normalizes the payloads into localities and streets.
//!
//! An unavailable feed is not an error here: the client degrades to an empty
//! payload, which normalizes to no records, and the caller decides what an
//! empty result means.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use georef_core::{
    normalize_localities, normalize_streets, ConfigError, GeoError, GeoResult, Locality,
    Normalized, RetryPolicy, Retryable, Street,
};
use reqwest::StatusCode;
use tokio_util::sync::CancellationToken;

use crate::config::ConfigHandle;

/// Downloads raw feed payloads.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Body of `url`, or an empty string when the feed could not deliver.
    /// Fails only with [`GeoError::Canceled`].
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> GeoResult<String>;
}

#[derive(Debug)]
enum FetchError {
    Transient(String),
    Permanent(String),
    Canceled,
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::Transient(reason) => write!(f, "transient: {}", reason),
            FetchError::Permanent(reason) => write!(f, "permanent: {}", reason),
            FetchError::Canceled => f.write_str("canceled"),
        }
    }
}

impl Retryable for FetchError {
    fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    fn canceled() -> Self {
        FetchError::Canceled
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
}

/// `reqwest`-backed feed client.
///
/// Transport errors, 5xx/429/408 statuses and empty 200 bodies are retried
/// under the configured policy.
pub struct HttpFeedClient {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl HttpFeedClient {
    pub fn new(policy: RetryPolicy, timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "http_client".to_string(),
                value: format!("{:?}", timeout),
                reason: e.to_string(),
            })?;
        Ok(Self { client, policy })
    }

    async fn attempt(&self, url: &str, attempt: u32) -> Result<String, FetchError> {
        tracing::debug!(url, attempt, "Downloading feed payload");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let reason = format!("status {}", status.as_u16());
            return Err(if is_transient_status(status) {
                FetchError::Transient(reason)
            } else {
                FetchError::Permanent(reason)
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| FetchError::Transient(e.to_string()))?;
        if body.trim().is_empty() {
            return Err(FetchError::Transient("empty body".to_string()));
        }
        Ok(body)
    }
}

#[async_trait]
impl FeedClient for HttpFeedClient {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> GeoResult<String> {
        let result = self
            .policy
            .run(cancel, |attempt| self.attempt(url, attempt))
            .await;

        match result {
            Ok(body) => Ok(body),
            Err(FetchError::Canceled) => Err(GeoError::Canceled),
            Err(err) => {
                tracing::warn!(url, error = %err, "Feed download failed, using an empty payload");
                Ok(String::new())
            }
        }
    }
}

/// Normalized view of the government feed.
#[derive(Clone)]
pub struct GovernmentFeed {
    client: Arc<dyn FeedClient>,
    config: ConfigHandle,
}

impl GovernmentFeed {
    pub fn new(client: Arc<dyn FeedClient>, config: ConfigHandle) -> Self {
        Self { client, config }
    }

    pub async fn localities(&self, cancel: &CancellationToken) -> GeoResult<Vec<Locality>> {
        let snapshot = self.config.snapshot();
        let config = &snapshot.config;
        let url = config.feed_endpoint_url(&config.localities_endpoint);

        let payload = self.client.fetch(&url, cancel).await?;
        Ok(Self::accept(normalize_localities(&payload), "localities", &payload))
    }

    pub async fn streets(&self, cancel: &CancellationToken) -> GeoResult<Vec<Street>> {
        let snapshot = self.config.snapshot();
        let config = &snapshot.config;
        let url = config.feed_endpoint_url(&config.streets_endpoint);

        let payload = self.client.fetch(&url, cancel).await?;
        Ok(Self::accept(
            normalize_streets(&payload, &config.sentinel_street_id),
            "streets",
            &payload,
        ))
    }

    fn accept<T>(normalized: Normalized<T>, source: &str, payload: &str) -> Vec<T> {
        if payload.is_empty() {
            tracing::warn!(source, "Feed returned no payload");
            return Vec::new();
        }
        normalized.log_diagnostic(source);
        tracing::info!(
            source,
            records = normalized.records.len(),
            dropped = normalized.dropped,
            "Normalized feed payload"
        );
        normalized.records
    }
}
