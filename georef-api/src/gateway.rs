//! Cross-service invocation gateway.
//!
//! The manager reaches the feed and storage tiers only through
//! [`ServiceGateway`], which sends requests over a pluggable
//! [`RemoteTransport`], forwards the inbound correlation id and turns peer
//! statuses into [`GatewayError`] variants. The gateway never retries.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderValue, Method};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::telemetry::METRICS;

/// Header carrying the request correlation id across tiers.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// Logical id of the storage accessor.
pub const STORAGE_SERVICE: &str = "storage";

/// Logical id of the feed accessor.
pub const FEED_SERVICE: &str = "feed";

/// Longest slice of a peer's error body kept in an error.
const BODY_EXCERPT_LEN: usize = 256;

// ============================================================================
// TRANSPORT
// ============================================================================

/// One outbound request, addressed by logical service id.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub service_id: String,
    pub path: String,
    pub body: Option<Vec<u8>>,
    pub headers: HeaderMap,
}

/// A peer's raw answer.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn etag(&self) -> Option<String> {
        self.headers
            .get(header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("No endpoint registered for service {0}")]
    ServiceNotFound(String),

    #[error("Transport failure: {0}")]
    Failed(String),
}

/// Moves requests to peer tiers.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// HTTP transport resolving service ids to configured base URLs.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoints: HashMap<String, String>,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Failed(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoints: HashMap::new(),
        })
    }

    pub fn with_endpoint(mut self, service_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        self.endpoints.insert(service_id.into(), base_url.into());
        self
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        let base = self
            .endpoints
            .get(&request.service_id)
            .ok_or_else(|| TransportError::ServiceNotFound(request.service_id.clone()))?;
        let url = format!(
            "{}/{}",
            base.trim_end_matches('/'),
            request.path.trim_start_matches('/')
        );

        let mut builder = self
            .client
            .request(request.method, url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))?
            .to_vec();

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

// ============================================================================
// GATEWAY
// ============================================================================

/// Per-request context threaded through every peer call.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    pub correlation_id: Option<String>,
    pub cancel: CancellationToken,
}

impl InvocationContext {
    pub fn new(correlation_id: Option<String>, cancel: CancellationToken) -> Self {
        Self {
            correlation_id,
            cancel,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum GatewayError {
    #[error("{service_id} has nothing at {path}")]
    NotFound { service_id: String, path: String },

    #[error("{service_id} rejected part of a bulk write")]
    UpsertFailed {
        service_id: String,
        /// The peer's decoded error body, if it was JSON.
        details: Option<Value>,
    },

    #[error("Invocation of {service_id} {path} failed (status {status:?}): {reason}")]
    InvocationFailed {
        service_id: String,
        path: String,
        status: Option<u16>,
        reason: String,
    },

    #[error("Invocation canceled")]
    Canceled,
}

impl GatewayError {
    fn outcome(&self) -> &'static str {
        match self {
            GatewayError::NotFound { .. } => "not_found",
            GatewayError::UpsertFailed { .. } => "upsert_failed",
            GatewayError::InvocationFailed { .. } => "failed",
            GatewayError::Canceled => "canceled",
        }
    }
}

/// A decoded peer response plus its validation token, if it sent one.
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    pub etag: Option<String>,
}

/// Typed client for peer tiers.
#[derive(Clone)]
pub struct ServiceGateway {
    transport: Arc<dyn RemoteTransport>,
}

impl ServiceGateway {
    pub fn new(transport: Arc<dyn RemoteTransport>) -> Self {
        Self { transport }
    }

    /// Send one request and classify the peer's answer.
    pub async fn invoke(
        &self,
        method: Method,
        service_id: &str,
        path: &str,
        body: Option<Vec<u8>>,
        ctx: &InvocationContext,
    ) -> Result<TransportResponse, GatewayError> {
        if ctx.cancel.is_cancelled() {
            return Err(GatewayError::Canceled);
        }

        let mut headers = HeaderMap::new();
        if let Some(value) = ctx
            .correlation_id
            .as_deref()
            .and_then(|id| HeaderValue::from_str(id).ok())
        {
            headers.insert(CORRELATION_HEADER, value);
        }

        let is_write = method == Method::POST || method == Method::PUT;
        let request = TransportRequest {
            method,
            service_id: service_id.to_string(),
            path: path.to_string(),
            body,
            headers,
        };

        let start = Instant::now();
        let sent = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => Err(GatewayError::Canceled),
            sent = self.transport.send(request) => Ok(sent),
        };
        let result = sent.and_then(|sent| classify(service_id, path, is_write, sent));

        let outcome = match &result {
            Ok(_) => "success",
            Err(err) => err.outcome(),
        };
        if let Ok(metrics) = METRICS.as_ref() {
            metrics.record_gateway_call(service_id, outcome, start.elapsed().as_secs_f64());
        }
        if let Err(err) = &result {
            tracing::warn!(
                service_id,
                path,
                correlation_id = ctx.correlation_id.as_deref().unwrap_or(""),
                error = %err,
                "Peer invocation did not succeed"
            );
        }
        result
    }

    /// GET `path` from `service_id` and decode the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        service_id: &str,
        path: &str,
        ctx: &InvocationContext,
    ) -> Result<Fetched<T>, GatewayError> {
        let response = self.invoke(Method::GET, service_id, path, None, ctx).await?;
        let value = serde_json::from_slice(&response.body).map_err(|e| {
            GatewayError::InvocationFailed {
                service_id: service_id.to_string(),
                path: path.to_string(),
                status: Some(response.status),
                reason: format!("Undecodable response body: {}", e),
            }
        })?;
        Ok(Fetched {
            value,
            etag: response.etag(),
        })
    }

    /// POST `body` as JSON to `service_id`.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        service_id: &str,
        path: &str,
        body: &B,
        ctx: &InvocationContext,
    ) -> Result<(), GatewayError> {
        let bytes = serde_json::to_vec(body).map_err(|e| GatewayError::InvocationFailed {
            service_id: service_id.to_string(),
            path: path.to_string(),
            status: None,
            reason: format!("Failed to encode request body: {}", e),
        })?;
        self.invoke(Method::POST, service_id, path, Some(bytes), ctx)
            .await
            .map(|_| ())
    }
}

fn classify(
    service_id: &str,
    path: &str,
    is_write: bool,
    sent: Result<TransportResponse, TransportError>,
) -> Result<TransportResponse, GatewayError> {
    let response = match sent {
        Ok(response) => response,
        Err(TransportError::ServiceNotFound(_)) => {
            return Err(GatewayError::NotFound {
                service_id: service_id.to_string(),
                path: path.to_string(),
            })
        }
        Err(TransportError::Failed(reason)) => {
            return Err(GatewayError::InvocationFailed {
                service_id: service_id.to_string(),
                path: path.to_string(),
                status: None,
                reason,
            })
        }
    };

    match response.status {
        _ if response.is_success() => Ok(response),
        404 => Err(GatewayError::NotFound {
            service_id: service_id.to_string(),
            path: path.to_string(),
        }),
        400 if is_write => Err(GatewayError::UpsertFailed {
            service_id: service_id.to_string(),
            details: serde_json::from_slice(&response.body).ok(),
        }),
        status => Err(GatewayError::InvocationFailed {
            service_id: service_id.to_string(),
            path: path.to_string(),
            status: Some(status),
            reason: excerpt(&response.body),
        }),
    }
}

fn excerpt(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .chars()
        .take(BODY_EXCERPT_LEN)
        .collect()
}
