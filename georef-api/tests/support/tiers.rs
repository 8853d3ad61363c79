#![allow(dead_code)]
//! In-process wiring of all three tiers.
//!
//! The manager's gateway talks to the feed and storage routers through
//! [`RouterTransport`], which drives them with `oneshot` instead of a
//! socket. The feed tier reads canned payloads and the storage tier writes
//! to a [`FlakyStore`] so tests can inject write failures.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use georef_api::{
    feed_router, finish_router, manager_router, storage_router, AppState, ConfigHandle,
    FeedClient, GeorefConfig, GovernmentFeed, ManagerState, Peers, RemoteTransport,
    ServiceGateway, Tier, TransportError, TransportRequest, TransportResponse,
    CORRELATION_HEADER, FEED_SERVICE, STORAGE_SERVICE,
};
use georef_core::{GeoError, GeoResult, RetryPolicy};
use georef_storage::{CacheController, DocumentStore, GeolocationStore, InMemoryResponseCache};
use georef_test_utils::FlakyStore;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

pub const CORRELATION_ID: &str = "3b241101-e2bb-4255-8caf-4136c566a962";

/// Store write policy with millisecond backoff.
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy::store_writes()
        .with_unit(Duration::from_millis(1))
        .with_backoff_cap(Duration::from_millis(4))
        .with_jitter_max_ms(0)
}

// ============================================================================
// TRANSPORT
// ============================================================================

/// Dispatches gateway requests to in-process routers by service id.
#[derive(Default)]
pub struct RouterTransport {
    routers: HashMap<String, Router>,
    seen: Mutex<Vec<TransportRequest>>,
}

impl RouterTransport {
    pub fn with_service(mut self, service_id: &str, router: Router) -> Self {
        self.routers.insert(service_id.to_string(), router);
        self
    }

    /// Every request sent so far, in order.
    pub fn requests(&self) -> Vec<TransportRequest> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }

    /// Requests sent to `service_id` at `path`.
    pub fn requests_to(&self, service_id: &str, path: &str) -> Vec<TransportRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.service_id == service_id && r.path == path)
            .collect()
    }
}

#[async_trait]
impl RemoteTransport for RouterTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(request.clone());
        }
        let router = self
            .routers
            .get(&request.service_id)
            .cloned()
            .ok_or_else(|| TransportError::ServiceNotFound(request.service_id.clone()))?;

        let mut builder = Request::builder()
            .method(request.method)
            .uri(request.path.as_str());
        for (name, value) in request.headers.iter() {
            builder = builder.header(name, value);
        }
        if request.body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        let inbound = builder
            .body(Body::from(request.body.unwrap_or_default()))
            .map_err(|e| TransportError::Failed(e.to_string()))?;

        let response = router
            .oneshot(inbound)
            .await
            .unwrap_or_else(|never| match never {});
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
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
// FEED
// ============================================================================

/// Feed client serving canned payloads, chosen by endpoint.
#[derive(Default)]
pub struct StaticFeedClient {
    localities: Mutex<String>,
    streets: Mutex<String>,
}

impl StaticFeedClient {
    pub fn new(localities: String, streets: String) -> Self {
        Self {
            localities: Mutex::new(localities),
            streets: Mutex::new(streets),
        }
    }

    pub fn set_streets(&self, payload: String) {
        if let Ok(mut streets) = self.streets.lock() {
            *streets = payload;
        }
    }
}

#[async_trait]
impl FeedClient for StaticFeedClient {
    async fn fetch(&self, url: &str, cancel: &CancellationToken) -> GeoResult<String> {
        if cancel.is_cancelled() {
            return Err(GeoError::Canceled);
        }
        let source = if url.ends_with("streets") {
            &self.streets
        } else {
            &self.localities
        };
        Ok(source.lock().map(|p| p.clone()).unwrap_or_default())
    }
}

// ============================================================================
// TIERS
// ============================================================================

pub fn storage_tier<S: DocumentStore + 'static>(store: Arc<S>, config: &GeorefConfig) -> Router {
    let cache = InMemoryResponseCache::new(config.cache_config());
    let controller = CacheController::new(Arc::new(cache));
    let service = GeolocationStore::new(store, fast_policy(), controller)
        .with_timestamp_fingerprints(config.fingerprint_timestamps);
    finish_router(
        storage_router(service),
        AppState::new(Tier::Storage, ConfigHandle::new(config.clone()), Peers::none()),
    )
}

pub fn feed_tier(client: Arc<StaticFeedClient>, config: &GeorefConfig) -> Router {
    let handle = ConfigHandle::new(config.clone());
    let feed = GovernmentFeed::new(client, handle.clone());
    finish_router(
        feed_router(feed),
        AppState::new(Tier::Feed, handle, Peers::none()),
    )
}

/// All three tiers wired together.
pub struct Cluster {
    pub manager: Router,
    pub store: Arc<FlakyStore>,
    pub feed: Arc<StaticFeedClient>,
    pub transport: Arc<RouterTransport>,
    pub config: ConfigHandle,
}

impl Cluster {
    pub fn new(config: GeorefConfig, feed: StaticFeedClient) -> Self {
        let store = Arc::new(FlakyStore::new());
        let feed = Arc::new(feed);
        let transport = Arc::new(
            RouterTransport::default()
                .with_service(STORAGE_SERVICE, storage_tier(store.clone(), &config))
                .with_service(FEED_SERVICE, feed_tier(feed.clone(), &config)),
        );
        let gateway = ServiceGateway::new(transport.clone());
        let handle = ConfigHandle::new(config);
        let peers = Peers::new(
            gateway.clone(),
            vec![STORAGE_SERVICE.to_string(), FEED_SERVICE.to_string()],
        );
        let manager = finish_router(
            manager_router(ManagerState::new(gateway, handle.clone())),
            AppState::new(Tier::Manager, handle.clone(), peers),
        );
        Self {
            manager,
            store,
            feed,
            transport,
            config: handle,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        send(&self.manager, request).await
    }
}

// ============================================================================
// REQUESTS
// ============================================================================

pub async fn send(router: &Router, request: Request<Body>) -> Response {
    router
        .clone()
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {})
}

pub fn get(path: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header(CORRELATION_HEADER, CORRELATION_ID)
        .body(Body::empty())
        .unwrap_or_default()
}

pub fn get_if_none_match(path: &str, etag: &str) -> Request<Body> {
    Request::builder()
        .uri(path)
        .header(CORRELATION_HEADER, CORRELATION_ID)
        .header(header::IF_NONE_MATCH, etag)
        .body(Body::empty())
        .unwrap_or_default()
}

pub fn post(path: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(CORRELATION_HEADER, CORRELATION_ID)
        .body(Body::empty())
        .unwrap_or_default()
}

pub fn post_json(path: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path)
        .header(CORRELATION_HEADER, CORRELATION_ID)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap_or_default()
}

pub fn header_of(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

pub async fn body_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap_or_default();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

/// Status and decoded body in one step.
pub async fn status_and_json(response: Response) -> (StatusCode, Value) {
    let status = response.status();
    (status, body_json(response).await)
}
