//! Manager routes: the public `/v1` surface.
//!
//! Reads are proxied to the storage accessor with its `ETag` re-emitted.
//! Writes pull a full data set from the feed accessor and push it to the
//! storage accessor, streets in sequential chunks.

use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, Method},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use georef_core::{
    chunk, dispatch_sequentially, ChunkSink, DispatchReport, Fingerprint, Locality, Street,
    StreetBatch,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::conditional_json;
use crate::config::ConfigHandle;
use crate::error::{ApiError, ApiResult};
use crate::gateway::{
    GatewayError, InvocationContext, ServiceGateway, FEED_SERVICE, STORAGE_SERVICE,
};
use crate::middleware::RequestContext;

/// Answer when the feed accessor has nothing to ingest.
pub const PROVIDER_UNAVAILABLE_MESSAGE: &str =
    "Government provider unavailable or returned no data.";

#[derive(Clone)]
pub struct ManagerState {
    pub gateway: ServiceGateway,
    pub config: ConfigHandle,
}

impl ManagerState {
    pub fn new(gateway: ServiceGateway, config: ConfigHandle) -> Self {
        Self { gateway, config }
    }
}

/// Result of an ingestion run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestSummary {
    pub chunks_sent: usize,
    pub records_sent: usize,
}

impl From<DispatchReport> for IngestSummary {
    fn from(report: DispatchReport) -> Self {
        Self {
            chunks_sent: report.chunks_sent,
            records_sent: report.records_sent,
        }
    }
}

// ============================================================================
// READS
// ============================================================================

async fn proxy_read(
    state: &ManagerState,
    path: &str,
    headers: &HeaderMap,
    ctx: &RequestContext,
) -> ApiResult<Response> {
    let response = state
        .gateway
        .invoke(Method::GET, STORAGE_SERVICE, path, None, &ctx.invocation())
        .await?;
    let fingerprint = response
        .etag()
        .and_then(|etag| Fingerprint::from_header(&etag))
        .unwrap_or_else(|| Fingerprint::of_bytes(&response.body));
    Ok(conditional_json(headers, response.body, &fingerprint))
}

/// Storage path under one locality. The id travels as a single segment.
fn locality_path(locality_id: &str, suffix: &str) -> String {
    format!("/localities/{}{}", urlencoding::encode(locality_id), suffix)
}

/// GET /v1/localities
pub async fn list_localities(
    State(state): State<ManagerState>,
    ctx: RequestContext,
    headers: HeaderMap,
) -> ApiResult<Response> {
    proxy_read(&state, "/localities", &headers, &ctx).await
}

/// GET /v1/localities/:id
pub async fn get_locality(
    State(state): State<ManagerState>,
    Path(locality_id): Path<String>,
    ctx: RequestContext,
    headers: HeaderMap,
) -> ApiResult<Response> {
    proxy_read(&state, &locality_path(&locality_id, ""), &headers, &ctx).await
}

/// GET /v1/localities/:id/streets
pub async fn list_streets(
    State(state): State<ManagerState>,
    Path(locality_id): Path<String>,
    ctx: RequestContext,
    headers: HeaderMap,
) -> ApiResult<Response> {
    proxy_read(&state, &locality_path(&locality_id, "/streets"), &headers, &ctx).await
}

// ============================================================================
// INGESTION
// ============================================================================

/// Pull a full data set from the feed accessor. A feed 404 means it had
/// nothing, which is the same to the caller as an empty list.
async fn fetch_from_feed<T>(
    gateway: &ServiceGateway,
    path: &str,
    ctx: &InvocationContext,
) -> ApiResult<Vec<T>>
where
    T: serde::de::DeserializeOwned,
{
    match gateway.get_json::<Vec<T>>(FEED_SERVICE, path, ctx).await {
        Ok(fetched) if !fetched.value.is_empty() => Ok(fetched.value),
        Ok(_) | Err(GatewayError::NotFound { .. }) => {
            tracing::warn!(
                path,
                correlation_id = ctx.correlation_id.as_deref().unwrap_or(""),
                "Feed accessor returned no data"
            );
            Err(ApiError::service_unavailable(PROVIDER_UNAVAILABLE_MESSAGE))
        }
        Err(err) => Err(err.into()),
    }
}

/// POST /v1/localities
pub async fn ingest_localities(
    State(state): State<ManagerState>,
    ctx: RequestContext,
) -> ApiResult<Json<IngestSummary>> {
    let invocation = ctx.invocation();
    let localities: Vec<Locality> =
        fetch_from_feed(&state.gateway, "/geolocation", &invocation).await?;
    let records_sent = localities.len();

    state
        .gateway
        .post_json(STORAGE_SERVICE, "/localities", &localities, &invocation)
        .await?;

    tracing::info!(records_sent, "Localities ingested");
    Ok(Json(IngestSummary {
        chunks_sent: 1,
        records_sent,
    }))
}

/// Posts street chunks to the storage accessor.
struct StorageSink {
    gateway: ServiceGateway,
    correlation_id: Option<String>,
}

#[async_trait]
impl ChunkSink<Street> for StorageSink {
    type Error = GatewayError;

    async fn deliver(
        &self,
        index: usize,
        total: usize,
        chunk: Vec<Street>,
        update_timestamp: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<(), GatewayError> {
        let ctx = InvocationContext::new(self.correlation_id.clone(), cancel.clone());
        let batch = StreetBatch {
            streets: chunk,
            update_timestamp,
        };
        tracing::debug!(chunk = index + 1, total, "Posting street chunk");
        self.gateway
            .post_json(STORAGE_SERVICE, "/streets", &batch, &ctx)
            .await
    }
}

/// POST /v1/streets
pub async fn ingest_streets(
    State(state): State<ManagerState>,
    ctx: RequestContext,
) -> ApiResult<Json<IngestSummary>> {
    let update_timestamp = Utc::now();
    let chunk_size = state.config.snapshot().config.chunk_size;
    let invocation = ctx.invocation();

    let streets: Vec<Street> = fetch_from_feed(&state.gateway, "/streets", &invocation).await?;
    let chunks = chunk(streets, chunk_size);

    let sink = StorageSink {
        gateway: state.gateway.clone(),
        correlation_id: ctx.correlation_id.clone(),
    };
    let report = dispatch_sequentially(chunks, update_timestamp, &sink, &ctx.cancel).await?;

    tracing::info!(
        chunks_sent = report.chunks_sent,
        records_sent = report.records_sent,
        %update_timestamp,
        "Streets ingested"
    );
    Ok(Json(report.into()))
}

pub fn create_router(state: ManagerState) -> Router {
    Router::new()
        .route("/v1/localities", get(list_localities).post(ingest_localities))
        .route("/v1/localities/:id", get(get_locality))
        .route("/v1/localities/:id/streets", get(list_streets))
        .route("/v1/streets", post(ingest_streets))
        .with_state(state)
}
