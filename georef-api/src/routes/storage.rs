//! Storage accessor routes.
//!
//! Reads are served through the tag-scoped response cache with a content
//! fingerprint as `ETag`; writes run the bulk upsert engine and invalidate
//! the matching cache tag. Generic over the document store so tests can
//! plug in a fault-injecting store.

use axum::{
    extract::{DefaultBodyLimit, Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::Response,
    routing::{get, post},
    Json, Router,
};
use georef_core::{CacheTag, EntityKind, GeoError, Locality, StreetBatch};
use georef_storage::{CacheStatus, CachedResponse, DocumentStore, GeolocationStore, WriteReport};

use super::{conditional_json, CACHE_STATUS_HEADER};
use crate::error::ApiResult;
use crate::middleware::RequestContext;
use crate::telemetry::METRICS;

/// Largest accepted write body. A full localities batch is well below this.
const MAX_WRITE_BODY_BYTES: usize = 32 * 1024 * 1024;

fn respond(
    headers: &HeaderMap,
    tag: CacheTag,
    (cached, status): (CachedResponse, CacheStatus),
) -> Response {
    if let Ok(metrics) = METRICS.as_ref() {
        metrics.record_cache_lookup(tag.as_str(), status.as_str());
    }
    let mut response = conditional_json(headers, cached.body, &cached.fingerprint);
    response
        .headers_mut()
        .insert(CACHE_STATUS_HEADER, HeaderValue::from_static(status.as_str()));
    response
}

fn record_write(entity: EntityKind, result: &Result<WriteReport, GeoError>) {
    let Ok(metrics) = METRICS.as_ref() else {
        return;
    };
    match result {
        Ok(report) => {
            metrics.record_upsert(
                entity.as_str(),
                report.outcome.succeeded_count,
                report.outcome.failed_ids.len(),
                report.outcome.cost_units,
            );
            metrics.record_eviction(report.eviction.tag.as_str(), report.eviction.evicted);
        }
        Err(GeoError::PartialUpsertFailure {
            failed_ids,
            committed,
            ..
        }) => {
            metrics.record_upsert(entity.as_str(), *committed, failed_ids.len(), 0.0);
        }
        Err(_) => {}
    }
}

// ============================================================================
// READS
// ============================================================================

/// GET /localities
pub async fn list_localities<S: DocumentStore + 'static>(
    State(service): State<GeolocationStore<S>>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let tag = CacheTag::Localities;
    let cached = service
        .cached(tag, "localities", || service.localities())
        .await?;
    Ok(respond(&headers, tag, cached))
}

/// GET /localities/:id
pub async fn get_locality<S: DocumentStore + 'static>(
    State(service): State<GeolocationStore<S>>,
    Path(locality_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let tag = CacheTag::Localities;
    let key = format!("locality:{}", locality_id);
    let cached = service
        .cached(tag, &key, || service.locality(&locality_id))
        .await?;
    Ok(respond(&headers, tag, cached))
}

/// GET /localities/:id/streets
pub async fn list_streets<S: DocumentStore + 'static>(
    State(service): State<GeolocationStore<S>>,
    Path(locality_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let tag = CacheTag::Streets;
    let key = format!("streets:{}", locality_id);
    let cached = service
        .cached(tag, &key, || service.streets_of(&locality_id))
        .await?;
    Ok(respond(&headers, tag, cached))
}

// ============================================================================
// WRITES
// ============================================================================

/// POST /localities
pub async fn upsert_localities<S: DocumentStore + 'static>(
    State(service): State<GeolocationStore<S>>,
    ctx: RequestContext,
    Json(localities): Json<Vec<Locality>>,
) -> ApiResult<StatusCode> {
    let result = service.upsert_localities(localities, &ctx.cancel).await;
    record_write(EntityKind::Locality, &result);
    result?;
    Ok(StatusCode::OK)
}

/// POST /streets
pub async fn upsert_streets<S: DocumentStore + 'static>(
    State(service): State<GeolocationStore<S>>,
    ctx: RequestContext,
    Json(batch): Json<StreetBatch>,
) -> ApiResult<StatusCode> {
    tracing::debug!(
        records = batch.streets.len(),
        update_timestamp = %batch.update_timestamp,
        "Received street chunk"
    );
    let result = service.upsert_streets(batch, &ctx.cancel).await;
    record_write(EntityKind::Street, &result);
    result?;
    Ok(StatusCode::OK)
}

pub fn create_router<S: DocumentStore + 'static>(service: GeolocationStore<S>) -> Router {
    Router::new()
        .route(
            "/localities",
            get(list_localities::<S>).post(upsert_localities::<S>),
        )
        .route("/localities/:id", get(get_locality::<S>))
        .route("/localities/:id/streets", get(list_streets::<S>))
        .route("/streets", post(upsert_streets::<S>))
        .layer(DefaultBodyLimit::max(MAX_WRITE_BODY_BYTES))
        .with_state(service)
}
