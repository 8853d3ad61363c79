//! Storage accessor service.
//!
//! Glues the document store, the bulk upsert engine and the cache controller
//! into the operations the storage tier exposes: fingerprinted cached reads
//! and bulk writes followed by cache invalidation.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use georef_core::{
    CacheTag, EntityKind, Fingerprint, GeoError, GeoResult, Locality, LocalityDto, RetryPolicy,
    StoreError, Street, StreetBatch, StreetDto, UpsertOutcome,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::bulk::BulkUpsertEngine;
use crate::cache::{CacheController, CachedResponse, Eviction};
use crate::store::{DocumentStore, QueryFilter};

/// Outcome of a bulk write plus what it did to the cache.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteReport {
    pub outcome: UpsertOutcome,
    pub eviction: Eviction,
}

/// Where a read response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
        }
    }
}

/// The storage tier's domain service.
pub struct GeolocationStore<S> {
    engine: BulkUpsertEngine<S>,
    controller: CacheController,
    timestamp_fingerprints: bool,
}

impl<S> Clone for GeolocationStore<S> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine.clone(),
            controller: self.controller.clone(),
            timestamp_fingerprints: self.timestamp_fingerprints,
        }
    }
}

impl<S: DocumentStore> GeolocationStore<S> {
    pub fn new(store: Arc<S>, policy: RetryPolicy, controller: CacheController) -> Self {
        Self {
            engine: BulkUpsertEngine::new(store, policy),
            controller,
            timestamp_fingerprints: false,
        }
    }

    /// Append a generation timestamp to every fingerprint this service issues.
    pub fn with_timestamp_fingerprints(mut self, enabled: bool) -> Self {
        self.timestamp_fingerprints = enabled;
        self
    }

    pub fn controller(&self) -> &CacheController {
        &self.controller
    }

    pub fn store(&self) -> &Arc<S> {
        self.engine.store()
    }

    // ========================================================================
    // READS
    // ========================================================================

    /// Every stored locality, ordered by locality id.
    pub async fn localities(&self) -> GeoResult<Vec<LocalityDto>> {
        let localities: Vec<Locality> = self.store().query(&QueryFilter::All).await?;
        if localities.is_empty() {
            return Err(GeoError::not_found(EntityKind::Locality, "*"));
        }
        Ok(localities.iter().map(LocalityDto::from).collect())
    }

    pub async fn locality(&self, locality_id: &str) -> GeoResult<LocalityDto> {
        let found: Option<Locality> = self.store().read(locality_id, locality_id).await?;
        found
            .as_ref()
            .map(LocalityDto::from)
            .ok_or_else(|| GeoError::not_found(EntityKind::Locality, locality_id))
    }

    /// Streets of one locality, ordered by street id.
    pub async fn streets_of(&self, locality_id: &str) -> GeoResult<Vec<StreetDto>> {
        let streets: Vec<Street> = self
            .store()
            .query(&QueryFilter::Partition(locality_id.to_string()))
            .await?;
        if streets.is_empty() {
            return Err(GeoError::not_found(EntityKind::Street, locality_id));
        }
        Ok(streets.iter().map(StreetDto::from).collect())
    }

    /// Serve `key` from the cache under `tag`, or run `load`, serialize and
    /// fingerprint its result and cache it.
    ///
    /// The tag generation is captured before `load` runs; if the tag is
    /// evicted meanwhile the fresh response is returned but not cached.
    pub async fn cached<T, F, Fut>(
        &self,
        tag: CacheTag,
        key: &str,
        load: F,
    ) -> GeoResult<(CachedResponse, CacheStatus)>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = GeoResult<T>>,
    {
        let cache = self.controller.cache();
        if let Some(hit) = cache.get(tag, key).await {
            return Ok((hit, CacheStatus::Hit));
        }

        let generation = cache.generation(tag);
        let payload = load().await?;
        let body = serde_json::to_vec(&payload).map_err(|e| {
            GeoError::Store(StoreError::Serialization {
                reason: e.to_string(),
            })
        })?;
        let mut fingerprint = Fingerprint::of_bytes(&body);
        if self.timestamp_fingerprints {
            fingerprint = fingerprint.with_timestamp(Utc::now());
        }
        let response = CachedResponse::new(body, fingerprint);

        if !cache.put(tag, key, response.clone(), generation).await {
            tracing::debug!(tag = %tag, key, "Response not cached after concurrent eviction");
        }
        Ok((response, CacheStatus::Miss))
    }

    // ========================================================================
    // WRITES
    // ========================================================================

    /// Upsert localities, then evict the `localities` tag.
    ///
    /// A failed batch evicts only when some of its records were committed.
    pub async fn upsert_localities(
        &self,
        localities: Vec<Locality>,
        cancel: &CancellationToken,
    ) -> GeoResult<WriteReport> {
        let result = self
            .engine
            .upsert_batch(EntityKind::Locality, localities, cancel)
            .await;
        match result {
            Ok(outcome) => Ok(WriteReport {
                outcome,
                eviction: self.controller.evict(CacheTag::Localities).await,
            }),
            Err(err) => {
                if committed_any(&err) {
                    self.controller.evict(CacheTag::Localities).await;
                }
                Err(err)
            }
        }
    }

    /// Upsert one street chunk, then evict the `streets` tag if the batch's
    /// update timestamp is newer than any seen before.
    ///
    /// The watermark only moves for a batch that committed something.
    pub async fn upsert_streets(
        &self,
        batch: StreetBatch,
        cancel: &CancellationToken,
    ) -> GeoResult<WriteReport> {
        let StreetBatch {
            streets,
            update_timestamp,
        } = batch;
        let result = self
            .engine
            .upsert_batch(EntityKind::Street, streets, cancel)
            .await;
        match result {
            Ok(outcome) => Ok(WriteReport {
                outcome,
                eviction: self
                    .controller
                    .evict_if_newer(CacheTag::Streets, update_timestamp)
                    .await,
            }),
            Err(err) => {
                if committed_any(&err) {
                    self.controller
                        .evict_if_newer(CacheTag::Streets, update_timestamp)
                        .await;
                }
                Err(err)
            }
        }
    }
}

/// Whether a failed write still changed stored data.
fn committed_any(err: &GeoError) -> bool {
    matches!(err, GeoError::PartialUpsertFailure { committed, .. } if *committed > 0)
}
