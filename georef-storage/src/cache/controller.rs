//! Cache consistency controller.
//!
//! Decides when a write invalidates cached reads. Locality writes evict
//! unconditionally; street writes evict only when their update timestamp is
//! strictly newer than the tag watermark, so a late chunk from an older
//! ingestion run never wipes responses produced after a newer one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use georef_core::CacheTag;

use super::response::ResponseCache;
use super::watermark::TagWatermarks;

/// Result of an eviction request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eviction {
    pub tag: CacheTag,
    /// Whether the cache was actually invalidated.
    pub evicted: bool,
    /// Entries removed from the cache.
    pub removed: usize,
}

impl Eviction {
    fn skipped(tag: CacheTag) -> Self {
        Self {
            tag,
            evicted: false,
            removed: 0,
        }
    }
}

/// Owns the response cache handle and the per-tag watermarks.
#[derive(Clone)]
pub struct CacheController {
    cache: Arc<dyn ResponseCache>,
    watermarks: Arc<TagWatermarks>,
}

impl CacheController {
    pub fn new(cache: Arc<dyn ResponseCache>) -> Self {
        Self {
            cache,
            watermarks: Arc::new(TagWatermarks::new()),
        }
    }

    pub fn cache(&self) -> &Arc<dyn ResponseCache> {
        &self.cache
    }

    /// Evict every cached response under `tag`.
    pub async fn evict(&self, tag: CacheTag) -> Eviction {
        let removed = self.cache.evict_tag(tag).await;
        tracing::debug!(tag = %tag, removed, "Evicted cache tag");
        Eviction {
            tag,
            evicted: true,
            removed,
        }
    }

    /// Evict `tag` only if `candidate` is strictly newer than every timestamp
    /// accepted so far, advancing the watermark on success.
    pub async fn evict_if_newer(&self, tag: CacheTag, candidate: DateTime<Utc>) -> Eviction {
        if !self.watermarks.advance(tag, candidate) {
            tracing::debug!(
                tag = %tag,
                candidate = %candidate,
                watermark = ?self.watermarks.current(tag),
                "Skipped eviction for stale update timestamp"
            );
            return Eviction::skipped(tag);
        }
        self.evict(tag).await
    }

    pub fn watermark(&self, tag: CacheTag) -> Option<DateTime<Utc>> {
        self.watermarks.current(tag)
    }
}
