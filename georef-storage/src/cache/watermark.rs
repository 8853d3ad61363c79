//! Per-tag update watermarks.
//!
//! A watermark is the highest update timestamp a cache-gating decision has
//! accepted for a tag. Watermarks only move forward: an advance succeeds
//! only for a candidate strictly greater than every previously accepted
//! value, and concurrent advances are serialized by compare-and-swap.

use chrono::{DateTime, Utc};
use georef_core::CacheTag;
use std::sync::atomic::{AtomicI64, Ordering};

/// Sentinel meaning "nothing accepted yet".
const UNSET: i64 = i64::MIN;

/// Monotonic watermark per cache tag.
#[derive(Debug)]
pub struct TagWatermarks {
    localities: AtomicI64,
    streets: AtomicI64,
}

impl Default for TagWatermarks {
    fn default() -> Self {
        Self {
            localities: AtomicI64::new(UNSET),
            streets: AtomicI64::new(UNSET),
        }
    }
}

impl TagWatermarks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, tag: CacheTag) -> &AtomicI64 {
        match tag {
            CacheTag::Localities => &self.localities,
            CacheTag::Streets => &self.streets,
        }
    }

    /// Highest accepted timestamp for `tag`, at microsecond precision.
    pub fn current(&self, tag: CacheTag) -> Option<DateTime<Utc>> {
        match self.slot(tag).load(Ordering::Acquire) {
            UNSET => None,
            micros => DateTime::from_timestamp_micros(micros),
        }
    }

    /// Move the watermark to `candidate` if it is strictly newer.
    ///
    /// Returns whether the watermark advanced.
    pub fn advance(&self, tag: CacheTag, candidate: DateTime<Utc>) -> bool {
        let micros = candidate.timestamp_micros();
        self.slot(tag)
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (micros > current).then_some(micros)
            })
            .is_ok()
    }
}
