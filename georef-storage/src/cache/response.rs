//! Tagged response cache.
//!
//! Read endpoints cache their serialized bodies under a tag and a request
//! key. Eviction is tag-wide. Every tag carries a generation counter that
//! eviction bumps; a response computed before an eviction is refused on
//! insert, so a slow reader can never re-populate the cache with data older
//! than the write that evicted it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use georef_core::{CacheTag, Fingerprint};

/// A cached, already-serialized response body.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedResponse {
    pub body: Vec<u8>,
    pub fingerprint: Fingerprint,
    pub stored_at: DateTime<Utc>,
}

impl CachedResponse {
    pub fn new(body: Vec<u8>, fingerprint: Fingerprint) -> Self {
        Self {
            body,
            fingerprint,
            stored_at: Utc::now(),
        }
    }

    /// Age of this entry relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.stored_at).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Statistics for cache operations.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entry_count: u64,
    /// Entries removed by tag eviction or expiry.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Response cache contract.
#[async_trait]
pub trait ResponseCache: Send + Sync {
    /// Current generation of `tag`. Capture before computing a response.
    fn generation(&self, tag: CacheTag) -> u64;

    async fn get(&self, tag: CacheTag, key: &str) -> Option<CachedResponse>;

    /// Store `response` unless `tag` was evicted since `observed_generation`.
    /// Returns whether the entry was stored.
    async fn put(
        &self,
        tag: CacheTag,
        key: &str,
        response: CachedResponse,
        observed_generation: u64,
    ) -> bool;

    /// Drop every entry under `tag`. Returns the number of entries removed.
    async fn evict_tag(&self, tag: CacheTag) -> usize;

    fn stats(&self) -> CacheStats;
}

/// Configuration for the in-memory response cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Entries older than this are treated as absent.
    pub expiration: Duration,
    /// Upper bound on cached entries across all tags.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiration: Duration::from_secs(120),
            max_entries: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }
}

/// Response cache held in process memory.
#[derive(Debug)]
pub struct InMemoryResponseCache {
    entries: DashMap<(CacheTag, String), CachedResponse>,
    generations: DashMap<CacheTag, u64>,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl Default for InMemoryResponseCache {
    fn default() -> Self {
        Self::new(CacheConfig::default())
    }
}

impl InMemoryResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            generations: DashMap::new(),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn purge_expired(&self, now: DateTime<Utc>) {
        let expiration = self.config.expiration;
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.age(now) < expiration);
        let removed = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
    }
}

#[async_trait]
impl ResponseCache for InMemoryResponseCache {
    fn generation(&self, tag: CacheTag) -> u64 {
        self.generations.get(&tag).map(|g| *g).unwrap_or(0)
    }

    async fn get(&self, tag: CacheTag, key: &str) -> Option<CachedResponse> {
        let cache_key = (tag, key.to_string());
        let now = Utc::now();
        let fresh = self
            .entries
            .get(&cache_key)
            .map(|entry| (entry.age(now) < self.config.expiration, entry.clone()));

        match fresh {
            Some((true, entry)) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry)
            }
            Some((false, _)) => {
                self.entries.remove(&cache_key);
                self.evictions.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    async fn put(
        &self,
        tag: CacheTag,
        key: &str,
        response: CachedResponse,
        observed_generation: u64,
    ) -> bool {
        // Holding the generation shard lock orders this insert against a
        // concurrent eviction of the same tag.
        let generation = self.generations.entry(tag).or_insert(0);
        if *generation != observed_generation {
            return false;
        }

        let cache_key = (tag, key.to_string());
        if self.entries.len() >= self.config.max_entries && !self.entries.contains_key(&cache_key) {
            self.purge_expired(Utc::now());
            if self.entries.len() >= self.config.max_entries {
                return false;
            }
        }
        self.entries.insert(cache_key, response);
        drop(generation);
        true
    }

    async fn evict_tag(&self, tag: CacheTag) -> usize {
        let mut generation = self.generations.entry(tag).or_insert(0);
        *generation += 1;
        let before = self.entries.len();
        self.entries.retain(|(entry_tag, _), _| *entry_tag != tag);
        drop(generation);
        let removed = before.saturating_sub(self.entries.len());
        self.evictions.fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count: self.entries.len() as u64,
            evictions: self.evictions.load(Ordering::Relaxed),
        }
    }
}
