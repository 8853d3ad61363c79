//! Response caching and cache consistency.

pub mod controller;
pub mod response;
pub mod watermark;

pub use controller::{CacheController, Eviction};
pub use response::{CacheConfig, CacheStats, CachedResponse, InMemoryResponseCache, ResponseCache};
pub use watermark::TagWatermarks;
