//! georef Storage - Document Stores, Bulk Writes and Cache Consistency
//!
//! Partition-keyed document stores (in-memory and LMDB), the bulk upsert
//! engine that writes record batches with per-record retry, and the cache
//! layer that keeps fingerprinted read responses consistent with writes.

pub mod backend;
pub mod bulk;
pub mod cache;
pub mod key;
pub mod lmdb;
pub mod memory;
pub mod service;
pub mod store;

pub use backend::StoreBackend;
pub use bulk::BulkUpsertEngine;
pub use key::DocumentKey;
pub use lmdb::{LmdbDocumentStore, LmdbStoreError};
pub use memory::InMemoryDocumentStore;
pub use service::{CacheStatus, GeolocationStore, WriteReport};
pub use store::{write_charge, Document, DocumentStore, QueryFilter, WriteReceipt};

// Re-export cache types for API integration
pub use cache::{
    CacheConfig, CacheController, CacheStats, CachedResponse, Eviction, InMemoryResponseCache,
    ResponseCache, TagWatermarks,
};
