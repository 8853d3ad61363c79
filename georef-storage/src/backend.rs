//! Runtime-selected store backend.

use std::path::Path;

use async_trait::async_trait;
use georef_core::StoreError;

use crate::lmdb::{LmdbDocumentStore, LmdbStoreError};
use crate::memory::InMemoryDocumentStore;
use crate::store::{Document, DocumentStore, QueryFilter, WriteReceipt};

/// The store a tier was configured with.
pub enum StoreBackend {
    Memory(InMemoryDocumentStore),
    Lmdb(LmdbDocumentStore),
}

impl StoreBackend {
    pub fn memory() -> Self {
        StoreBackend::Memory(InMemoryDocumentStore::new())
    }

    pub fn lmdb<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        LmdbDocumentStore::open(path, max_size_mb).map(StoreBackend::Lmdb)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StoreBackend::Memory(_) => "memory",
            StoreBackend::Lmdb(_) => "lmdb",
        }
    }
}

#[async_trait]
impl DocumentStore for StoreBackend {
    async fn initialize(&self) -> Result<(), StoreError> {
        match self {
            StoreBackend::Memory(store) => store.initialize().await,
            StoreBackend::Lmdb(store) => store.initialize().await,
        }
    }

    async fn upsert<D: Document>(&self, item: &D) -> Result<WriteReceipt, StoreError> {
        match self {
            StoreBackend::Memory(store) => store.upsert(item).await,
            StoreBackend::Lmdb(store) => store.upsert(item).await,
        }
    }

    async fn read<D: Document>(
        &self,
        partition_key: &str,
        id: &str,
    ) -> Result<Option<D>, StoreError> {
        match self {
            StoreBackend::Memory(store) => store.read(partition_key, id).await,
            StoreBackend::Lmdb(store) => store.read(partition_key, id).await,
        }
    }

    async fn query<D: Document>(&self, filter: &QueryFilter) -> Result<Vec<D>, StoreError> {
        match self {
            StoreBackend::Memory(store) => store.query(filter).await,
            StoreBackend::Lmdb(store) => store.query(filter).await,
        }
    }
}
