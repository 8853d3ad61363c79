//! Document store adapter contract.
//!
//! Stores are partition-keyed collections of JSON documents. They own no
//! business logic: no filtering, no retry, no cache handling.

use async_trait::async_trait;
use georef_core::{Locality, PartitionKeyed, StoreError, Street};
use serde::{de::DeserializeOwned, Serialize};

use crate::key::DocumentKey;

/// A record that can be persisted in a document container.
pub trait Document:
    Serialize + DeserializeOwned + PartitionKeyed + Clone + Send + Sync + 'static
{
    /// Container (collection) the document lives in.
    const CONTAINER: &'static str;

    /// Document id, unique within its partition.
    fn document_id(&self) -> &str;

    fn document_key(&self) -> DocumentKey {
        DocumentKey::new(Self::CONTAINER, self.partition_key(), self.document_id())
    }
}

impl Document for Locality {
    const CONTAINER: &'static str = "localities";

    fn document_id(&self) -> &str {
        if self.id.is_empty() {
            &self.locality_id
        } else {
            &self.id
        }
    }
}

impl Document for Street {
    const CONTAINER: &'static str = "streets";

    fn document_id(&self) -> &str {
        if self.id.is_empty() {
            &self.street_id
        } else {
            &self.id
        }
    }
}

/// Cost reported by the store for a committed write.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteReceipt {
    pub request_charge: f64,
}

/// Charge model shared by the bundled stores: a fixed base plus one unit per
/// started kilobyte.
pub fn write_charge(document_bytes: usize) -> f64 {
    5.0 + document_bytes.div_ceil(1024) as f64
}

/// Query filter for reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryFilter {
    /// Every document in the container.
    All,
    /// Every document in one partition.
    Partition(String),
}

/// Partitioned document store.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create containers if missing.
    async fn initialize(&self) -> Result<(), StoreError>;

    /// Insert or replace a document under its partition key and id.
    async fn upsert<D: Document>(&self, item: &D) -> Result<WriteReceipt, StoreError>;

    /// Point read of one document.
    async fn read<D: Document>(
        &self,
        partition_key: &str,
        id: &str,
    ) -> Result<Option<D>, StoreError>;

    /// Documents matching `filter`, ordered by key.
    async fn query<D: Document>(&self, filter: &QueryFilter) -> Result<Vec<D>, StoreError>;
}

pub(crate) fn query_prefix<D: Document>(filter: &QueryFilter) -> Vec<u8> {
    match filter {
        QueryFilter::All => DocumentKey::container_prefix(D::CONTAINER),
        QueryFilter::Partition(partition_key) => {
            DocumentKey::partition_prefix(D::CONTAINER, partition_key)
        }
    }
}

pub(crate) fn encode_document<D: Document>(item: &D) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(item).map_err(|e| StoreError::Serialization {
        reason: e.to_string(),
    })
}

pub(crate) fn decode_document<D: Document>(bytes: &[u8]) -> Result<D, StoreError> {
    serde_json::from_slice(bytes).map_err(|e| StoreError::Serialization {
        reason: e.to_string(),
    })
}
