//! In-memory document store.
//!
//! Uses the same key encoding as the LMDB store, so queries come back in the
//! same order from either backend.

use std::collections::BTreeMap;

use async_trait::async_trait;
use georef_core::StoreError;
use tokio::sync::RwLock;

use crate::key::DocumentKey;
use crate::store::{
    decode_document, encode_document, query_prefix, write_charge, Document, DocumentStore,
    QueryFilter, WriteReceipt,
};

/// Document store backed by an ordered map.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in a container.
    pub async fn count(&self, container: &str) -> usize {
        let prefix = DocumentKey::container_prefix(container);
        self.documents
            .read()
            .await
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .count()
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn upsert<D: Document>(&self, item: &D) -> Result<WriteReceipt, StoreError> {
        let value = encode_document(item)?;
        let charge = write_charge(value.len());
        self.documents
            .write()
            .await
            .insert(item.document_key().encode(), value);
        Ok(WriteReceipt {
            request_charge: charge,
        })
    }

    async fn read<D: Document>(
        &self,
        partition_key: &str,
        id: &str,
    ) -> Result<Option<D>, StoreError> {
        let key = DocumentKey::new(D::CONTAINER, partition_key, id).encode();
        match self.documents.read().await.get(&key) {
            Some(bytes) => decode_document(bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn query<D: Document>(&self, filter: &QueryFilter) -> Result<Vec<D>, StoreError> {
        let prefix = query_prefix::<D>(filter);
        let documents = self.documents.read().await;
        documents
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(_, bytes)| decode_document(bytes))
            .collect()
    }
}
