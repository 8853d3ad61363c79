//! LMDB-backed document store.
//!
//! Uses the heed crate (Rust bindings for LMDB) as a memory-mapped,
//! crash-safe document collection. All containers share one database; the
//! [`DocumentKey`] encoding keeps containers and partitions contiguous, so
//! partition queries are prefix scans.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. Reads use read transactions, every
//! upsert commits its own write transaction.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use georef_core::StoreError;
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};

use crate::key::DocumentKey;
use crate::store::{
    decode_document, encode_document, query_prefix, write_charge, Document, DocumentStore,
    QueryFilter, WriteReceipt,
};

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// The memory map is full.
    #[error("LMDB map is full")]
    MapFull,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<heed::Error> for LmdbStoreError {
    fn from(e: heed::Error) -> Self {
        match e {
            heed::Error::Mdb(heed::MdbError::MapFull) => LmdbStoreError::MapFull,
            other => LmdbStoreError::Transaction(other.to_string()),
        }
    }
}

/// A full map is reported as unavailability so writers back off and retry.
impl From<LmdbStoreError> for StoreError {
    fn from(e: LmdbStoreError) -> Self {
        match e {
            LmdbStoreError::MapFull => StoreError::Unavailable {
                reason: e.to_string(),
            },
            other => StoreError::Backend {
                reason: other.to_string(),
            },
        }
    }
}

/// LMDB-backed document store.
///
/// ```ignore
/// use georef_storage::{DocumentStore, LmdbDocumentStore};
///
/// let store = LmdbDocumentStore::open("/var/lib/georef", 512)?;
/// store.upsert(&locality).await?;
/// ```
pub struct LmdbDocumentStore {
    env: Env,
    db: Database<Bytes, Bytes>,
    writes: AtomicU64,
}

impl LmdbDocumentStore {
    /// Open (or create) a store under `path` with a map of `max_size_mb`.
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn()?;
        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            db,
            writes: AtomicU64::new(0),
        })
    }

    /// Committed writes since open.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<(), LmdbStoreError> {
        let mut wtxn = self.env.write_txn()?;
        self.db.put(&mut wtxn, key, value)?;
        wtxn.commit()?;
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, LmdbStoreError> {
        let rtxn = self.env.read_txn()?;
        Ok(self.db.get(&rtxn, key)?.map(<[u8]>::to_vec))
    }

    fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<Vec<u8>>, LmdbStoreError> {
        let rtxn = self.env.read_txn()?;
        let mut values = Vec::new();
        for entry in self.db.prefix_iter(&rtxn, prefix)? {
            let (_, value) = entry?;
            values.push(value.to_vec());
        }
        Ok(values)
    }
}

#[async_trait]
impl DocumentStore for LmdbDocumentStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        // The database itself is created in `open`.
        self.env
            .read_txn()
            .map_err(LmdbStoreError::from)
            .map_err(StoreError::from)
            .map(drop)
    }

    async fn upsert<D: Document>(&self, item: &D) -> Result<WriteReceipt, StoreError> {
        let value = encode_document(item)?;
        let key = item.document_key().encode();
        self.put(&key, &value)?;
        Ok(WriteReceipt {
            request_charge: write_charge(value.len()),
        })
    }

    async fn read<D: Document>(
        &self,
        partition_key: &str,
        id: &str,
    ) -> Result<Option<D>, StoreError> {
        let key = DocumentKey::new(D::CONTAINER, partition_key, id).encode();
        match self.get(&key)? {
            Some(bytes) => decode_document(&bytes).map(Some),
            None => Ok(None),
        }
    }

    async fn query<D: Document>(&self, filter: &QueryFilter) -> Result<Vec<D>, StoreError> {
        let prefix = query_prefix::<D>(filter);
        self.scan_prefix(&prefix)?
            .iter()
            .map(|bytes| decode_document(bytes))
            .collect()
    }
}
