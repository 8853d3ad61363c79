//! georef Core - Domain Types and Ingestion Primitives
//!
//! Shared by every tier. Holds the locality/street data model, the error
//! taxonomy, content fingerprints, the retry policy, the feed normalizer and
//! the chunked batch orchestrator. No I/O lives here.

pub mod batch;
pub mod entities;
pub mod error;
pub mod fingerprint;
pub mod normalize;
pub mod retry;

pub use batch::{chunk, dispatch_sequentially, ChunkSink, DispatchReport, DEFAULT_CHUNK_SIZE};
pub use entities::{
    CacheTag, EntityKind, Locality, LocalityDto, PartitionKeyed, Street, StreetBatch, StreetDto,
    UpsertOutcome,
};
pub use error::{ConfigError, GeoError, GeoResult, StoreError, ValidationError};
pub use fingerprint::{Fingerprint, FINGERPRINT_LEN};
pub use normalize::{
    normalize_localities, normalize_streets, Normalized, NormalizeDiagnostic,
    DEFAULT_SENTINEL_STREET_ID,
};
pub use retry::{RetryPolicy, Retryable};

/// Timestamp type using UTC timezone.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
