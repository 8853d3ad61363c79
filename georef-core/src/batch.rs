//! Chunked, strictly sequential batch dispatch.
//!
//! Large ingestion runs are split into fixed-size chunks and handed to a
//! sink one at a time, so the downstream accessor never sees more than one
//! chunk of a run in flight.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::entities::PartitionKeyed;

/// Default number of records per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1000;

/// Receives chunks from [`dispatch_sequentially`].
#[async_trait]
pub trait ChunkSink<T: Send + 'static>: Send + Sync {
    type Error: Send;

    /// Deliver one chunk. `index` is zero-based, `total` is the chunk count
    /// of the run.
    async fn deliver(
        &self,
        index: usize,
        total: usize,
        chunk: Vec<T>,
        update_timestamp: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<(), Self::Error>;
}

/// Summary of a completed dispatch run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DispatchReport {
    pub chunks_sent: usize,
    pub records_sent: usize,
}

/// Split `records` into ordered chunks of at most `max_chunk_size`.
///
/// Records without a partition key are dropped first. Only the last chunk
/// may be shorter than `max_chunk_size`. A size of zero is treated as one.
pub fn chunk<T: PartitionKeyed>(records: Vec<T>, max_chunk_size: usize) -> Vec<Vec<T>> {
    let size = max_chunk_size.max(1);
    let filtered: Vec<T> = records
        .into_iter()
        .filter(PartitionKeyed::has_partition_key)
        .collect();

    let mut chunks = Vec::with_capacity(filtered.len().div_ceil(size));
    let mut remaining = filtered.into_iter().peekable();
    while remaining.peek().is_some() {
        chunks.push(remaining.by_ref().take(size).collect());
    }
    chunks
}

/// Deliver `chunks` one after another, each stamped with `update_timestamp`.
///
/// Stops at the first failed chunk and returns its error; later chunks are
/// never sent.
pub async fn dispatch_sequentially<T, S>(
    chunks: Vec<Vec<T>>,
    update_timestamp: DateTime<Utc>,
    sink: &S,
    cancel: &CancellationToken,
) -> Result<DispatchReport, S::Error>
where
    T: Send + 'static,
    S: ChunkSink<T> + ?Sized,
{
    let total = chunks.len();
    let mut report = DispatchReport::default();

    for (index, chunk) in chunks.into_iter().enumerate() {
        let len = chunk.len();
        tracing::debug!(
            chunk = index + 1,
            total,
            records = len,
            "Dispatching chunk"
        );
        sink.deliver(index, total, chunk, update_timestamp, cancel)
            .await?;
        report.chunks_sent += 1;
        report.records_sent += len;
    }

    Ok(report)
}
