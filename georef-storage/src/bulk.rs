//! Bulk upsert engine.
//!
//! Every record of a batch is written concurrently as its own store call,
//! each wrapped in the retry policy. Failures are isolated per record: one
//! bad record never aborts the others. After fan-in the engine either
//! reports success with the aggregate store cost or raises
//! [`GeoError::PartialUpsertFailure`] naming every record that did not
//! commit.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashSet;
use futures_util::future::join_all;
use georef_core::{EntityKind, GeoError, GeoResult, PartitionKeyed, RetryPolicy, StoreError, UpsertOutcome};
use tokio_util::sync::CancellationToken;

use crate::store::{Document, DocumentStore};

/// Concurrent per-record writer with retry and partial-failure accounting.
pub struct BulkUpsertEngine<S> {
    store: Arc<S>,
    policy: RetryPolicy,
}

impl<S> Clone for BulkUpsertEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            policy: self.policy,
        }
    }
}

impl<S: DocumentStore> BulkUpsertEngine<S> {
    pub fn new(store: Arc<S>, policy: RetryPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Write `records`, returning the outcome or the set of records that
    /// could not be committed.
    ///
    /// Records with an empty partition key are dropped before any write and
    /// are not reported as failures. If `cancel` fires, the batch reports
    /// [`GeoError::Canceled`]; canceled writes are never counted as failed.
    pub async fn upsert_batch<D: Document>(
        &self,
        entity_type: EntityKind,
        records: Vec<D>,
        cancel: &CancellationToken,
    ) -> GeoResult<UpsertOutcome> {
        let started = Instant::now();
        let submitted = records.len();
        let records: Vec<D> = records
            .into_iter()
            .filter(PartitionKeyed::has_partition_key)
            .collect();

        tracing::info!(
            entity = %entity_type,
            records = records.len(),
            skipped = submitted - records.len(),
            "Starting bulk upsert"
        );

        let failed: DashSet<String> = DashSet::new();
        let cost_milli_units = AtomicU64::new(0);
        let succeeded = AtomicUsize::new(0);
        let canceled = AtomicBool::new(false);

        let writes = records.iter().map(|record| {
            let failed = &failed;
            let cost_milli_units = &cost_milli_units;
            let succeeded = &succeeded;
            let canceled = &canceled;
            async move {
                let result = self
                    .policy
                    .run(cancel, |_| self.store.upsert(record))
                    .await;
                match result {
                    Ok(receipt) => {
                        let milli = (receipt.request_charge * 1000.0).round() as u64;
                        cost_milli_units.fetch_add(milli, Ordering::Relaxed);
                        succeeded.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(StoreError::Canceled) => {
                        canceled.store(true, Ordering::Relaxed);
                    }
                    Err(err) => {
                        tracing::warn!(
                            entity = %entity_type,
                            id = record.record_id(),
                            error = %err,
                            "Failed to upsert record"
                        );
                        failed.insert(record.record_id().to_string());
                    }
                }
            }
        });
        join_all(writes).await;

        let cost_units = cost_milli_units.load(Ordering::Relaxed) as f64 / 1000.0;
        let succeeded = succeeded.load(Ordering::Relaxed);

        if canceled.load(Ordering::Relaxed) {
            tracing::warn!(
                entity = %entity_type,
                succeeded,
                "Bulk upsert canceled before completion"
            );
            return Err(GeoError::Canceled);
        }

        let failed_ids: BTreeSet<String> = failed.into_iter().collect();

        tracing::info!(
            entity = %entity_type,
            records = records.len(),
            succeeded,
            failed = failed_ids.len(),
            cost_units,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Finished bulk upsert"
        );

        if !failed_ids.is_empty() {
            tracing::warn!(
                entity = %entity_type,
                failed_ids = ?failed_ids,
                "Bulk upsert completed with failures"
            );
            return Err(GeoError::PartialUpsertFailure {
                entity_type,
                failed_ids,
                committed: succeeded,
            });
        }

        Ok(UpsertOutcome {
            succeeded_count: succeeded,
            failed_ids,
            cost_units,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDocumentStore;
    use crate::store::{QueryFilter, WriteReceipt};
    use async_trait::async_trait;
    use dashmap::DashMap;
    use georef_core::Locality;
    use proptest::prelude::*;
    use std::collections::HashMap;
    use std::time::Duration;

    /// How a record id should behave when written.
    #[derive(Debug, Clone, Copy)]
    enum Plan {
        /// Fail transiently this many times, then succeed.
        Transient(u32),
        /// Always fail transiently.
        AlwaysTransient,
        /// Fail once with a permanent rejection.
        Rejected,
    }

    struct PlannedStore {
        inner: InMemoryDocumentStore,
        plans: HashMap<String, Plan>,
        attempts: DashMap<String, u32>,
    }

    impl PlannedStore {
        fn new(plans: HashMap<String, Plan>) -> Self {
            Self {
                inner: InMemoryDocumentStore::new(),
                plans,
                attempts: DashMap::new(),
            }
        }

        fn attempts(&self, id: &str) -> u32 {
            self.attempts.get(id).map(|a| *a).unwrap_or(0)
        }
    }

    #[async_trait]
    impl DocumentStore for PlannedStore {
        async fn initialize(&self) -> Result<(), StoreError> {
            Ok(())
        }

        async fn upsert<D: Document>(&self, item: &D) -> Result<WriteReceipt, StoreError> {
            let id = item.record_id().to_string();
            let attempt = {
                let mut entry = self.attempts.entry(id.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            match self.plans.get(&id) {
                Some(Plan::Transient(n)) if attempt <= *n => Err(StoreError::RateLimited {
                    retry_after_ms: None,
                }),
                Some(Plan::AlwaysTransient) => Err(StoreError::Unavailable {
                    reason: "planned".into(),
                }),
                Some(Plan::Rejected) => Err(StoreError::Rejected {
                    id,
                    reason: "planned".into(),
                }),
                _ => self.inner.upsert(item).await,
            }
        }

        async fn read<D: Document>(
            &self,
            partition_key: &str,
            id: &str,
        ) -> Result<Option<D>, StoreError> {
            self.inner.read(partition_key, id).await
        }

        async fn query<D: Document>(&self, filter: &QueryFilter) -> Result<Vec<D>, StoreError> {
            self.inner.query(filter).await
        }
    }

    fn instant_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::store_writes()
            .with_max_retries(max_retries)
            .with_unit(Duration::ZERO)
            .with_backoff_cap(Duration::ZERO)
            .with_jitter_max_ms(0)
    }

    fn localities(ids: &[&str]) -> Vec<Locality> {
        ids.iter().map(|id| Locality::new(*id, format!("L{}", id))).collect()
    }

    #[tokio::test]
    async fn test_empty_partition_keys_are_skipped_not_failed() -> GeoResult<()> {
        let store = Arc::new(PlannedStore::new(HashMap::new()));
        let engine = BulkUpsertEngine::new(Arc::clone(&store), instant_policy(5));

        let outcome = engine
            .upsert_batch(
                EntityKind::Locality,
                localities(&["1", "2", "3", ""]),
                &CancellationToken::new(),
            )
            .await?;

        assert_eq!(outcome.succeeded_count, 3);
        assert!(outcome.failed_ids.is_empty());
        assert_eq!(store.attempts(""), 0);
        assert!(outcome.cost_units > 0.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_permanent_failure_is_named_and_others_commit() -> Result<(), StoreError> {
        let plans = HashMap::from([("2".to_string(), Plan::AlwaysTransient)]);
        let store = Arc::new(PlannedStore::new(plans));
        let engine = BulkUpsertEngine::new(Arc::clone(&store), instant_policy(5));

        let result = engine
            .upsert_batch(
                EntityKind::Locality,
                localities(&["1", "2", "3"]),
                &CancellationToken::new(),
            )
            .await;

        match result {
            Err(GeoError::PartialUpsertFailure {
                entity_type,
                failed_ids,
                committed,
            }) => {
                assert_eq!(entity_type, EntityKind::Locality);
                assert_eq!(failed_ids.into_iter().collect::<Vec<_>>(), vec!["2"]);
                assert_eq!(committed, 2);
            }
            other => panic!("expected partial failure, got {:?}", other),
        }
        assert_eq!(store.attempts("2"), 6);

        let stored: Vec<Locality> = store.query(&QueryFilter::All).await?;
        let ids: Vec<_> = stored.iter().map(|l| l.locality_id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let plans = HashMap::from([("1".to_string(), Plan::Rejected)]);
        let store = Arc::new(PlannedStore::new(plans));
        let engine = BulkUpsertEngine::new(Arc::clone(&store), instant_policy(5));

        let result = engine
            .upsert_batch(EntityKind::Locality, localities(&["1"]), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(GeoError::PartialUpsertFailure { .. })));
        assert_eq!(store.attempts("1"), 1);
    }

    #[tokio::test]
    async fn test_transient_failures_recover() -> GeoResult<()> {
        let plans = HashMap::from([("1".to_string(), Plan::Transient(2))]);
        let store = Arc::new(PlannedStore::new(plans));
        let engine = BulkUpsertEngine::new(Arc::clone(&store), instant_policy(5));

        let outcome = engine
            .upsert_batch(EntityKind::Locality, localities(&["1"]), &CancellationToken::new())
            .await?;
        assert_eq!(outcome.succeeded_count, 1);
        assert_eq!(store.attempts("1"), 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_canceled_batch_reports_canceled() {
        let store = Arc::new(PlannedStore::new(HashMap::new()));
        let engine = BulkUpsertEngine::new(Arc::clone(&store), instant_policy(5));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = engine
            .upsert_batch(EntityKind::Locality, localities(&["1", "2"]), &cancel)
            .await;
        assert_eq!(result, Err(GeoError::Canceled));
        assert_eq!(store.attempts("1"), 0);
    }

    fn plan_strategy() -> impl Strategy<Value = Option<Plan>> {
        prop_oneof![
            3 => Just(None),
            1 => (0u32..8).prop_map(|n| Some(Plan::Transient(n))),
            1 => Just(Some(Plan::AlwaysTransient)),
            1 => Just(Some(Plan::Rejected)),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_failed_set_is_exactly_the_uncommitted_records(
            plans in proptest::collection::vec(plan_strategy(), 1..40),
            max_retries in 0u32..6,
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .map_err(|e| TestCaseError::fail(e.to_string()))?;

            let ids: Vec<String> = (0..plans.len()).map(|i| i.to_string()).collect();
            let plan_map: HashMap<String, Plan> = ids
                .iter()
                .zip(plans.iter())
                .filter_map(|(id, plan)| plan.map(|p| (id.clone(), p)))
                .collect();
            let store = Arc::new(PlannedStore::new(plan_map.clone()));
            let engine = BulkUpsertEngine::new(Arc::clone(&store), instant_policy(max_retries));
            let records: Vec<Locality> = ids.iter().map(|id| Locality::new(id.clone(), "n")).collect();

            let result = runtime.block_on(engine.upsert_batch(
                EntityKind::Locality,
                records,
                &CancellationToken::new(),
            ));
            let committed: Vec<Locality> = runtime
                .block_on(store.query(&QueryFilter::All))
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            let committed: BTreeSet<String> = committed.into_iter().map(|l| l.locality_id).collect();

            let failed: BTreeSet<String> = match result {
                Ok(outcome) => {
                    prop_assert_eq!(outcome.succeeded_count, ids.len());
                    BTreeSet::new()
                }
                Err(GeoError::PartialUpsertFailure { failed_ids, .. }) => failed_ids,
                Err(other) => return Err(TestCaseError::fail(other.to_string())),
            };

            prop_assert!(failed.is_disjoint(&committed));
            let all: BTreeSet<String> = failed.union(&committed).cloned().collect();
            prop_assert_eq!(all, ids.iter().cloned().collect::<BTreeSet<_>>());

            for id in &ids {
                prop_assert!(store.attempts(id) <= max_retries + 1);
                let expected_failure = match plan_map.get(id) {
                    Some(Plan::Transient(n)) => *n > max_retries,
                    Some(Plan::AlwaysTransient) | Some(Plan::Rejected) => true,
                    None => false,
                };
                prop_assert_eq!(failed.contains(id), expected_failure);
            }
        }
    }
}
