//! georef Test Utilities
//!
//! Shared test infrastructure for the georef workspace:
//! - Proptest generators for localities and streets
//! - Fixtures that build government feed payloads
//! - A fault-injecting document store
//! - Custom assertions for georef error variants

pub use georef_core::{
    CacheTag, EntityKind, GeoError, GeoResult, Locality, LocalityDto, StoreError, Street,
    StreetBatch, StreetDto, Timestamp, UpsertOutcome,
};
pub use georef_storage::{DocumentStore, InMemoryDocumentStore};

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use georef_core::PartitionKeyed;
use georef_storage::{Document, QueryFilter, WriteReceipt};

// ============================================================================
// FAULT-INJECTING STORE
// ============================================================================

/// How writes of one record id misbehave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail with a transient error this many times, then succeed.
    Transient(u32),
    /// Fail with a transient error on every attempt.
    AlwaysTransient,
    /// Fail with a non-transient rejection.
    Rejected,
}

/// In-memory store that fails writes for selected record ids.
///
/// Every write attempt is counted per record id, so tests can check the
/// retry bound.
#[derive(Debug, Default)]
pub struct FlakyStore {
    inner: InMemoryDocumentStore,
    faults: DashMap<String, Fault>,
    attempts: DashMap<String, u32>,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fault(self, record_id: impl Into<String>, fault: Fault) -> Self {
        self.faults.insert(record_id.into(), fault);
        self
    }

    pub fn set_fault(&self, record_id: impl Into<String>, fault: Fault) {
        self.faults.insert(record_id.into(), fault);
    }


    /// Write attempts seen for `record_id`.
    pub fn attempts(&self, record_id: &str) -> u32 {
        self.attempts.get(record_id).map(|a| *a).unwrap_or(0)
    }

    pub fn inner(&self) -> &InMemoryDocumentStore {
        &self.inner
    }
}

#[async_trait]
impl DocumentStore for FlakyStore {
    async fn initialize(&self) -> Result<(), StoreError> {
        self.inner.initialize().await
    }

    async fn upsert<D: Document>(&self, item: &D) -> Result<WriteReceipt, StoreError> {
        let id = item.record_id().to_string();
        let attempt = {
            let mut count = self.attempts.entry(id.clone()).or_insert(0);
            *count += 1;
            *count
        };
        let fault = self.faults.get(&id).map(|f| *f);
        match fault {
            Some(Fault::Transient(n)) if attempt <= n => Err(StoreError::Unavailable {
                reason: format!("injected transient failure {attempt}/{n}"),
            }),
            Some(Fault::AlwaysTransient) => Err(StoreError::RateLimited {
                retry_after_ms: None,
            }),
            Some(Fault::Rejected) => Err(StoreError::Rejected {
                id,
                reason: "injected rejection".to_string(),
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

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating georef records.

    use super::*;
    use proptest::prelude::*;

    /// Numeric locality code as the feed delivers it.
    pub fn arb_locality_id() -> impl Strategy<Value = String> {
        "[1-9][0-9]{0,3}"
    }

    pub fn arb_street_id() -> impl Strategy<Value = String> {
        "[1-9][0-9]{0,3}"
    }

    pub fn arb_name() -> impl Strategy<Value = String> {
        "[A-Za-z][A-Za-z ]{0,15}[A-Za-z]"
    }

    /// Generate a Timestamp within 2020-2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_locality() -> impl Strategy<Value = Locality> {
        (arb_locality_id(), arb_name()).prop_map(|(id, name)| Locality::new(id, name))
    }

    /// Localities with distinct ids.
    pub fn arb_localities(max: usize) -> impl Strategy<Value = Vec<Locality>> {
        prop::collection::btree_map(arb_locality_id(), arb_name(), 0..max).prop_map(|m| {
            m.into_iter()
                .map(|(id, name)| Locality::new(id, name))
                .collect()
        })
    }

    /// Streets, some of them lacking a locality id.
    pub fn arb_streets_with_missing_keys(max: usize) -> impl Strategy<Value = Vec<Street>> {
        prop::collection::vec(
            (
                prop_oneof![3 => arb_locality_id(), 1 => Just(String::new())],
                arb_street_id(),
                arb_name(),
            )
                .prop_map(|(loc, id, name)| Street::new(loc, id, name)),
            0..max,
        )
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Government feed payloads and ready-made records.

    use super::*;
    use serde_json::{json, Value};

    pub const LOCALITY_CODE: &str = "סמל_ישוב";
    pub const LOCALITY_NAME: &str = "שם_ישוב";
    pub const STREET_CODE: &str = "סמל_רחוב";
    pub const STREET_NAME: &str = "שם_רחוב";

    fn envelope(records: Vec<Value>, total: Option<u64>) -> String {
        let total = total.unwrap_or(records.len() as u64);
        json!({
            "success": true,
            "result": {
                "records": records,
                "total": total,
            }
        })
        .to_string()
    }

    /// Localities feed payload; codes are emitted as numbers like the feed.
    pub fn localities_payload(rows: &[(&str, &str)]) -> String {
        let records = rows
            .iter()
            .map(|(code, name)| {
                let code: Value = code.parse::<u64>().map(Value::from).unwrap_or_else(|_| Value::from(*code));
                json!({ LOCALITY_CODE: code, LOCALITY_NAME: format!(" {name} ") })
            })
            .collect();
        envelope(records, None)
    }

    /// Streets feed payload. `total` overrides the reported total.
    pub fn streets_payload(rows: &[(&str, &str, &str)], total: Option<u64>) -> String {
        let records = rows
            .iter()
            .map(|(locality, street, name)| {
                json!({
                    LOCALITY_CODE: locality,
                    LOCALITY_NAME: "",
                    STREET_CODE: street,
                    STREET_NAME: name,
                })
            })
            .collect();
        envelope(records, total)
    }



}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for georef error variants.

    use super::*;
    use std::collections::BTreeSet;

    /// Assert a partial upsert failure naming exactly `expected` ids.
    #[track_caller]
    pub fn assert_partial_failure<T: std::fmt::Debug>(
        result: &GeoResult<T>,
        entity: EntityKind,
        expected: &[&str],
    ) {
        match result {
            Err(GeoError::PartialUpsertFailure {
                entity_type,
                failed_ids,
                ..
            }) => {
                assert_eq!(*entity_type, entity, "Wrong entity type in partial failure");
                let expected: BTreeSet<String> = expected.iter().map(|s| s.to_string()).collect();
                assert_eq!(failed_ids, &expected, "Wrong failed ids");
            }
            other => panic!("Expected PartialUpsertFailure, got: {:?}", other),
        }
    }

    /// Assert a NotFound error for `entity`.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &GeoResult<T>, entity: EntityKind) {
        match result {
            Err(GeoError::NotFound { entity: found, .. }) => {
                assert_eq!(*found, entity, "Wrong entity in NotFound error");
            }
            other => panic!("Expected NotFound error for {entity}, got: {:?}", other),
        }
    }
}
