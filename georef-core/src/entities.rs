//! Domain records for localities and streets.
//!
//! Wire names are camelCase because every tier exchanges these records as
//! JSON with the same field spelling the government dataset was mapped to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

// ============================================================================
// PARTITIONING
// ============================================================================

/// A record that can be routed to a store partition.
///
/// `record_id` is the id reported back when a write fails; `partition_key`
/// is the value the store colocates records by.
pub trait PartitionKeyed {
    fn record_id(&self) -> &str;
    fn partition_key(&self) -> &str;

    /// Records without a partition key are never written.
    fn has_partition_key(&self) -> bool {
        !self.partition_key().trim().is_empty()
    }
}

// ============================================================================
// RECORDS
// ============================================================================

/// A locality (city, town, settlement). `locality_id` is both the natural
/// key and the partition key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Locality {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub locality_id: String,
    #[serde(default)]
    pub locality_name: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Locality {
    /// Build a locality the way ingestion does: `id` mirrors `locality_id`.
    pub fn new(locality_id: impl Into<String>, locality_name: impl Into<String>) -> Self {
        let locality_id = locality_id.into();
        Self {
            id: locality_id.clone(),
            locality_id,
            locality_name: locality_name.into(),
            created_at: Utc::now(),
        }
    }
}

impl PartitionKeyed for Locality {
    fn record_id(&self) -> &str {
        &self.locality_id
    }

    fn partition_key(&self) -> &str {
        &self.locality_id
    }
}

/// A street inside a locality partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Street {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub locality_id: String,
    #[serde(default)]
    pub street_id: String,
    #[serde(default)]
    pub street_name: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Street {
    /// Build a street the way ingestion does: `id` mirrors `street_id`.
    pub fn new(
        locality_id: impl Into<String>,
        street_id: impl Into<String>,
        street_name: impl Into<String>,
    ) -> Self {
        let street_id = street_id.into();
        Self {
            id: street_id.clone(),
            locality_id: locality_id.into(),
            street_id,
            street_name: street_name.into(),
            created_at: Utc::now(),
        }
    }

    /// A street is storable only with an id, a street id and a name.
    pub fn is_complete(&self) -> bool {
        !self.id.trim().is_empty()
            && !self.street_id.trim().is_empty()
            && !self.street_name.trim().is_empty()
    }
}

impl PartitionKeyed for Street {
    fn record_id(&self) -> &str {
        &self.street_id
    }

    fn partition_key(&self) -> &str {
        &self.locality_id
    }
}

/// One chunk of an ingestion run. Every chunk of a run carries the same
/// `update_timestamp`, which only gates cache eviction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreetBatch {
    #[serde(default)]
    pub streets: Vec<Street>,
    pub update_timestamp: DateTime<Utc>,
}

// ============================================================================
// READ PROJECTIONS
// ============================================================================

/// Locality as served to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalityDto {
    pub locality_id: String,
    pub locality_name: String,
}

impl From<&Locality> for LocalityDto {
    fn from(locality: &Locality) -> Self {
        Self {
            locality_id: locality.locality_id.clone(),
            locality_name: locality.locality_name.clone(),
        }
    }
}

/// Street as served to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreetDto {
    pub locality_id: String,
    pub street_id: String,
    pub street_name: String,
}

impl From<&Street> for StreetDto {
    fn from(street: &Street) -> Self {
        Self {
            locality_id: street.locality_id.clone(),
            street_id: street.street_id.clone(),
            street_name: street.street_name.clone(),
        }
    }
}

// ============================================================================
// CATEGORIES
// ============================================================================

/// Category-level invalidation scope for response caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheTag {
    Localities,
    Streets,
}

impl CacheTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheTag::Localities => "localities",
            CacheTag::Streets => "streets",
        }
    }
}

impl fmt::Display for CacheTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of record, used in error payloads and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Locality,
    Street,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Locality => "Locality",
            EntityKind::Street => "Street",
        }
    }

    /// Key under which failed ids are reported, e.g. `failedStreetIds`.
    pub fn failed_ids_field(&self) -> String {
        format!("failed{}Ids", self.as_str())
    }

    /// The cache tag whose responses are derived from this kind of record.
    pub fn cache_tag(&self) -> CacheTag {
        match self {
            EntityKind::Locality => CacheTag::Localities,
            EntityKind::Street => CacheTag::Streets,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// BULK OUTCOME
// ============================================================================

/// Result of one bulk upsert. Never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpsertOutcome {
    pub succeeded_count: usize,
    pub failed_ids: BTreeSet<String>,
    /// Aggregate store cost reported for committed writes.
    pub cost_units: f64,
}

impl UpsertOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed_ids.is_empty()
    }
}
