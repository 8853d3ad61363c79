//! Error types for georef

use std::collections::BTreeSet;

use thiserror::Error;

use crate::entities::EntityKind;

/// Document store failures as reported by a store adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store rate limited the request")]
    RateLimited { retry_after_ms: Option<u64> },

    #[error("Store overloaded: {reason}")]
    Overloaded { reason: String },

    #[error("Store temporarily unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Store rejected record {id}: {reason}")]
    Rejected { id: String, reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Store backend failure: {reason}")]
    Backend { reason: String },

    #[error("Store operation canceled")]
    Canceled,
}

impl StoreError {
    /// Rate limiting, overload and unavailability are worth another attempt.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::RateLimited { .. }
                | StoreError::Overloaded { .. }
                | StoreError::Unavailable { .. }
        )
    }
}

/// Input validation failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all georef errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GeoError {
    #[error("{entity} not found: {key}")]
    NotFound { entity: EntityKind, key: String },

    #[error("Failed to upsert {count} {entity_type} record(s)", count = .failed_ids.len())]
    PartialUpsertFailure {
        entity_type: EntityKind,
        failed_ids: BTreeSet<String>,
        /// Records of the same batch that were written.
        committed: usize,
    },

    #[error("Store error: {0}")]
    Store(StoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Operation canceled")]
    Canceled,
}

impl GeoError {
    pub fn not_found(entity: EntityKind, key: impl Into<String>) -> Self {
        GeoError::NotFound {
            entity,
            key: key.into(),
        }
    }

    pub fn is_canceled(&self) -> bool {
        matches!(self, GeoError::Canceled)
    }
}

/// A canceled store call is reported as a cancellation, never as a store fault.
impl From<StoreError> for GeoError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Canceled => GeoError::Canceled,
            other => GeoError::Store(other),
        }
    }
}

/// Result type for georef operations.
pub type GeoResult<T> = Result<T, GeoError>;
