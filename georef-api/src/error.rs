//! Error Types for georef API
//!
//! This module defines error handling for the HTTP tiers, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - Ordered rule tables that translate domain and gateway errors
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.

use std::collections::BTreeMap;
use std::fmt;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use georef_core::{ConfigError, GeoError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::gateway::GatewayError;

/// Body sent whenever an internal fault must not leak to the caller.
pub const GENERIC_FAILURE_MESSAGE: &str = "Something went wrong. Please try again later.";

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Client Errors (400, 404)
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Request body could not be decoded
    InvalidInput,

    /// Some records of a bulk write were not persisted
    UpsertFailed,

    /// No data exists for the requested key
    EntityNotFound,

    /// The caller abandoned the request
    RequestCanceled,

    // ========================================================================
    // Server Errors (500, 503)
    // ========================================================================
    /// Unexpected internal failure
    InternalError,

    /// A peer tier answered with an unexpected failure
    UpstreamFailed,

    /// A dependency is temporarily unable to provide data
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::ValidationFailed | ErrorCode::InvalidInput | ErrorCode::UpsertFailed => {
                StatusCode::BAD_REQUEST
            }

            ErrorCode::EntityNotFound => StatusCode::NOT_FOUND,

            // Client closed request, as popularized by nginx.
            ErrorCode::RequestCanceled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST)
            }

            ErrorCode::InternalError | ErrorCode::UpstreamFailed => {
                StatusCode::INTERNAL_SERVER_ERROR
            }

            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::UpsertFailed => "Failed to upsert some records",
            ErrorCode::EntityNotFound => "Requested data was not found",
            ErrorCode::RequestCanceled => "Request was canceled",
            ErrorCode::InternalError => GENERIC_FAILURE_MESSAGE,
            ErrorCode::UpstreamFailed => "Internal server error",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for every tier.
///
/// `extensions` are flattened into the top-level JSON object, which is how
/// partial upsert failures report `failedLocalityIds` / `failedStreetIds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Extra top-level members of the error body
    #[serde(flatten)]
    pub extensions: BTreeMap<String, Value>,
}

impl ApiError {
    /// Create a new ApiError with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            extensions: BTreeMap::new(),
        }
    }

    /// Create a new ApiError with the code's default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.default_message())
    }

    /// Add a top-level member to the error body.
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions.insert(key.into(), value);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::EntityNotFound, message)
    }

    pub fn canceled() -> Self {
        Self::from_code(ErrorCode::RequestCanceled)
    }

    /// Create an InternalError.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Create an UpstreamFailed error with the generic peer failure body.
    pub fn upstream_failed() -> Self {
        Self::from_code(ErrorCode::UpstreamFailed)
    }

    /// Create a ServiceUnavailable error.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// RULE TABLES
// ============================================================================

/// One entry of an ordered error translation table.
///
/// Tables are scanned top to bottom and the first matching rule answers;
/// anything no rule claims becomes a generic 500.
pub struct ErrorRule<E: 'static> {
    pub name: &'static str,
    pub matches: fn(&E) -> bool,
    pub respond: fn(&E) -> ApiError,
}

/// Translate `err` with the first rule in `rules` that claims it.
pub fn translate<E: fmt::Display>(rules: &[ErrorRule<E>], err: &E) -> ApiError {
    match rules.iter().find(|rule| (rule.matches)(err)) {
        Some(rule) => {
            tracing::debug!(rule = rule.name, error = %err, "Translated error");
            (rule.respond)(err)
        }
        None => {
            // Log the full error, return a generic body.
            tracing::error!(error = %err, "Unhandled error");
            ApiError::internal_error(GENERIC_FAILURE_MESSAGE)
        }
    }
}

fn is_partial_upsert(err: &GeoError) -> bool {
    matches!(err, GeoError::PartialUpsertFailure { .. })
}

fn partial_upsert_response(err: &GeoError) -> ApiError {
    match err {
        GeoError::PartialUpsertFailure {
            entity_type,
            failed_ids,
            ..
        } => ApiError::new(
            ErrorCode::UpsertFailed,
            format!("Some {} failed to upsert.", entity_type),
        )
        .with_extension(
            entity_type.failed_ids_field(),
            Value::from(failed_ids.iter().cloned().collect::<Vec<_>>()),
        ),
        _ => ApiError::from_code(ErrorCode::UpsertFailed),
    }
}

fn is_geo_not_found(err: &GeoError) -> bool {
    matches!(err, GeoError::NotFound { .. })
}

fn geo_not_found_response(err: &GeoError) -> ApiError {
    match err {
        GeoError::NotFound { entity, key } if key == "*" => {
            ApiError::not_found(format!("No {} data available", entity))
        }
        GeoError::NotFound { entity, key } => {
            ApiError::not_found(format!("No {} data available for {}", entity, key))
        }
        _ => ApiError::from_code(ErrorCode::EntityNotFound),
    }
}

fn is_geo_canceled(err: &GeoError) -> bool {
    err.is_canceled()
}

fn canceled_response<E>(_: &E) -> ApiError {
    ApiError::canceled()
}

fn is_geo_validation(err: &GeoError) -> bool {
    matches!(err, GeoError::Validation(_))
}

fn geo_validation_response(err: &GeoError) -> ApiError {
    ApiError::validation_failed(err.to_string())
}

/// Translation table for domain errors raised inside a tier.
pub static GEO_ERROR_RULES: &[ErrorRule<GeoError>] = &[
    ErrorRule {
        name: "partial_upsert",
        matches: is_partial_upsert,
        respond: partial_upsert_response,
    },
    ErrorRule {
        name: "not_found",
        matches: is_geo_not_found,
        respond: geo_not_found_response,
    },
    ErrorRule {
        name: "canceled",
        matches: is_geo_canceled,
        respond: canceled_response,
    },
    ErrorRule {
        name: "validation",
        matches: is_geo_validation,
        respond: geo_validation_response,
    },
];

fn is_gateway_not_found(err: &GatewayError) -> bool {
    matches!(err, GatewayError::NotFound { .. })
}

fn gateway_not_found_response(_: &GatewayError) -> ApiError {
    ApiError::not_found("No data available")
}

fn is_gateway_upsert_failed(err: &GatewayError) -> bool {
    matches!(err, GatewayError::UpsertFailed { .. })
}

/// Re-raise a peer's partial failure, carrying its `failed*Ids` members over.
fn gateway_upsert_response(err: &GatewayError) -> ApiError {
    let details = match err {
        GatewayError::UpsertFailed { details, .. } => details.as_ref(),
        _ => None,
    };
    let failed_fields: Vec<(&String, &Value)> = details
        .and_then(Value::as_object)
        .map(|body| {
            body.iter()
                .filter(|(key, _)| key.starts_with("failed") && key.ends_with("Ids"))
                .collect()
        })
        .unwrap_or_default();

    let subject = match failed_fields.first().map(|(key, _)| key.as_str()) {
        Some("failedLocalityIds") => "locality",
        Some("failedStreetIds") => "street",
        _ => "record",
    };
    failed_fields.into_iter().fold(
        ApiError::new(
            ErrorCode::UpsertFailed,
            format!("Failed to upsert some {} data.", subject),
        ),
        |error, (key, value)| error.with_extension(key.clone(), value.clone()),
    )
}

fn is_gateway_canceled(err: &GatewayError) -> bool {
    matches!(err, GatewayError::Canceled)
}

fn is_gateway_failure(err: &GatewayError) -> bool {
    matches!(err, GatewayError::InvocationFailed { .. })
}

fn gateway_failure_response(err: &GatewayError) -> ApiError {
    tracing::error!(error = %err, "Peer invocation failed");
    ApiError::upstream_failed()
}

/// Translation table for failures of calls to peer tiers.
pub static GATEWAY_ERROR_RULES: &[ErrorRule<GatewayError>] = &[
    ErrorRule {
        name: "not_found",
        matches: is_gateway_not_found,
        respond: gateway_not_found_response,
    },
    ErrorRule {
        name: "upsert_failed",
        matches: is_gateway_upsert_failed,
        respond: gateway_upsert_response,
    },
    ErrorRule {
        name: "canceled",
        matches: is_gateway_canceled,
        respond: canceled_response,
    },
    ErrorRule {
        name: "invocation_failed",
        matches: is_gateway_failure,
        respond: gateway_failure_response,
    },
];

// ============================================================================
// CONVERSIONS
// ============================================================================

impl From<GeoError> for ApiError {
    fn from(err: GeoError) -> Self {
        translate(GEO_ERROR_RULES, &err)
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        translate(GATEWAY_ERROR_RULES, &err)
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        tracing::error!("Configuration error: {}", err);
        ApiError::internal_error(format!("Configuration error: {}", err))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("Serialization error: {:?}", err);
        ApiError::internal_error(GENERIC_FAILURE_MESSAGE)
    }
}

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

// ============================================================================
// TESTS
// ============================================================================
