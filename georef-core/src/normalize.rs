//! Government feed normalization.
//!
//! The open-data API returns `{"result": {"records": [...], "total": N}}`
//! with Hebrew column names. These functions never fail: a payload that
//! cannot be trusted degrades to an empty record set plus a diagnostic the
//! caller is expected to log.

use std::collections::HashMap;

use serde_json::Value;

use crate::entities::{Locality, Street};

/// Placeholder street code the feed uses for "unknown street".
pub const DEFAULT_SENTINEL_STREET_ID: &str = "9000";

const LOCALITY_CODE: &str = "סמל_ישוב";
const LOCALITY_NAME: &str = "שם_ישוב";
const STREET_CODE: &str = "סמל_רחוב";
const STREET_NAME: &str = "שם_רחוב";

/// Why a payload produced no records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeDiagnostic {
    /// Payload is not JSON.
    Unparseable { reason: String },
    /// `result.records` is absent or not an array.
    MissingRecords,
    /// `result.total` disagrees with the delivered record count.
    TotalMismatch { reported: u64, actual: usize },
}

/// Normalized records plus what was thrown away.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized<T> {
    pub records: Vec<T>,
    pub diagnostic: Option<NormalizeDiagnostic>,
    /// Records removed by validation or sentinel filtering.
    pub dropped: usize,
}

impl<T> Normalized<T> {
    fn rejected(diagnostic: NormalizeDiagnostic) -> Self {
        Self {
            records: Vec::new(),
            diagnostic: Some(diagnostic),
            dropped: 0,
        }
    }

    /// Emit the diagnostic, if any, as a warning.
    pub fn log_diagnostic(&self, source: &str) {
        match &self.diagnostic {
            Some(NormalizeDiagnostic::Unparseable { reason }) => {
                tracing::error!(source, reason = %reason, "Failed to parse feed payload");
            }
            Some(NormalizeDiagnostic::MissingRecords) => {
                tracing::warn!(source, "No 'records' field found in the feed payload");
            }
            Some(NormalizeDiagnostic::TotalMismatch { reported, actual }) => {
                tracing::warn!(
                    source,
                    reported,
                    actual,
                    "Reported total does not match delivered records, discarding batch"
                );
            }
            None => {}
        }
    }
}

fn records_of(payload: &str) -> Result<(Vec<Value>, u64), NormalizeDiagnostic> {
    let root: Value = serde_json::from_str(payload).map_err(|e| {
        NormalizeDiagnostic::Unparseable {
            reason: e.to_string(),
        }
    })?;
    let result = root.get("result");
    let records = result
        .and_then(|r| r.get("records"))
        .and_then(Value::as_array)
        .ok_or(NormalizeDiagnostic::MissingRecords)?;
    let total = result
        .and_then(|r| r.get("total"))
        .and_then(|t| match t {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
        .unwrap_or(0);
    Ok((records.clone(), total))
}

/// Read a field as a trimmed string; numbers and booleans are stringified.
fn text(record: &Value, field: &str) -> String {
    match record.get(field) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

/// Parse a localities payload.
pub fn normalize_localities(payload: &str) -> Normalized<Locality> {
    let (records, _) = match records_of(payload) {
        Ok(parsed) => parsed,
        Err(diagnostic) => return Normalized::rejected(diagnostic),
    };

    let records = records
        .iter()
        .map(|r| Locality::new(text(r, LOCALITY_CODE), text(r, LOCALITY_NAME)))
        .collect();

    Normalized {
        records,
        diagnostic: None,
        dropped: 0,
    }
}

/// Parse a streets payload.
///
/// The whole batch is discarded when `result.total` disagrees with the
/// number of records, since a short page means upstream truncation. In any
/// locality with more than one street, records carrying `sentinel` as their
/// street code are removed.
pub fn normalize_streets(payload: &str, sentinel: &str) -> Normalized<Street> {
    let (records, total) = match records_of(payload) {
        Ok(parsed) => parsed,
        Err(diagnostic) => return Normalized::rejected(diagnostic),
    };

    if total != records.len() as u64 {
        return Normalized::rejected(NormalizeDiagnostic::TotalMismatch {
            reported: total,
            actual: records.len(),
        });
    }

    let streets: Vec<Street> = records
        .iter()
        .map(|r| Street::new(text(r, LOCALITY_CODE), text(r, STREET_CODE), text(r, STREET_NAME)))
        .filter(Street::is_complete)
        .collect();

    let mut per_locality: HashMap<&str, usize> = HashMap::new();
    for street in &streets {
        *per_locality.entry(street.locality_id.as_str()).or_default() += 1;
    }
    let keep: Vec<bool> = streets
        .iter()
        .map(|s| {
            !(s.street_id == sentinel
                && per_locality.get(s.locality_id.as_str()).copied().unwrap_or(0) > 1)
        })
        .collect();

    let kept: Vec<Street> = streets
        .iter()
        .zip(keep)
        .filter_map(|(street, keep)| keep.then(|| street.clone()))
        .collect();

    Normalized {
        dropped: records.len() - kept.len(),
        records: kept,
        diagnostic: None,
    }
}
