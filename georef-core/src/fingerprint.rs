//! Content fingerprints used as HTTP validation tokens (`ETag`).
//!
//! A fingerprint is the first [`FINGERPRINT_LEN`] characters of the base64
//! SHA-256 digest of the JSON-serialized payload, wrapped in double quotes.
//! The same payload always produces the same token.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of base64 characters kept from the digest.
pub const FINGERPRINT_LEN: usize = 16;

/// Strong validation token for a serialized payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    token: String,
}

impl Fingerprint {
    /// Fingerprint a serializable payload.
    pub fn of<T: Serialize + ?Sized>(payload: &T) -> Result<Self, serde_json::Error> {
        let bytes = serde_json::to_vec(payload)?;
        Ok(Self::of_bytes(&bytes))
    }

    /// Fingerprint an already-serialized payload.
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let encoded = STANDARD.encode(digest);
        Self {
            token: encoded[..FINGERPRINT_LEN].to_string(),
        }
    }

    /// Append a `-yyyyMMddTHHmmssZ` presentation suffix.
    pub fn with_timestamp(self, at: DateTime<Utc>) -> Self {
        Self {
            token: format!("{}-{}", self.token, at.format("%Y%m%dT%H%M%SZ")),
        }
    }

    /// Read back a token from an `ETag` header value, quoted or weak.
    pub fn from_header(value: &str) -> Option<Self> {
        let token = value
            .trim()
            .strip_prefix("W/")
            .unwrap_or(value.trim())
            .trim_matches('"');
        if token.is_empty() {
            return None;
        }
        Some(Self {
            token: token.to_string(),
        })
    }

    /// Unquoted token.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Quoted form suitable for an `ETag` header.
    pub fn header_value(&self) -> String {
        format!("\"{}\"", self.token)
    }

    /// Whether an `If-None-Match` header value names this fingerprint.
    ///
    /// Accepts `*`, comma-separated lists and weak (`W/`) validators.
    pub fn matches_if_none_match(&self, header: &str) -> bool {
        header.split(',').map(str::trim).any(|candidate| {
            candidate == "*"
                || candidate
                    .strip_prefix("W/")
                    .unwrap_or(candidate)
                    .trim_matches('"')
                    == self.token
        })
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    #[test]
    fn test_fingerprint_shape() -> Result<(), serde_json::Error> {
        let fp = Fingerprint::of(&vec!["a", "b"])?;
        assert_eq!(fp.token().len(), FINGERPRINT_LEN);
        let header = fp.header_value();
        assert!(header.starts_with('"') && header.ends_with('"'));
        assert_eq!(header, fp.to_string());
        Ok(())
    }

    #[test]
    fn test_known_digest_prefix() {
        // sha256("") = 47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU=
        let fp = Fingerprint::of_bytes(b"");
        assert_eq!(fp.token(), "47DEQpj8HBSa+/TI");
    }

    #[test]
    fn test_timestamp_suffix() {
        let at = Utc.with_ymd_and_hms(2025, 3, 9, 14, 5, 7).single();
        let Some(at) = at else {
            panic!("valid timestamp");
        };
        let fp = Fingerprint::of_bytes(b"x").with_timestamp(at);
        assert!(fp.token().ends_with("-20250309T140507Z"));
    }

    #[test]
    fn test_if_none_match_forms() {
        let fp = Fingerprint::of_bytes(b"payload");
        let quoted = fp.header_value();
        assert!(fp.matches_if_none_match(&quoted));
        assert!(fp.matches_if_none_match(&format!("W/{}", quoted)));
        assert!(fp.matches_if_none_match(&format!("\"other\", {}", quoted)));
        assert!(fp.matches_if_none_match("*"));
        assert!(!fp.matches_if_none_match("\"other\""));
    }

    #[test]
    fn test_from_header_reads_back_token() {
        let fp = Fingerprint::of_bytes(b"payload");
        assert_eq!(Fingerprint::from_header(&fp.header_value()), Some(fp.clone()));
        assert_eq!(Fingerprint::from_header(&format!("W/{}", fp.header_value())), Some(fp));
        assert_eq!(Fingerprint::from_header("\"\""), None);
    }

    proptest! {
        #[test]
        fn prop_fingerprint_is_deterministic(payload in proptest::collection::vec(any::<u8>(), 0..256)) {
            prop_assert_eq!(Fingerprint::of_bytes(&payload), Fingerprint::of_bytes(&payload));
        }

        #[test]
        fn prop_distinct_payloads_differ(a in "[a-z]{1,32}", b in "[a-z]{1,32}") {
            prop_assume!(a != b);
            prop_assert_ne!(Fingerprint::of_bytes(a.as_bytes()), Fingerprint::of_bytes(b.as_bytes()));
        }
    }
}
