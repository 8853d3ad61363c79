//! Partition-scoped document keys.
//!
//! A `DocumentKey` can only be built from a container, a partition key and a
//! document id, so every store lookup is partition-qualified by construction.

/// Separator byte between key segments. Never appears in UTF-8 text.
const SEPARATOR: u8 = 0xFF;

/// Key of one document inside a container partition.
///
/// # Binary Format
///
/// `[container][0xFF][partition_key][0xFF][id]`
///
/// Keys sort by container, then partition, so a prefix scan over
/// `[container][0xFF][partition_key][0xFF]` visits exactly one partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentKey {
    inner: DocumentKeyInner,
}

/// Private inner struct - prevents external construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct DocumentKeyInner {
    container: String,
    partition_key: String,
    id: String,
}

impl DocumentKey {
    pub fn new(
        container: impl Into<String>,
        partition_key: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            inner: DocumentKeyInner {
                container: container.into(),
                partition_key: partition_key.into(),
                id: id.into(),
            },
        }
    }

    pub fn container(&self) -> &str {
        &self.inner.container
    }

    pub fn partition_key(&self) -> &str {
        &self.inner.partition_key
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Self::partition_prefix(&self.inner.container, &self.inner.partition_key);
        bytes.extend_from_slice(self.inner.id.as_bytes());
        bytes
    }

    /// Decode a key; `None` unless it has exactly three UTF-8 segments.
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let mut parts = bytes.split(|b| *b == SEPARATOR);
        let container = std::str::from_utf8(parts.next()?).ok()?;
        let partition_key = std::str::from_utf8(parts.next()?).ok()?;
        let id = std::str::from_utf8(parts.next()?).ok()?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(container, partition_key, id))
    }

    /// Prefix shared by every key in a container.
    pub fn container_prefix(container: &str) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(container.len() + 1);
        bytes.extend_from_slice(container.as_bytes());
        bytes.push(SEPARATOR);
        bytes
    }

    /// Prefix shared by every key in one partition of a container.
    pub fn partition_prefix(container: &str, partition_key: &str) -> Vec<u8> {
        let mut bytes = Self::container_prefix(container);
        bytes.extend_from_slice(partition_key.as_bytes());
        bytes.push(SEPARATOR);
        bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_partition_prefix_does_not_bleed() {
        let short = DocumentKey::partition_prefix("streets", "7");
        let key = DocumentKey::new("streets", "70", "1").encode();
        assert!(!key.starts_with(&short));
        let exact = DocumentKey::partition_prefix("streets", "70");
        assert!(key.starts_with(&exact));
    }

    #[test]
    fn test_container_prefix() {
        let key = DocumentKey::new("localities", "3000", "3000").encode();
        assert!(key.starts_with(&DocumentKey::container_prefix("localities")));
        assert!(!key.starts_with(&DocumentKey::container_prefix("streets")));
    }

    #[test]
    fn test_decode_rejects_malformed() {
        assert!(DocumentKey::decode(b"no-separators").is_none());
        assert!(DocumentKey::decode(&[b'a', SEPARATOR, b'b']).is_none());
        assert!(DocumentKey::decode(&[b'a', SEPARATOR, b'b', SEPARATOR, b'c', SEPARATOR]).is_none());
    }

    proptest! {
        #[test]
        fn prop_encode_decode(container in "[a-z]{1,12}", partition in "[0-9]{0,6}", id in "\\PC{0,12}") {
            let key = DocumentKey::new(container, partition, id);
            prop_assert_eq!(DocumentKey::decode(&key.encode()), Some(key));
        }
    }
}
