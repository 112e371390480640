//! The generic request/response envelope exchanged between sources and
//! targets.
//!
//! A [`Request`] is built by a source from one inbound queue message and
//! consumed by exactly one target invocation (possibly retried; retries see
//! the same immutable value). Metadata is the sole carrier of operation
//! parameters; `data` carries the opaque business payload.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

/// Ordered string-to-string metadata map.
///
/// Keys are unique and case-sensitive. Uses `BTreeMap` for deterministic
/// ordering in logs and serialized form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, String>);

impl Metadata {
    /// Creates an empty metadata map.
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Returns the value for `key`, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns the value for `key`, or `default` if absent.
    #[must_use]
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Parses the value for `key` as an integer.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is absent or the value does not parse.
    pub fn parse_i64(&self, key: &str) -> Result<i64, MetadataError> {
        let raw = self
            .get(key)
            .ok_or_else(|| MetadataError::Missing { key: key.into() })?;
        raw.parse().map_err(|_| MetadataError::NotAnInt {
            key: key.into(),
            value: raw.into(),
        })
    }

    /// Inserts a key/value pair, replacing any previous value for the key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Builder-style insert, for fixture and connector code.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the map holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

impl fmt::Display for Metadata {
    /// Compact `k=v` rendering, used by the logging stage at `info` level.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.0 {
            if !first {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
            first = false;
        }
        Ok(())
    }
}

/// Errors from typed metadata accessors.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("missing metadata key: {key}")]
    Missing { key: String },
    #[error("metadata key {key} is not an integer: {value}")]
    NotAnInt { key: String, value: String },
}

// ---------------------------------------------------------------------------
// Request / Response
// ---------------------------------------------------------------------------

/// One unit of backend work, produced by a source per inbound message.
///
/// Immutable once dispatched into a pipeline; `Clone` is cheap (`Bytes` is
/// reference-counted), which is what lets the retry stage re-dispatch the
/// same value without copying the payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Operation parameters (e.g. `method`, per-backend options).
    #[serde(default)]
    pub metadata: Metadata,
    /// Opaque business payload.
    #[serde(default, skip_serializing_if = "Bytes::is_empty")]
    pub data: Bytes,
}

impl Request {
    /// Creates an empty request.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style metadata insert.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.set(key, value);
        self
    }

    /// Builder-style payload setter.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    /// Payload size in bytes, reported by the metrics stage.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "metadata: [{}], data: {} bytes",
            self.metadata,
            self.data.len()
        )
    }
}

/// Result of one target invocation. Symmetric to [`Request`]. A pipeline
/// call yields either a `Response` or an error, never both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Outcome parameters (e.g. `result`, backend identifiers).
    #[serde(default)]
    pub metadata: Metadata,
    /// Optional result payload.
    #[serde(default, skip_serializing_if = "Bytes::is_empty")]
    pub data: Bytes,
}

impl Response {
    /// Creates an empty response.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style metadata insert.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.set(key, value);
        self
    }

    /// Builder-style payload setter.
    #[must_use]
    pub fn with_data(mut self, data: impl Into<Bytes>) -> Self {
        self.data = data.into();
        self
    }

    /// Payload size in bytes, reported by the metrics stage.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "metadata: [{}], data: {} bytes",
            self.metadata,
            self.data.len()
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    #[test]
    fn metadata_keys_are_unique() {
        let mut md = Metadata::new();
        md.set("method", "get");
        md.set("method", "set");
        assert_eq!(md.len(), 1);
        assert_eq!(md.get("method"), Some("set"));
    }

    #[test]
    fn metadata_display_is_key_ordered() {
        let md = Metadata::new().with("b", "2").with("a", "1");
        assert_eq!(md.to_string(), "a=1,b=2");
    }

    #[test]
    fn metadata_parse_i64() {
        let md = Metadata::new().with("count", "42").with("bad", "x");
        assert_eq!(md.parse_i64("count").unwrap(), 42);
        assert!(matches!(
            md.parse_i64("bad"),
            Err(MetadataError::NotAnInt { .. })
        ));
        assert!(matches!(
            md.parse_i64("absent"),
            Err(MetadataError::Missing { .. })
        ));
    }

    #[test]
    fn request_size_tracks_payload() {
        let req = Request::new()
            .with_metadata("op", "ping")
            .with_data("hello");
        assert_eq!(req.size(), 5);
        assert_eq!(req.metadata.get("op"), Some("ping"));
    }

    #[test]
    fn request_clone_is_same_value() {
        let req = Request::new().with_metadata("op", "ping").with_data("x");
        let other = req.clone();
        assert_eq!(req, other);
    }

    #[test]
    fn request_json_round_trip() {
        let req = Request::new().with_metadata("op", "ping").with_data("x");
        let json = serde_json::to_string(&req).unwrap();
        let back: Request = serde_json::from_str(&json).unwrap();
        assert_eq!(req, back);
    }

    proptest! {
        /// Metadata display ordering is stable regardless of insertion order.
        #[test]
        fn metadata_display_deterministic(pairs in proptest::collection::vec(("[a-z]{1,8}", "[a-z0-9]{0,8}"), 0..16)) {
            let forward: Metadata = pairs.clone().into_iter().collect();
            let reverse: Metadata = pairs.into_iter().rev().collect();
            // Same key set (later duplicates win in one direction, earlier in
            // the other) may differ in values, but key ordering is always sorted.
            let keys: Vec<&str> = forward.iter().map(|(k, _)| k).collect();
            let mut sorted = keys.clone();
            sorted.sort_unstable();
            prop_assert_eq!(keys, sorted);
            let rkeys: Vec<&str> = reverse.iter().map(|(k, _)| k).collect();
            let mut rsorted = rkeys.clone();
            rsorted.sort_unstable();
            prop_assert_eq!(rkeys, rsorted);
        }
    }
}
