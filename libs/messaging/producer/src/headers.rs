//! Caller-supplied message headers
//!
//! Keys under [`RESERVED_HEADER_PREFIX`] belong to the client's own
//! provenance headers and are rejected at add-time.

use crate::{ProducerError, ProducerResult};
use network::HeaderMap;

/// Prefix reserved for headers injected by the produce pipeline
pub const RESERVED_HEADER_PREFIX: &str = "$station";

/// Header carrying the connection identity of the producing client
pub const CONNECTION_ID_HEADER: &str = "$station_connectionId";

/// Header carrying the producer name
pub const PRODUCED_BY_HEADER: &str = "$station_producedBy";

/// Restricted key/value multimap attached to outgoing messages
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Headers {
    entries: HeaderMap,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject keys that start with the reserved prefix
    pub fn validate_key(key: &str) -> ProducerResult<()> {
        if key.starts_with(RESERVED_HEADER_PREFIX) {
            return Err(ProducerError::ReservedHeaderKey {
                key: key.to_string(),
                prefix: RESERVED_HEADER_PREFIX,
            });
        }
        Ok(())
    }

    /// Store `value` as the only value for `key`, replacing earlier values
    pub fn add(&mut self, key: impl Into<String>, value: impl Into<String>) -> ProducerResult<()> {
        let key = key.into();
        Self::validate_key(&key)?;
        self.entries.insert(key, vec![value.into()]);
        Ok(())
    }

    /// Builder-style [`add`](Self::add)
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> ProducerResult<Self> {
        self.add(key, value)?;
        Ok(self)
    }

    pub fn get(&self, key: &str) -> Option<&[String]> {
        self.entries.get(key).map(Vec::as_slice)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.entries.iter()
    }

    /// Stamp the provenance headers, bypassing key validation
    pub(crate) fn inject_provenance(&mut self, connection_id: &str, producer_name: &str) {
        self.entries.insert(
            CONNECTION_ID_HEADER.to_string(),
            vec![connection_id.to_string()],
        );
        self.entries.insert(
            PRODUCED_BY_HEADER.to_string(),
            vec![producer_name.to_string()],
        );
    }

    pub(crate) fn into_map(self) -> HeaderMap {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_prefix_rejected() {
        let mut headers = Headers::new();
        for key in [CONNECTION_ID_HEADER, PRODUCED_BY_HEADER, "$station", "$stationX"] {
            let err = headers.add(key, "spoofed").unwrap_err();
            assert!(matches!(err, ProducerError::ReservedHeaderKey { .. }));
        }
        assert!(headers.is_empty());
    }

    #[test]
    fn test_add_overwrites_prior_value() {
        let mut headers = Headers::new();
        headers.add("trace-id", "a").unwrap();
        headers.add("trace-id", "b").unwrap();

        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("trace-id"), Some(&["b".to_string()][..]));
    }

    #[test]
    fn test_prefix_only_matters_at_start() {
        let headers = Headers::new().with("x-$station", "ok").unwrap();
        assert!(headers.contains_key("x-$station"));
    }

    #[test]
    fn test_provenance_injection() {
        let mut headers = Headers::new().with("tenant", "acme").unwrap();
        headers.inject_provenance("conn-1", "p1");

        let map = headers.into_map();
        assert_eq!(map[CONNECTION_ID_HEADER], vec!["conn-1".to_string()]);
        assert_eq!(map[PRODUCED_BY_HEADER], vec!["p1".to_string()]);
        assert_eq!(map["tenant"], vec!["acme".to_string()]);
    }
}
