//! Network Layer Message Interface
//!
//! The transport only moves subject-addressed byte payloads with an attached
//! header multimap. It does NOT interpret headers, validate payloads against
//! schemas, or know anything about producers and stations; those rules live
//! in the client layer above it.

use bytes::Bytes;
use std::collections::HashMap;

/// Header multimap carried by a bus message (key -> ordered values)
pub type HeaderMap = HashMap<String, Vec<String>>;

/// A single message on the bus
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BusMessage {
    /// Subject the message is published to
    pub subject: String,
    /// Transport-level headers
    pub headers: HeaderMap,
    /// Opaque payload
    pub payload: Bytes,
}

impl BusMessage {
    /// Create a message without headers
    pub fn new(subject: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            subject: subject.into(),
            headers: HeaderMap::new(),
            payload: payload.into(),
        }
    }

    /// Attach a header map, replacing any existing headers
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// First value stored under a header key
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Payload size in bytes
    pub fn size(&self) -> usize {
        self.payload.len()
    }
}
