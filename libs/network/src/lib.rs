//! Network Infrastructure
//!
//! Transport boundary for the station client. The client never dials sockets
//! itself: it talks to a [`Transport`] that provides publish with delivery
//! acknowledgement, request/reply, and subject subscriptions. The crate ships
//! an in-process [`MemoryTransport`] broker for tests and local runs.

pub mod error;
pub mod message;
pub mod transports;

// Re-export commonly used types
pub use error::{Result, TransportError};
pub use message::{BusMessage, HeaderMap};
pub use transports::{
    AckPolicy, MemoryTransport, PublishAck, Responder, Subscription, SubscriptionId, Transport,
};

/// Default bound for request/reply round trips
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 5_000;
