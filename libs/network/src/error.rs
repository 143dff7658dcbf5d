//! Transport Error Types
//!
//! Error handling for the bus transport boundary: publish submission and
//! acknowledgement, request/reply, and subscription management.

use thiserror::Error;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// The transport was closed and accepts no further operations
    #[error("Transport closed")]
    Closed,

    /// Request sent to a subject nobody serves
    #[error("No responders available for subject '{subject}'")]
    NoResponders { subject: String },

    /// Request/reply or other bounded operation timed out
    #[error("Timeout error: {operation} exceeded {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Delivery acknowledgement did not arrive within the stall-wait bound
    #[error("Ack timeout: publish to '{subject}' not acknowledged within {timeout_ms}ms")]
    AckTimeout { subject: String, timeout_ms: u64 },

    /// The broker refused the publish (at submission or acknowledgement time)
    #[error("Publish to '{subject}' rejected: {reason}")]
    PublishRejected { subject: String, reason: String },

    /// Unsubscribe for an id the transport does not know
    #[error("Subscription {0} not found")]
    SubscriptionNotFound(u64),

    /// Empty or malformed subject
    #[error("Invalid subject: '{0}'")]
    InvalidSubject(String),
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create an ack timeout error
    pub fn ack_timeout(subject: impl Into<String>, timeout_ms: u64) -> Self {
        Self::AckTimeout {
            subject: subject.into(),
            timeout_ms,
        }
    }

    /// Create a publish rejection error
    pub fn publish_rejected(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::PublishRejected {
            subject: subject.into(),
            reason: reason.into(),
        }
    }

    /// Create a no-responders error
    pub fn no_responders(subject: impl Into<String>) -> Self {
        Self::NoResponders {
            subject: subject.into(),
        }
    }

    /// Check if this error is worth retrying by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::AckTimeout { .. } | Self::NoResponders { .. }
        )
    }

    /// Check if the error stems from a closed transport
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
