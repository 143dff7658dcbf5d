//! Unified Transport Layer
//!
//! Abstraction over the pub/sub bus the client runs on. A transport offers
//! three primitives: publish with a delivery acknowledgement bounded by a
//! stall-wait, request/reply, and subject subscriptions. Connection dialing,
//! reconnects and retries are the transport's business, not its callers'.

use crate::{BusMessage, Result, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use std::fmt;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

pub mod memory;

pub use memory::{AckPolicy, MemoryTransport, Responder};

/// Identifier of an active subscription
pub type SubscriptionId = u64;

/// Unified Transport trait for all transport implementations
#[async_trait]
pub trait Transport: Send + Sync + fmt::Debug {
    /// Submit a message for publication.
    ///
    /// Returns once the transport accepted the write. The returned
    /// [`PublishAck`] resolves when the broker acknowledges delivery, or with
    /// an error when the broker rejects it or `stall_wait` elapses first.
    async fn publish(&self, message: BusMessage, stall_wait: Duration) -> Result<PublishAck>;

    /// Publish and wait for the acknowledgement
    async fn publish_and_wait(&self, message: BusMessage, stall_wait: Duration) -> Result<()> {
        self.publish(message, stall_wait).await?.wait().await
    }

    /// Send a request and wait for a single reply
    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Bytes>;

    /// Subscribe to a subject
    async fn subscribe(&self, subject: &str) -> Result<Subscription>;

    /// Cancel a subscription
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;

    /// Check if the transport still accepts operations
    fn is_connected(&self) -> bool;
}

/// Pending delivery acknowledgement for a submitted publish
#[derive(Debug)]
pub struct PublishAck {
    subject: String,
    receiver: oneshot::Receiver<Result<()>>,
}

impl PublishAck {
    /// Create an ack handle plus the sender the transport resolves it with
    pub fn channel(subject: impl Into<String>) -> (oneshot::Sender<Result<()>>, Self) {
        let (tx, rx) = oneshot::channel();
        (
            tx,
            Self {
                subject: subject.into(),
                receiver: rx,
            },
        )
    }

    /// Subject of the publish this ack belongs to
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Wait for the broker's verdict.
    ///
    /// A transport that drops the sender without resolving is reported as closed.
    pub async fn wait(self) -> Result<()> {
        match self.receiver.await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Closed),
        }
    }
}

/// Stream of messages delivered for one subscribed subject
#[derive(Debug)]
pub struct Subscription {
    id: SubscriptionId,
    subject: String,
    receiver: mpsc::UnboundedReceiver<BusMessage>,
}

impl Subscription {
    pub fn new(
        id: SubscriptionId,
        subject: impl Into<String>,
        receiver: mpsc::UnboundedReceiver<BusMessage>,
    ) -> Self {
        Self {
            id,
            subject: subject.into(),
            receiver,
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Next message in publish order; `None` once the transport dropped the subscription
    pub async fn next(&mut self) -> Option<BusMessage> {
        self.receiver.recv().await
    }
}

pub(crate) fn validate_subject(subject: &str) -> Result<()> {
    if subject.is_empty() || subject.chars().any(char::is_whitespace) {
        return Err(TransportError::InvalidSubject(subject.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_ack_resolution() {
        let (tx, ack) = PublishAck::channel("orders.final");
        assert_eq!(ack.subject(), "orders.final");
        tx.send(Ok(())).unwrap();
        assert!(ack.wait().await.is_ok());
    }

    #[tokio::test]
    async fn test_dropped_ack_reports_closed() {
        let (tx, ack) = PublishAck::channel("orders.final");
        drop(tx);
        assert!(matches!(ack.wait().await, Err(TransportError::Closed)));
    }

    #[test]
    fn test_subject_validation() {
        assert!(validate_subject("orders.final").is_ok());
        assert!(validate_subject("").is_err());
        assert!(validate_subject("bad subject").is_err());
    }
}
