//! In-process bus transport
//!
//! Exact-subject pub/sub, request/reply through registered responders, and
//! publish acknowledgements driven by a configurable [`AckPolicy`]. Every
//! published message and request is recorded so callers can inspect what
//! went over the wire.

use super::{validate_subject, PublishAck, Subscription, SubscriptionId, Transport};
use crate::{BusMessage, Result, TransportError};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Request handler: returns the reply body, or `None` to leave the request unanswered
pub type Responder = Arc<dyn Fn(&BusMessage) -> Option<Bytes> + Send + Sync>;

/// How the in-process broker acknowledges publishes
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AckPolicy {
    /// Ack as soon as the message is accepted
    #[default]
    Immediate,
    /// Ack after a delay; a delay beyond the stall-wait times out instead
    Delayed(Duration),
    /// Never ack; every publish times out after its stall-wait
    Never,
    /// Negative ack with the given reason
    Reject(String),
}

/// Cheaply cloneable handle to an in-process broker
#[derive(Clone)]
pub struct MemoryTransport {
    inner: Arc<Inner>,
}

struct Inner {
    connected: AtomicBool,
    next_subscription_id: AtomicU64,
    subscriptions: DashMap<SubscriptionId, (String, mpsc::UnboundedSender<BusMessage>)>,
    responders: DashMap<String, Responder>,
    published: Mutex<Vec<BusMessage>>,
    requests: Mutex<Vec<BusMessage>>,
    ack_policy: Mutex<AckPolicy>,
    reject_next_publish: Mutex<Option<String>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                connected: AtomicBool::new(true),
                next_subscription_id: AtomicU64::new(1),
                subscriptions: DashMap::new(),
                responders: DashMap::new(),
                published: Mutex::new(Vec::new()),
                requests: Mutex::new(Vec::new()),
                ack_policy: Mutex::new(AckPolicy::Immediate),
                reject_next_publish: Mutex::new(None),
            }),
        }
    }

    /// Change how subsequent publishes are acknowledged
    pub fn set_ack_policy(&self, policy: AckPolicy) {
        *self.inner.ack_policy.lock() = policy;
    }

    /// Fail the next publish at submission time, before any ack wait
    pub fn reject_next_publish(&self, reason: impl Into<String>) {
        *self.inner.reject_next_publish.lock() = Some(reason.into());
    }

    /// Serve requests on `subject` with the given handler
    pub fn register_responder<F>(&self, subject: impl Into<String>, responder: F)
    where
        F: Fn(&BusMessage) -> Option<Bytes> + Send + Sync + 'static,
    {
        self.inner
            .responders
            .insert(subject.into(), Arc::new(responder));
    }

    /// Stop serving requests on `subject`
    pub fn remove_responder(&self, subject: &str) -> bool {
        self.inner.responders.remove(subject).is_some()
    }

    /// Deliver a message to current subscribers of its subject.
    ///
    /// Returns the number of subscribers reached. Does not record the message
    /// or produce an acknowledgement.
    pub fn deliver(&self, message: &BusMessage) -> usize {
        let mut delivered = 0;
        for entry in self.inner.subscriptions.iter() {
            let (subject, sender) = entry.value();
            if subject == &message.subject && sender.send(message.clone()).is_ok() {
                delivered += 1;
            }
        }
        trace!(subject = %message.subject, delivered, "delivered bus message");
        delivered
    }

    /// All messages published to `subject`, in publish order
    pub fn published(&self, subject: &str) -> Vec<BusMessage> {
        self.inner
            .published
            .lock()
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }

    /// Total number of published messages across all subjects
    pub fn published_count(&self) -> usize {
        self.inner.published.lock().len()
    }

    /// All requests sent to `subject`, in send order
    pub fn requests(&self, subject: &str) -> Vec<BusMessage> {
        self.inner
            .requests
            .lock()
            .iter()
            .filter(|m| m.subject == subject)
            .cloned()
            .collect()
    }

    /// Number of active subscriptions on `subject`
    pub fn subscription_count(&self, subject: &str) -> usize {
        self.inner
            .subscriptions
            .iter()
            .filter(|entry| entry.value().0 == subject)
            .count()
    }

    /// Close the transport; pending subscriptions end and every later operation fails
    pub fn close(&self) {
        self.inner.connected.store(false, Ordering::SeqCst);
        self.inner.subscriptions.clear();
        debug!("memory transport closed");
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.inner.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(TransportError::Closed)
        }
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport")
            .field("connected", &self.inner.connected.load(Ordering::Relaxed))
            .field("subscriptions", &self.inner.subscriptions.len())
            .field("responders", &self.inner.responders.len())
            .finish()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn publish(&self, message: BusMessage, stall_wait: Duration) -> Result<PublishAck> {
        self.ensure_connected()?;
        validate_subject(&message.subject)?;

        if let Some(reason) = self.inner.reject_next_publish.lock().take() {
            return Err(TransportError::publish_rejected(&message.subject, reason));
        }

        self.deliver(&message);
        let subject = message.subject.clone();
        self.inner.published.lock().push(message);

        let (tx, ack) = PublishAck::channel(subject.clone());
        let policy = self.inner.ack_policy.lock().clone();
        let timeout_ms = stall_wait.as_millis() as u64;

        match policy {
            AckPolicy::Immediate => {
                let _ = tx.send(Ok(()));
            }
            AckPolicy::Reject(reason) => {
                let _ = tx.send(Err(TransportError::publish_rejected(subject, reason)));
            }
            AckPolicy::Delayed(delay) => {
                tokio::spawn(async move {
                    if delay <= stall_wait {
                        tokio::time::sleep(delay).await;
                        let _ = tx.send(Ok(()));
                    } else {
                        tokio::time::sleep(stall_wait).await;
                        let _ = tx.send(Err(TransportError::ack_timeout(subject, timeout_ms)));
                    }
                });
            }
            AckPolicy::Never => {
                tokio::spawn(async move {
                    tokio::time::sleep(stall_wait).await;
                    let _ = tx.send(Err(TransportError::ack_timeout(subject, timeout_ms)));
                });
            }
        }

        Ok(ack)
    }

    async fn request(&self, subject: &str, payload: Bytes, timeout: Duration) -> Result<Bytes> {
        self.ensure_connected()?;
        validate_subject(subject)?;

        let message = BusMessage::new(subject, payload);
        self.inner.requests.lock().push(message.clone());

        let responder = self
            .inner
            .responders
            .get(subject)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TransportError::no_responders(subject))?;

        match responder(&message) {
            Some(reply) => Ok(reply),
            None => {
                tokio::time::sleep(timeout).await;
                Err(TransportError::timeout(
                    format!("request on '{}'", subject),
                    timeout.as_millis() as u64,
                ))
            }
        }
    }

    async fn subscribe(&self, subject: &str) -> Result<Subscription> {
        self.ensure_connected()?;
        validate_subject(subject)?;

        let id = self
            .inner
            .next_subscription_id
            .fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .subscriptions
            .insert(id, (subject.to_string(), tx));

        debug!(subject, id, "subscribed");
        Ok(Subscription::new(id, subject, rx))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.ensure_connected()?;
        match self.inner.subscriptions.remove(&id) {
            Some(_) => {
                debug!(id, "unsubscribed");
                Ok(())
            }
            None => Err(TransportError::SubscriptionNotFound(id)),
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::SeqCst)
    }
}
