//! # Message Production Pipeline
//!
//! Per message: stamp provenance headers, validate against the station's
//! current schema, publish to `<station>.final` with the ack-wait as stall
//! bound, then either return right after submission (async mode) or wait for
//! the broker's acknowledgement. No timeout is layered on top of the ack-wait
//! and nothing is retried here.

use crate::headers::Headers;
use crate::producer::{Producer, ProducerState};
use crate::subjects::station_data_subject;
use crate::validation::{Payload, SchemaState};
use crate::{ProducerError, ProducerResult};
use bytes::Bytes;
use network::BusMessage;
use std::time::Duration;
use tracing::debug;

/// Default bound on waiting for a delivery acknowledgement
pub const DEFAULT_ACK_WAIT_SEC: u64 = 15;

/// Effective configuration for one produce call
#[derive(Debug, Clone, PartialEq)]
pub struct ProduceOptions {
    pub payload: Payload,
    /// Seconds to wait for the broker's ack (also the publish stall bound)
    pub ack_wait_sec: u64,
    pub headers: Headers,
    /// Return after submission instead of waiting for the ack
    pub async_produce: bool,
}

impl ProduceOptions {
    pub fn new(payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            ack_wait_sec: DEFAULT_ACK_WAIT_SEC,
            headers: Headers::new(),
            async_produce: false,
        }
    }

    pub fn ack_wait_sec(mut self, seconds: u64) -> Self {
        self.ack_wait_sec = seconds;
        self
    }

    pub fn headers(mut self, headers: Headers) -> Self {
        self.headers = headers;
        self
    }

    pub fn async_produce(mut self, enabled: bool) -> Self {
        self.async_produce = enabled;
        self
    }

    pub fn ack_wait(&self) -> Duration {
        Duration::from_secs(self.ack_wait_sec)
    }
}

impl Producer {
    /// Produce one message with default options
    pub async fn produce_payload(&self, payload: impl Into<Payload>) -> ProducerResult<()> {
        self.produce(ProduceOptions::new(payload)).await
    }

    /// Validate and publish a message into the producer's station
    pub async fn produce(&self, options: ProduceOptions) -> ProducerResult<()> {
        if self.state() == ProducerState::Destroyed {
            return Err(ProducerError::ProducerDestroyed {
                name: self.name.clone(),
            });
        }

        let ProduceOptions {
            payload,
            ack_wait_sec,
            mut headers,
            async_produce,
        } = options;

        headers.inject_provenance(self.connection.connection_id(), &self.name);
        let data = self.validate_payload(&payload).await?;

        let message = BusMessage {
            subject: station_data_subject(&self.station),
            headers: headers.into_map(),
            payload: data,
        };
        let stall_wait = Duration::from_secs(ack_wait_sec);

        debug!(producer = %self.name, subject = %message.subject, bytes = message.size(), "Publishing");
        let ack = self
            .connection
            .transport()
            .publish(message, stall_wait)
            .await?;

        if async_produce {
            debug!(producer = %self.name, station = %self.station, "Submitted without waiting for ack");
            return Ok(());
        }

        ack.wait().await?;
        Ok(())
    }

    async fn validate_payload(&self, payload: &Payload) -> ProducerResult<Bytes> {
        match self.connection.schema_state(&self.station).await? {
            SchemaState::None => match payload {
                Payload::Bytes(bytes) => Ok(bytes.clone()),
                other => Err(ProducerError::UnsupportedMessageType { kind: other.kind() }),
            },
            SchemaState::Active(details) => details.validate(payload),
            SchemaState::Unusable(reason) => Err(ProducerError::SchemaUnavailable {
                station: self.station.clone(),
                reason,
            }),
        }
    }
}
