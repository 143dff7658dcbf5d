//! # Producer Lifecycle
//!
//! `Unregistered -> Active -> Destroyed`. A producer only reaches the caller
//! once the broker accepted its registration, and `Destroyed` is terminal.
//!
//! ## Creation handshake
//! 1. Optionally extend the name with a random hex suffix.
//! 2. Register the station's schema update relay.
//! 3. Request `producer-creations` and wait for the reply.
//! 4. A reply carrying an error string fails creation; the relay from step 2
//!    is rolled back first, and a failed rollback is reported alongside.
//! 5. The reply's schema snapshot is enqueued on the station relay as an
//!    `Init` event, ahead of any update that arrives afterwards. An update
//!    the relay forwards while the creation reply is still in flight may be
//!    queued before the snapshot, and the older snapshot then wins on drain.
//!
//! ## Destruction
//! The relay listener is released first; only when that succeeds is
//! `producer-destructions` requested. Destruction is not retryable.

use crate::config::ProducerConfig;
use crate::connection::Connection;
use crate::schema::{SchemaUpdate, SchemaUpdateInit};
use crate::subjects::{PRODUCER_CREATIONS_SUBJECT, PRODUCER_DESTRUCTIONS_SUBJECT};
use crate::validation::{SchemaDetails, SchemaState};
use crate::{ProducerError, ProducerResult};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Producer type reported to the control plane
pub const PRODUCER_TYPE_APPLICATION: &str = "application";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProducerRequest {
    pub name: String,
    pub station_name: String,
    pub connection_id: String,
    pub producer_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateProducerResponse {
    #[serde(default)]
    pub schema_update: SchemaUpdateInit,
    /// Empty on success
    #[serde(default)]
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestroyProducerRequest {
    pub name: String,
    pub station_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerState {
    Unregistered,
    Active,
    Destroyed,
}

/// A named producer registered against a station
#[derive(Debug)]
pub struct Producer {
    pub(crate) name: String,
    pub(crate) station: String,
    pub(crate) connection: Connection,
    state: Mutex<ProducerState>,
}

impl Producer {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn station(&self) -> &str {
        &self.station
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn state(&self) -> ProducerState {
        *self.state.lock()
    }

    /// Active schema of the producer's station, `None` when it has none or
    /// when the attached schema could not be compiled
    pub async fn schema_details(&self) -> ProducerResult<Option<Arc<SchemaDetails>>> {
        let state = self.connection.schema_state(&self.station).await?;
        let details = match state {
            SchemaState::Active(details) => {
                debug!(producer = %self.name, station = %self.station, schema = %details, "Station schema");
                Some(details)
            }
            SchemaState::Unusable(reason) => {
                debug!(producer = %self.name, station = %self.station, reason = %reason, "Station schema unusable");
                None
            }
            SchemaState::None => {
                debug!(producer = %self.name, station = %self.station, "Station has no schema");
                None
            }
        };
        Ok(details)
    }

    /// Release the station relay listener, then deregister from the broker
    pub async fn destroy(&self) -> ProducerResult<()> {
        {
            let mut state = self.state.lock();
            if *state != ProducerState::Active {
                return Err(ProducerError::no_active_listener(&self.station));
            }
            *state = ProducerState::Destroyed;
        }

        if let Err(e) = self
            .connection
            .remove_schema_updates_listener(&self.station)
            .await
        {
            warn!(producer = %self.name, station = %self.station, error = %e, "Failed to release schema update relay, skipping broker destroy");
            return Err(e);
        }

        let request = DestroyProducerRequest {
            name: self.name.clone(),
            station_name: self.station.clone(),
        };
        let reply = self
            .connection
            .control_request(PRODUCER_DESTRUCTIONS_SUBJECT, &request)
            .await?;
        if !reply.is_empty() {
            return Err(ProducerError::BrokerRejected(
                String::from_utf8_lossy(&reply).into_owned(),
            ));
        }

        info!(producer = %self.name, station = %self.station, "Producer destroyed");
        Ok(())
    }

    async fn register(&self) -> ProducerResult<()> {
        let request = CreateProducerRequest {
            name: self.name.clone(),
            station_name: self.station.clone(),
            connection_id: self.connection.connection_id().to_string(),
            producer_type: PRODUCER_TYPE_APPLICATION.to_string(),
        };
        let reply = self
            .connection
            .control_request(PRODUCER_CREATIONS_SUBJECT, &request)
            .await?;

        let response: CreateProducerResponse = serde_json::from_slice(&reply)?;
        if !response.error.is_empty() {
            return Err(ProducerError::BrokerRejected(response.error));
        }

        self.connection
            .push_schema_update(&self.station, SchemaUpdate::Init(response.schema_update))
            .await
    }
}

impl Connection {
    /// Register a producer named `name` on `station`
    pub async fn create_producer(
        &self,
        station: &str,
        name: &str,
        config: ProducerConfig,
    ) -> ProducerResult<Producer> {
        let name = if config.gen_unique_suffix {
            extend_name_with_random_suffix(name)
        } else {
            name.to_string()
        };

        let producer = Producer {
            name,
            station: station.to_string(),
            connection: self.clone(),
            state: Mutex::new(ProducerState::Unregistered),
        };

        self.listen_to_schema_updates(station).await?;

        if let Err(cause) = producer.register().await {
            warn!(producer = %producer.name, station, error = %cause, "Producer creation failed, rolling back schema relay");
            if let Err(rollback) = self.remove_schema_updates_listener(station).await {
                return Err(ProducerError::RollbackFailed {
                    cause: Box::new(cause),
                    rollback: Box::new(rollback),
                });
            }
            return Err(cause);
        }

        *producer.state.lock() = ProducerState::Active;
        info!(producer = %producer.name, station, connection_id = %self.connection_id(), "Producer created");
        Ok(producer)
    }
}

fn extend_name_with_random_suffix(name: &str) -> String {
    let suffix: [u8; 4] = rand::random();
    format!("{}_{}", name, hex::encode(suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_suffix_shape() {
        let name = extend_name_with_random_suffix("p2");
        let suffix = name.strip_prefix("p2_").expect("prefix kept");
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_creation_wire_format() {
        let request = CreateProducerRequest {
            name: "p1".to_string(),
            station_name: "orders".to_string(),
            connection_id: "conn-1".to_string(),
            producer_type: PRODUCER_TYPE_APPLICATION.to_string(),
        };
        let json: serde_json::Value = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "p1",
                "station_name": "orders",
                "connection_id": "conn-1",
                "producer_type": "application"
            })
        );

        let response: CreateProducerResponse = serde_json::from_str(r#"{"error":""}"#).unwrap();
        assert!(!response.schema_update.has_schema());
        assert!(response.error.is_empty());
    }
}
