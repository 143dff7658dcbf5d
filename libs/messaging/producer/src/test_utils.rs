//! In-process control plane for tests and local runs
//!
//! Serves `producer-creations` and `producer-destructions` on a
//! [`MemoryTransport`] and pushes schema updates the way the broker does.

use crate::connection::Connection;
use crate::producer::{CreateProducerRequest, CreateProducerResponse, DestroyProducerRequest};
use crate::schema::{SchemaUpdate, SchemaUpdateInit, SchemaVersion};
use crate::subjects::{
    internal_station_name, schema_updates_subject, PRODUCER_CREATIONS_SUBJECT,
    PRODUCER_DESTRUCTIONS_SUBJECT,
};
use crate::validation::JSON_SCHEMA_TYPE;
use bytes::Bytes;
use network::{BusMessage, MemoryTransport};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct ControlPlaneState {
    schemas: HashMap<String, SchemaUpdateInit>,
    reject_creations: Option<String>,
    reject_destructions: Option<String>,
    created: Vec<CreateProducerRequest>,
    destroyed: Vec<DestroyProducerRequest>,
}

/// Mock broker control plane bound to a memory transport
#[derive(Clone)]
pub struct MockControlPlane {
    bus: MemoryTransport,
    state: Arc<Mutex<ControlPlaneState>>,
}

impl MockControlPlane {
    /// Register the creation and destruction responders on `bus`
    pub fn install(bus: &MemoryTransport) -> Self {
        let state = Arc::new(Mutex::new(ControlPlaneState::default()));

        let creations = Arc::clone(&state);
        bus.register_responder(PRODUCER_CREATIONS_SUBJECT, move |msg: &BusMessage| {
            let response = match serde_json::from_slice::<CreateProducerRequest>(&msg.payload) {
                Ok(request) => {
                    let mut state = creations.lock();
                    match state.reject_creations.clone() {
                        Some(reason) => CreateProducerResponse {
                            error: reason,
                            ..Default::default()
                        },
                        None => {
                            let schema = state
                                .schemas
                                .get(&internal_station_name(&request.station_name))
                                .cloned()
                                .unwrap_or_default();
                            state.created.push(request);
                            CreateProducerResponse {
                                schema_update: schema,
                                error: String::new(),
                            }
                        }
                    }
                }
                Err(e) => CreateProducerResponse {
                    error: format!("malformed creation request: {}", e),
                    ..Default::default()
                },
            };
            serde_json::to_vec(&response).ok().map(Bytes::from)
        });

        let destructions = Arc::clone(&state);
        bus.register_responder(PRODUCER_DESTRUCTIONS_SUBJECT, move |msg: &BusMessage| {
            let reply = match serde_json::from_slice::<DestroyProducerRequest>(&msg.payload) {
                Ok(request) => {
                    let mut state = destructions.lock();
                    match state.reject_destructions.clone() {
                        Some(reason) => reason,
                        None => {
                            state.destroyed.push(request);
                            String::new()
                        }
                    }
                }
                Err(e) => format!("malformed destruction request: {}", e),
            };
            Some(Bytes::from(reply))
        });

        Self {
            bus: bus.clone(),
            state,
        }
    }

    pub fn transport(&self) -> &MemoryTransport {
        &self.bus
    }

    /// Schema snapshot returned to producers created on `station` from now on
    pub fn set_schema(&self, station: &str, schema: SchemaUpdateInit) {
        self.state
            .lock()
            .schemas
            .insert(internal_station_name(station), schema);
    }

    pub fn reject_creations(&self, reason: impl Into<String>) {
        self.state.lock().reject_creations = Some(reason.into());
    }

    pub fn accept_creations(&self) {
        self.state.lock().reject_creations = None;
    }

    pub fn reject_destructions(&self, reason: impl Into<String>) {
        self.state.lock().reject_destructions = Some(reason.into());
    }

    pub fn created(&self) -> Vec<CreateProducerRequest> {
        self.state.lock().created.clone()
    }

    pub fn destroyed(&self) -> Vec<DestroyProducerRequest> {
        self.state.lock().destroyed.clone()
    }

    /// Push a schema update on the station's control subject and remember it
    /// for later creations. Returns the number of relays reached.
    pub fn push_schema_update(&self, station: &str, update: &SchemaUpdate) -> usize {
        {
            let mut state = self.state.lock();
            let key = internal_station_name(station);
            match update {
                SchemaUpdate::Init(init) => {
                    state.schemas.insert(key, init.clone());
                }
                SchemaUpdate::Drop => {
                    state.schemas.remove(&key);
                }
            }
        }

        match update.encode() {
            Ok(payload) => self
                .bus
                .deliver(&BusMessage::new(schema_updates_subject(station), payload)),
            Err(e) => {
                tracing::error!("Failed to encode schema update in test control plane: {}", e);
                0
            }
        }
    }
}

/// Single-version `json` schema snapshot
pub fn json_schema(name: &str, descriptor: &str) -> SchemaUpdateInit {
    SchemaUpdateInit {
        schema_name: name.to_string(),
        versions: vec![SchemaVersion {
            version_number: 1,
            descriptor: descriptor.to_string(),
            message_struct_name: String::new(),
        }],
        active_version_index: 0,
        schema_type: JSON_SCHEMA_TYPE.to_string(),
    }
}

/// Drain schema events for `station` until `count` arrived or `timeout` elapsed
pub async fn wait_for_schema_updates(
    connection: &Connection,
    station: &str,
    count: usize,
    timeout: Duration,
) -> Vec<SchemaUpdate> {
    let deadline = tokio::time::Instant::now() + timeout;
    let mut events = Vec::new();

    loop {
        if let Ok(drained) = connection.drain_schema_updates(station).await {
            events.extend(drained);
        }
        if events.len() >= count || tokio::time::Instant::now() >= deadline {
            return events;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
