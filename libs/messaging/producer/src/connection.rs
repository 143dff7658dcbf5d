//! Client connection: identity, transport handle, and the station relay map
//! shared by every producer created through it.

use crate::config::ClientConfig;
use crate::relay::SchemaRelayRegistry;
use crate::schema::SchemaUpdate;
use crate::validation::{SchemaState, ValidatorFactory, ValidatorRegistry};
use crate::ProducerResult;
use bytes::Bytes;
use network::Transport;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Cheaply cloneable connection handle
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: String,
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    validators: Arc<ValidatorRegistry>,
    relays: SchemaRelayRegistry,
}

impl Connection {
    /// Connect with the built-in validators
    pub fn new(transport: Arc<dyn Transport>, config: ClientConfig) -> ProducerResult<Self> {
        Self::with_validators(transport, config, ValidatorRegistry::new())
    }

    pub fn with_validators(
        transport: Arc<dyn Transport>,
        config: ClientConfig,
        validators: ValidatorRegistry,
    ) -> ProducerResult<Self> {
        config.validate()?;

        let id = config
            .connection_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let validators = Arc::new(validators);
        let relays = SchemaRelayRegistry::new(
            Arc::clone(&transport),
            Arc::clone(&validators),
            config.schema_update_capacity,
        );

        info!(connection_id = %id, "Station client connection ready");
        Ok(Self {
            inner: Arc::new(ConnectionInner {
                id,
                config,
                transport,
                validators,
                relays,
            }),
        })
    }

    pub fn connection_id(&self) -> &str {
        &self.inner.id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Register or replace the validator factory for a schema type
    pub fn register_validator<F>(&self, schema_type: impl Into<String>, factory: F)
    where
        F: ValidatorFactory + 'static,
    {
        self.inner.validators.register(schema_type, factory);
    }

    /// Ensure a schema update relay exists for `station`; returns its listener count
    pub async fn listen_to_schema_updates(&self, station: &str) -> ProducerResult<usize> {
        self.inner.relays.listen(station).await
    }

    /// Release one listener of the station's relay
    pub async fn remove_schema_updates_listener(&self, station: &str) -> ProducerResult<()> {
        self.inner.relays.remove(station).await
    }

    /// Take the schema events queued for `station`, oldest first
    pub async fn drain_schema_updates(&self, station: &str) -> ProducerResult<Vec<SchemaUpdate>> {
        self.inner.relays.drain(station).await
    }

    /// Schema the produce pipeline currently validates against for `station`
    pub async fn schema_state(&self, station: &str) -> ProducerResult<SchemaState> {
        self.inner.relays.schema_state(station).await
    }

    /// Producers currently attached to the station's relay
    pub async fn schema_listener_count(&self, station: &str) -> usize {
        self.inner.relays.listener_count(station).await
    }

    pub(crate) async fn push_schema_update(
        &self,
        station: &str,
        update: SchemaUpdate,
    ) -> ProducerResult<()> {
        self.inner.relays.push(station, update).await
    }

    /// JSON request/reply on a control subject
    pub(crate) async fn control_request<T: Serialize>(
        &self,
        subject: &str,
        body: &T,
    ) -> ProducerResult<Bytes> {
        let payload = serde_json::to_vec(body)?;
        debug!(subject, bytes = payload.len(), "Sending control request");
        let reply = self
            .inner
            .transport
            .request(subject, payload.into(), self.inner.config.request_timeout())
            .await?;
        Ok(reply)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("transport", &self.inner.transport)
            .field("validators", &self.inner.validators)
            .field("relays", &self.inner.relays)
            .finish()
    }
}
