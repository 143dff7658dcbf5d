use network::TransportError;

#[derive(Debug, thiserror::Error)]
pub enum ProducerError {
    #[error("Header key '{key}' uses the reserved prefix '{prefix}'")]
    ReservedHeaderKey { key: String, prefix: &'static str },

    #[error("Unsupported message type: {kind} payloads need a station schema, only raw bytes are accepted")]
    UnsupportedMessageType { kind: &'static str },

    #[error("Schema validation failed against '{schema}': {reason}")]
    SchemaValidationFailed { schema: String, reason: String },

    #[error("Schema for station '{station}' is unusable: {reason}")]
    SchemaUnavailable { station: String, reason: String },

    #[error("Broker rejected request: {0}")]
    BrokerRejected(String),

    #[error("No active schema update listener for station '{station}'")]
    NoActiveListener { station: String },

    #[error("{cause}; rolling back the schema listener also failed: {rollback}")]
    RollbackFailed {
        cause: Box<ProducerError>,
        rollback: Box<ProducerError>,
    },

    #[error("Producer '{name}' has been destroyed")]
    ProducerDestroyed { name: String },

    #[error("Schema relay task for station '{station}' failed: {reason}")]
    RelayTask { station: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl ProducerError {
    /// Errors caused by how the caller used the API (bad header, payload, lifecycle)
    pub fn is_caller_error(&self) -> bool {
        matches!(
            self,
            ProducerError::ReservedHeaderKey { .. }
                | ProducerError::UnsupportedMessageType { .. }
                | ProducerError::SchemaValidationFailed { .. }
                | ProducerError::NoActiveListener { .. }
                | ProducerError::ProducerDestroyed { .. }
        )
    }

    /// Errors passed through unmodified from the transport
    pub fn is_transport_error(&self) -> bool {
        matches!(self, ProducerError::Transport(_))
    }

    pub fn no_active_listener(station: impl Into<String>) -> Self {
        ProducerError::NoActiveListener {
            station: station.into(),
        }
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        ProducerError::InvalidConfig(msg.into())
    }
}

pub type ProducerResult<T> = std::result::Result<T, ProducerError>;
