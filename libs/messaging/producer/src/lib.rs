//! # Station Producer Client
//!
//! Producer side of the station pub/sub platform: register a named producer
//! on a station, publish validated payloads into it, and follow the schema
//! changes the control plane pushes for that station.
//!
//! ```text
//!   Connection ──create_producer──► producer-creations (request/reply)
//!       │                                  │ reply carries schema snapshot
//!       ▼                                  ▼
//!   SchemaRelayRegistry ◄── schema-updates.<station> ── control plane
//!       │ (per-station event ring, drained before validation)
//!       ▼
//!   Producer::produce ──validate──publish──► <station>.final ──ack──►
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod headers;
pub mod produce;
pub mod producer;
pub mod relay;
pub mod schema;
pub mod subjects;
pub mod test_utils;
pub mod validation;

pub use config::{ClientConfig, ProducerConfig};
pub use connection::Connection;
pub use error::{ProducerError, ProducerResult};
pub use headers::{Headers, CONNECTION_ID_HEADER, PRODUCED_BY_HEADER, RESERVED_HEADER_PREFIX};
pub use produce::{ProduceOptions, DEFAULT_ACK_WAIT_SEC};
pub use producer::{Producer, ProducerState};
pub use relay::{SchemaRelayRegistry, DEFAULT_SCHEMA_UPDATE_CAPACITY};
pub use schema::{SchemaUpdate, SchemaUpdateInit, SchemaVersion};
pub use validation::{
    JsonValidatorFactory, MessageValidator, Payload, SchemaDetails, SchemaState,
    ValidatorFactory, ValidatorRegistry,
};
