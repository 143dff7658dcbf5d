//! Payload validation against a station's active schema
//!
//! Schema compilation is pluggable: a [`ValidatorFactory`] per schema type
//! turns the active [`SchemaVersion`] into a [`MessageValidator`]. Only a
//! small `json` factory ships with the crate; applications register their
//! own (protobuf, avro, ...) on the connection.

use crate::schema::{SchemaUpdate, SchemaUpdateInit, SchemaVersion};
use crate::{ProducerError, ProducerResult};
use bytes::Bytes;
use dashmap::DashMap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Schema type served by the built-in [`JsonValidatorFactory`]
pub const JSON_SCHEMA_TYPE: &str = "json";

/// Message body handed to the produce pipeline
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Raw bytes, the only form accepted by stations without a schema
    Bytes(Bytes),
    Text(String),
    Json(Value),
}

impl Payload {
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Bytes(_) => "bytes",
            Payload::Text(_) => "text",
            Payload::Json(_) => "json",
        }
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Payload::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload::Bytes(bytes.into())
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload::Bytes(Bytes::copy_from_slice(bytes))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload::Text(text)
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload::Text(text.to_string())
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Json(value)
    }
}

/// Checks a payload and returns the bytes to publish
pub trait MessageValidator: Send + Sync + fmt::Debug {
    fn validate(&self, payload: &Payload) -> Result<Bytes, String>;
}

/// Compiles a schema revision into a validator
pub trait ValidatorFactory: Send + Sync {
    fn compile(&self, version: &SchemaVersion) -> Result<Arc<dyn MessageValidator>, String>;
}

/// Compiled, active schema of a station
#[derive(Debug, Clone)]
pub struct SchemaDetails {
    pub schema_name: String,
    pub schema_type: String,
    pub active_version: SchemaVersion,
    pub version_count: usize,
    validator: Arc<dyn MessageValidator>,
}

impl SchemaDetails {
    pub fn validate(&self, payload: &Payload) -> ProducerResult<Bytes> {
        self.validator
            .validate(payload)
            .map_err(|reason| ProducerError::SchemaValidationFailed {
                schema: self.schema_name.clone(),
                reason,
            })
    }
}

impl fmt::Display for SchemaDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}) v{} [{} of {} versions]",
            self.schema_name,
            self.schema_type,
            self.active_version.version_number,
            self.active_version.message_struct_name,
            self.version_count
        )
    }
}

/// What the pipeline validates against for one station
#[derive(Debug, Clone, Default)]
pub enum SchemaState {
    /// No schema attached: raw bytes only
    #[default]
    None,
    Active(Arc<SchemaDetails>),
    /// A schema is attached but could not be compiled
    Unusable(String),
}

impl SchemaState {
    pub fn details(&self) -> Option<&SchemaDetails> {
        match self {
            SchemaState::Active(details) => Some(details),
            _ => None,
        }
    }
}

/// Schema type -> validator factory
pub struct ValidatorRegistry {
    factories: DashMap<String, Arc<dyn ValidatorFactory>>,
}

impl ValidatorRegistry {
    /// Registry with the built-in `json` factory
    pub fn new() -> Self {
        let registry = Self::empty();
        registry.register(JSON_SCHEMA_TYPE, JsonValidatorFactory);
        registry
    }

    pub fn empty() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    /// Register or replace the factory for a schema type
    pub fn register<F>(&self, schema_type: impl Into<String>, factory: F)
    where
        F: ValidatorFactory + 'static,
    {
        self.factories.insert(schema_type.into(), Arc::new(factory));
    }

    pub fn supports(&self, schema_type: &str) -> bool {
        self.factories.contains_key(schema_type)
    }

    /// Turn a schema update into the state the pipeline validates against
    pub fn resolve(&self, update: &SchemaUpdate) -> SchemaState {
        match update {
            SchemaUpdate::Drop => SchemaState::None,
            SchemaUpdate::Init(init) if !init.has_schema() => SchemaState::None,
            SchemaUpdate::Init(init) => match self.compile(init) {
                Ok(details) => SchemaState::Active(Arc::new(details)),
                Err(reason) => SchemaState::Unusable(reason),
            },
        }
    }

    fn compile(&self, init: &SchemaUpdateInit) -> Result<SchemaDetails, String> {
        let version = init.active_version().ok_or_else(|| {
            format!(
                "active version index {} out of range ({} versions)",
                init.active_version_index,
                init.versions.len()
            )
        })?;

        let factory = self
            .factories
            .get(&init.schema_type)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| format!("no validator registered for schema type '{}'", init.schema_type))?;

        let validator = factory.compile(version)?;
        Ok(SchemaDetails {
            schema_name: init.schema_name.clone(),
            schema_type: init.schema_type.clone(),
            active_version: version.clone(),
            version_count: init.versions.len(),
            validator,
        })
    }
}

impl Default for ValidatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ValidatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<String> = self.factories.iter().map(|e| e.key().clone()).collect();
        types.sort();
        f.debug_struct("ValidatorRegistry")
            .field("schema_types", &types)
            .finish()
    }
}

/// Built-in factory for `json` schemas.
///
/// The descriptor may be empty or a JSON object; its optional top-level
/// `required` array names fields every message object must carry.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonValidatorFactory;

impl ValidatorFactory for JsonValidatorFactory {
    fn compile(&self, version: &SchemaVersion) -> Result<Arc<dyn MessageValidator>, String> {
        if version.descriptor.trim().is_empty() {
            return Ok(Arc::new(JsonValidator::default()));
        }

        let descriptor: Value = serde_json::from_str(&version.descriptor)
            .map_err(|e| format!("invalid json descriptor: {}", e))?;

        let required = match descriptor.get("required") {
            None => Vec::new(),
            Some(Value::Array(fields)) => fields
                .iter()
                .map(|f| {
                    f.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| "'required' entries must be strings".to_string())
                })
                .collect::<Result<Vec<_>, _>>()?,
            Some(_) => return Err("'required' must be an array".to_string()),
        };

        Ok(Arc::new(JsonValidator { required }))
    }
}

#[derive(Debug, Clone, Default)]
struct JsonValidator {
    required: Vec<String>,
}

impl MessageValidator for JsonValidator {
    fn validate(&self, payload: &Payload) -> Result<Bytes, String> {
        let (value, bytes) = match payload {
            Payload::Bytes(raw) => {
                let value: Value =
                    serde_json::from_slice(raw).map_err(|e| format!("not valid json: {}", e))?;
                (value, raw.clone())
            }
            Payload::Text(text) => {
                let value: Value =
                    serde_json::from_str(text).map_err(|e| format!("not valid json: {}", e))?;
                (value, Bytes::from(text.clone()))
            }
            Payload::Json(value) => {
                let raw = serde_json::to_vec(value).map_err(|e| e.to_string())?;
                (value.clone(), Bytes::from(raw))
            }
        };

        if !self.required.is_empty() {
            let object = value
                .as_object()
                .ok_or_else(|| "expected a json object".to_string())?;
            if let Some(missing) = self.required.iter().find(|f| !object.contains_key(*f)) {
                return Err(format!("missing required field '{}'", missing));
            }
        }

        Ok(bytes)
    }
}
