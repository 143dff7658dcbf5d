//! Client and producer configuration
//!
//! `ClientConfig` is loadable from TOML:
//!
//! ```toml
//! connection_id = "billing-api-1"   # optional, a UUID v4 is generated when absent
//! request_timeout_ms = 5000         # bound for create/destroy round trips
//! schema_update_capacity = 256      # undrained schema events kept per station
//! ```

use crate::relay::DEFAULT_SCHEMA_UPDATE_CAPACITY;
use crate::{ProducerError, ProducerResult};
use network::DEFAULT_REQUEST_TIMEOUT_MS;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Connection-level settings
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Identity stamped on every produced message; generated when `None`
    pub connection_id: Option<String>,

    /// Request/reply timeout for control-plane calls, in milliseconds
    pub request_timeout_ms: u64,

    /// Undrained schema events kept per station; older ones are dropped
    pub schema_update_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connection_id: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            schema_update_capacity: DEFAULT_SCHEMA_UPDATE_CAPACITY,
        }
    }
}

impl ClientConfig {
    pub fn from_toml(toml_str: &str) -> ProducerResult<Self> {
        let config: Self = toml::from_str(toml_str)
            .map_err(|e| ProducerError::invalid_config(format!("Failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> ProducerResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProducerError::invalid_config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    pub fn to_toml(&self) -> ProducerResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| ProducerError::invalid_config(format!("Failed to serialize to TOML: {}", e)))
    }

    pub fn validate(&self) -> ProducerResult<()> {
        if self.request_timeout_ms == 0 {
            return Err(ProducerError::invalid_config(
                "request_timeout_ms must be greater than zero",
            ));
        }
        if self.schema_update_capacity == 0 {
            return Err(ProducerError::invalid_config(
                "schema_update_capacity must be greater than zero",
            ));
        }
        if matches!(&self.connection_id, Some(id) if id.trim().is_empty()) {
            return Err(ProducerError::invalid_config(
                "connection_id must not be empty when set",
            ));
        }
        Ok(())
    }

    pub fn with_connection_id(mut self, id: impl Into<String>) -> Self {
        self.connection_id = Some(id.into());
        self
    }

    /// Set the control-plane request timeout.
    ///
    /// Fails for timeouts below one millisecond; longer ones saturate.
    pub fn with_request_timeout(mut self, timeout: Duration) -> ProducerResult<Self> {
        let millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        if millis == 0 {
            return Err(ProducerError::invalid_config(format!(
                "request timeout must be at least 1ms, got {:?}",
                timeout
            )));
        }
        self.request_timeout_ms = millis;
        Ok(self)
    }

    pub fn with_schema_update_capacity(mut self, capacity: usize) -> Self {
        self.schema_update_capacity = capacity;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Options applied when registering a producer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProducerConfig {
    /// Append `_` plus 8 random hex chars to the producer name.
    /// Uniqueness is not checked against the broker.
    pub gen_unique_suffix: bool,
}

impl ProducerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unique_suffix(mut self) -> Self {
        self.gen_unique_suffix = true;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.connection_id, None);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.schema_update_capacity, 256);
        assert!(config.validate().is_ok());

        assert!(!ProducerConfig::default().gen_unique_suffix);
        assert!(ProducerConfig::new().with_unique_suffix().gen_unique_suffix);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config = ClientConfig::from_toml(
            r#"
            connection_id = "billing-api-1"
            request_timeout_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.connection_id.as_deref(), Some("billing-api-1"));
        assert_eq!(config.request_timeout_ms, 250);
        assert_eq!(config.schema_update_capacity, DEFAULT_SCHEMA_UPDATE_CAPACITY);
    }

    #[test]
    fn test_validation_errors() {
        assert!(ClientConfig::from_toml("request_timeout_ms = 0").is_err());
        assert!(ClientConfig::from_toml("schema_update_capacity = 0").is_err());
        assert!(ClientConfig::from_toml(r#"connection_id = "  ""#).is_err());
        assert!(matches!(
            ClientConfig::from_toml("request_timeout_ms = \"soon\""),
            Err(ProducerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_request_timeout_builder() {
        let config = ClientConfig::default()
            .with_request_timeout(Duration::from_millis(250))
            .unwrap();
        assert_eq!(config.request_timeout_ms, 250);

        let config = ClientConfig::default()
            .with_request_timeout(Duration::MAX)
            .unwrap();
        assert_eq!(config.request_timeout_ms, u64::MAX);

        for timeout in [Duration::ZERO, Duration::from_micros(999)] {
            assert!(matches!(
                ClientConfig::default().with_request_timeout(timeout),
                Err(ProducerError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_file_roundtrip() {
        let config = ClientConfig::default()
            .with_connection_id("conn-7")
            .with_schema_update_capacity(8);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml().unwrap().as_bytes()).unwrap();

        let loaded = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file() {
        let err = ClientConfig::from_file("/nonexistent/station-client.toml").unwrap_err();
        assert!(matches!(err, ProducerError::InvalidConfig(_)));
    }
}
