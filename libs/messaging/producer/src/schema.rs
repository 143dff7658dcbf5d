//! Schema lifecycle events pushed by the control plane
//!
//! Wire form on `schema-updates.<station>`:
//!
//! ```json
//! {"update_type": 1, "init": {"schema_name": "orders", "versions": [...], "active_index": 0, "type": "json"}}
//! {"update_type": 2}
//! ```

use crate::ProducerResult;
use serde::{Deserialize, Serialize};

pub const UPDATE_TYPE_INIT: u8 = 1;
pub const UPDATE_TYPE_DROP: u8 = 2;

/// One immutable schema revision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaVersion {
    #[serde(default)]
    pub version_number: u32,
    #[serde(default)]
    pub descriptor: String,
    #[serde(default)]
    pub message_struct_name: String,
}

/// Full schema snapshot for a station
///
/// An empty `schema_type` means the station has no schema attached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaUpdateInit {
    #[serde(default)]
    pub schema_name: String,
    #[serde(default)]
    pub versions: Vec<SchemaVersion>,
    #[serde(default, rename = "active_index")]
    pub active_version_index: usize,
    #[serde(default, rename = "type")]
    pub schema_type: String,
}

impl SchemaUpdateInit {
    pub fn has_schema(&self) -> bool {
        !self.schema_type.is_empty()
    }

    pub fn active_version(&self) -> Option<&SchemaVersion> {
        self.versions.get(self.active_version_index)
    }
}

/// Authoritative schema state for a station at a point in time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaUpdate {
    Init(SchemaUpdateInit),
    Drop,
}

#[derive(Serialize, Deserialize)]
struct SchemaUpdateWire {
    update_type: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    init: Option<SchemaUpdateInit>,
}

impl SchemaUpdate {
    pub fn decode(bytes: &[u8]) -> ProducerResult<Self> {
        use serde::de::Error as _;

        let wire: SchemaUpdateWire = serde_json::from_slice(bytes)?;
        match (wire.update_type, wire.init) {
            (UPDATE_TYPE_INIT, Some(init)) => Ok(SchemaUpdate::Init(init)),
            (UPDATE_TYPE_INIT, None) => {
                Err(serde_json::Error::custom("init update without init payload").into())
            }
            (UPDATE_TYPE_DROP, _) => Ok(SchemaUpdate::Drop),
            (other, _) => {
                Err(serde_json::Error::custom(format!("unknown schema update type {}", other)).into())
            }
        }
    }

    pub fn encode(&self) -> ProducerResult<Vec<u8>> {
        let wire = match self {
            SchemaUpdate::Init(init) => SchemaUpdateWire {
                update_type: UPDATE_TYPE_INIT,
                init: Some(init.clone()),
            },
            SchemaUpdate::Drop => SchemaUpdateWire {
                update_type: UPDATE_TYPE_DROP,
                init: None,
            },
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Whether applying this update leaves the station with a schema
    pub fn has_schema(&self) -> bool {
        matches!(self, SchemaUpdate::Init(init) if init.has_schema())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProducerError;

    #[test]
    fn test_decode_init() {
        let raw = br#"{"update_type":1,"init":{"schema_name":"orders","versions":[{"version_number":1,"descriptor":"{}","message_struct_name":"Order"}],"active_index":0,"type":"json"}}"#;
        let update = SchemaUpdate::decode(raw).unwrap();

        let SchemaUpdate::Init(init) = update else {
            panic!("expected init update");
        };
        assert_eq!(init.schema_name, "orders");
        assert_eq!(init.schema_type, "json");
        assert_eq!(init.active_version().unwrap().message_struct_name, "Order");
    }

    #[test]
    fn test_decode_drop_and_garbage() {
        assert_eq!(
            SchemaUpdate::decode(br#"{"update_type":2}"#).unwrap(),
            SchemaUpdate::Drop
        );
        assert!(matches!(
            SchemaUpdate::decode(br#"{"update_type":7}"#),
            Err(ProducerError::Decode(_))
        ));
        assert!(matches!(
            SchemaUpdate::decode(br#"{"update_type":1}"#),
            Err(ProducerError::Decode(_))
        ));
        assert!(SchemaUpdate::decode(b"not json").is_err());
    }

    #[test]
    fn test_empty_init_means_no_schema() {
        let init = SchemaUpdateInit::default();
        assert!(!init.has_schema());
        assert!(init.active_version().is_none());
        assert!(!SchemaUpdate::Init(init).has_schema());
        assert!(!SchemaUpdate::Drop.has_schema());
    }

    #[test]
    fn test_encoded_drop_omits_init() {
        let bytes = SchemaUpdate::Drop.encode().unwrap();
        assert_eq!(bytes, br#"{"update_type":2}"#.to_vec());
    }
}
