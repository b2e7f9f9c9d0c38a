//! Payload (de)serialization used by storage adapters.

use std::sync::Arc;

use serde_json::Value as JsonValue;
use thiserror::Error;

use keel_events::{EventPayload, PayloadType};

#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("failed to serialize payload {type_name}: {message}")]
    Serialize {
        type_name: &'static str,
        message: String,
    },

    #[error("failed to deserialize payload {type_name}: {message}")]
    Deserialize {
        type_name: &'static str,
        message: String,
    },
}

/// Turns event payloads into bytes and back.
///
/// The caller supplies the [`PayloadType`] on the way back in; it is resolved
/// from the stored type-mapping id by the
/// [`TypeMappingHandler`](crate::type_mapping::TypeMappingHandler).
pub trait PayloadSerializer: Send + Sync + core::fmt::Debug {
    fn serialize(&self, payload: &dyn EventPayload) -> Result<Vec<u8>, SerializationError>;

    fn deserialize(
        &self,
        payload_type: &PayloadType,
        bytes: &[u8],
    ) -> Result<Arc<dyn EventPayload>, SerializationError>;
}

/// JSON encoding via `serde_json`.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonPayloadSerializer;

impl PayloadSerializer for JsonPayloadSerializer {
    fn serialize(&self, payload: &dyn EventPayload) -> Result<Vec<u8>, SerializationError> {
        let to_error = |e: serde_json::Error| SerializationError::Serialize {
            type_name: payload.type_name(),
            message: e.to_string(),
        };
        let value = payload.to_json().map_err(to_error)?;
        serde_json::to_vec(&value).map_err(to_error)
    }

    fn deserialize(
        &self,
        payload_type: &PayloadType,
        bytes: &[u8],
    ) -> Result<Arc<dyn EventPayload>, SerializationError> {
        let to_error = |e: serde_json::Error| SerializationError::Deserialize {
            type_name: payload_type.name(),
            message: e.to_string(),
        };
        let value: JsonValue = serde_json::from_slice(bytes).map_err(to_error)?;
        payload_type.decode(value).map_err(to_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_events::Event;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Rang {
        bells: u8,
    }

    impl Event for Rang {}

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Silenced;

    impl Event for Silenced {}

    #[test]
    fn json_round_trip_restores_concrete_type() {
        let serializer = JsonPayloadSerializer;
        let bytes = serializer.serialize(&Rang { bells: 3 }).unwrap();
        assert_eq!(bytes, br#"{"bells":3}"#);

        let payload = serializer.deserialize(&PayloadType::of::<Rang>(), &bytes).unwrap();
        assert_eq!(payload.downcast_ref::<Rang>(), Some(&Rang { bells: 3 }));
    }

    #[test]
    fn decoding_with_wrong_type_fails() {
        let serializer = JsonPayloadSerializer;
        let bytes = serializer.serialize(&Rang { bells: 1 }).unwrap();
        let err = serializer
            .deserialize(&PayloadType::of::<Silenced>(), &bytes)
            .unwrap_err();
        assert!(matches!(err, SerializationError::Deserialize { .. }));
    }
}
