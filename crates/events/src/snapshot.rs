use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use keel_core::{AggregateVersion, StreamId};

/// Materialized aggregate state at a stream version.
///
/// `state == None` means "no snapshot"; loading it is a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    stream_id: StreamId,
    state: Option<JsonValue>,
    version: AggregateVersion,
}

impl Snapshot {
    pub fn new(stream_id: StreamId, state: JsonValue, version: AggregateVersion) -> Self {
        Self {
            stream_id,
            state: Some(state),
            version,
        }
    }

    pub fn none(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            state: None,
            version: AggregateVersion::NOT_CREATED,
        }
    }

    pub fn has_snapshot(&self) -> bool {
        self.state.is_some()
    }

    pub fn stream_id(&self) -> &StreamId {
        &self.stream_id
    }

    pub fn state(&self) -> Option<&JsonValue> {
        self.state.as_ref()
    }

    pub fn version(&self) -> AggregateVersion {
        if self.has_snapshot() {
            self.version
        } else {
            AggregateVersion::NOT_CREATED
        }
    }
}
