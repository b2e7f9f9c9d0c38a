//! Compact runtime type ids for stored event payloads.
//!
//! Streams persist a [`TypeMappingId`](keel_core::TypeMappingId) per event
//! instead of the payload's full type name. The mapping table is append-only:
//! an id, once associated with a name, is never reassigned.

mod handler;
mod storage;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use keel_core::TypeMappingId;
use keel_events::PayloadTypeConflict;

pub use handler::TypeMappingHandler;
pub use storage::{InMemoryTypeMappingStorage, TypeMappingStorage};

/// One persisted `(id, type name)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeMapping {
    pub id: TypeMappingId,
    pub name: String,
}

impl TypeMapping {
    pub fn new(id: TypeMappingId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum TypeMappingError {
    /// Stored events reference an id the mapping table does not know.
    #[error("unknown type mapping id {0}")]
    UnknownId(TypeMappingId),

    /// The id is mapped, but the type was removed from the codebase.
    #[error("type mapping {id} refers to '{name}', which is not a known payload type")]
    TypeNotInCodebase { id: TypeMappingId, name: String },

    #[error("type mappings used before synchronization with storage")]
    NotSynchronized,

    #[error("type mapping handler has been disposed")]
    Disposed,

    #[error("timed out after {waited:?} waiting for concurrent registration of '{type_name}'")]
    Timeout {
        type_name: &'static str,
        waited: Duration,
    },

    #[error("mapping conflict: {0}")]
    Conflict(String),

    #[error(transparent)]
    PayloadType(#[from] PayloadTypeConflict),

    #[error("type mapping storage failure: {0}")]
    Storage(String),
}
