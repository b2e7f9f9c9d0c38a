//! Errors raised by aggregate replay, envelope validation and type registries.

use thiserror::Error;

use keel_core::{AggregateVersion, DomainError, StreamId};

/// Failure while loading, mutating or committing an aggregate.
///
/// All variants indicate a programming error or a mismatch between stored data
/// and the code replaying it; none of them is retried.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AggregateError {
    #[error("aggregate '{aggregate_type}' cannot be constructed with an empty id")]
    EmptyAggregateId { aggregate_type: &'static str },

    /// Stored event has a payload type no reducer is registered for.
    #[error("unknown event type '{event_type}' for aggregate '{aggregate_type}'")]
    UnknownEventType {
        aggregate_type: &'static str,
        event_type: String,
    },

    #[error("event stream starts at version {found} but aggregate is at version {expected}")]
    StreamPositionMismatch {
        expected: AggregateVersion,
        found: AggregateVersion,
    },

    #[error("events of stream '{found}' cannot be loaded into aggregate stream '{expected}'")]
    StreamMismatch { expected: StreamId, found: StreamId },

    #[error("command targets aggregate '{command}' but was applied to '{aggregate}'")]
    CommandTargetMismatch { aggregate: String, command: String },

    #[error("{0} called out of order")]
    Lifecycle(&'static str),

    #[error("stored event carries an invalid aggregate id: {0}")]
    InvalidRecord(DomainError),

    #[error("snapshot state conversion failed: {0}")]
    SnapshotState(String),
}

/// Structural defect of a command envelope, detected before any IO.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CommandValidationError {
    #[error("command envelope has an empty aggregate id")]
    EmptyAggregateId,

    #[error("command envelope has an empty command id")]
    EmptyCommandId,

    #[error("command envelope has an empty sequence id")]
    EmptySequenceId,

    #[error("command envelope timestamp is unset")]
    UnsetTimestamp,
}

/// Two distinct Rust types claimed the same persisted type name.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("payload type name '{name}' is already registered for a different type")]
pub struct PayloadTypeConflict {
    pub name: &'static str,
}
