//! Errors of the command pipeline.

use thiserror::Error;

use keel_core::{AggregateVersion, CommandId, CommandSequenceId, ExpectedVersion};
use keel_events::{AggregateError, CommandValidationError};

use crate::awaiter::PublicationError;
use crate::event_store::EventStoreError;
use crate::snapshot_store::SnapshotStoreError;
use crate::storage::StorageError;
use crate::type_mapping::TypeMappingError;

/// The store rejected an append because the stream moved on.
///
/// Transient: the command handler reloads the aggregate and retries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "concurrency conflict on {aggregate_id}: expected version {expected}, actual {actual} \
     (command {command_id}, sequence {sequence_id}, source '{command_source}')"
)]
pub struct ConcurrencyConflict {
    pub aggregate_id: String,
    pub expected: ExpectedVersion,
    pub actual: AggregateVersion,
    pub command_id: CommandId,
    pub sequence_id: CommandSequenceId,
    pub command_source: String,
}

/// Failure of a command execution.
///
/// Business rejections are not errors; they come back as a
/// [`CommandExecutionResult`](keel_events::CommandExecutionResult).
#[derive(Debug, Error)]
pub enum EngineError {
    /// Malformed command envelope; never retried.
    #[error("invalid command envelope: {0}")]
    Validation(#[from] CommandValidationError),

    #[error(transparent)]
    Concurrency(#[from] ConcurrencyConflict),

    /// Fatal: every attempt hit a concurrency conflict.
    #[error("could not execute command {command_type} on {aggregate_id} after {attempts} attempts")]
    RetriesExhausted {
        command_type: &'static str,
        aggregate_id: String,
        attempts: u32,
        #[source]
        last_conflict: ConcurrencyConflict,
    },

    #[error("no handler registered for command {command_type} on {aggregate_id_type}")]
    HandlerNotRegistered {
        aggregate_id_type: &'static str,
        command_type: &'static str,
    },

    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    #[error(transparent)]
    EventStore(EventStoreError),

    #[error(transparent)]
    SnapshotStore(#[from] SnapshotStoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    TypeMapping(#[from] TypeMappingError),

    #[error(transparent)]
    Publication(#[from] PublicationError),

    #[error("invalid engine configuration: {0}")]
    Config(String),

    #[error("an engine is already installed")]
    EngineAlreadyInstalled,

    #[error("no engine installed")]
    EngineNotInstalled,

    /// Failure raised by a command handler's own logic.
    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

impl EngineError {
    /// The only condition the command handler retries on.
    pub fn is_concurrency_conflict(&self) -> bool {
        matches!(self, Self::Concurrency(_))
    }

    pub fn is_retries_exhausted(&self) -> bool {
        matches!(self, Self::RetriesExhausted { .. })
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
