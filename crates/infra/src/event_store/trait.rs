use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use keel_core::{
    AggregateVersion, CommandId, CommandSequenceId, EventId, ExpectedVersion, PrincipalId,
    StreamId, TenantId, TypeMappingId,
};
use keel_events::{AppendResult, CommandHeader, EventRecord, EventsStream};

use crate::serializer::SerializationError;
use crate::type_mapping::TypeMappingError;

/// A persisted event row.
///
/// Storage adapters keep the payload as opaque bytes plus the compact
/// [`TypeMappingId`] of its payload type; [`EventCodec`](super::EventCodec)
/// converts between rows and [`EventRecord`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: EventId,
    pub stream_id: StreamId,
    pub aggregate_id: String,

    /// 1-based position in the stream.
    pub version: AggregateVersion,

    pub timestamp: DateTime<Utc>,
    pub command_id: CommandId,
    pub sequence_id: CommandSequenceId,
    pub principal_id: PrincipalId,
    pub tenant_id: TenantId,

    pub type_id: TypeMappingId,
    pub payload: Vec<u8>,
}

/// Event store operation error.
///
/// These are **infrastructure errors**. `Concurrency` is the only
/// variant the command pipeline recovers from (by retrying).
#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error(
        "optimistic concurrency check failed on {stream_id}: expected {expected}, actual {actual}"
    )]
    Concurrency {
        stream_id: StreamId,
        expected: ExpectedVersion,
        actual: AggregateVersion,
    },

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("invalid append: {0}")]
    InvalidAppend(String),

    #[error("invalid range on {stream_id}: from {from} to {to}")]
    InvalidRange {
        stream_id: StreamId,
        from: AggregateVersion,
        to: AggregateVersion,
    },

    #[error(transparent)]
    TypeMapping(#[from] TypeMappingError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error("event storage failure: {0}")]
    Storage(String),
}

impl EventStoreError {
    pub fn is_concurrency(&self) -> bool {
        matches!(self, Self::Concurrency { .. })
    }
}

/// Conditional, atomic append to one stream.
///
/// Implementations must:
/// - reject the whole batch with [`EventStoreError::Concurrency`] when
///   `expected` does not match the stream's current version
/// - guarantee that no two concurrent appends with the same `expected`
///   both succeed, across processes
/// - assign versions `current + 1 ..= current + n` to the batch, in order
/// - persist all events or none
#[async_trait]
pub trait EventAppender: Send + Sync {
    async fn append_to_stream(
        &self,
        command: &CommandHeader,
        stream_id: &StreamId,
        expected: ExpectedVersion,
        events: Vec<EventRecord>,
    ) -> Result<AppendResult, EventStoreError>;
}

/// Append-only, tenant-scoped event store.
#[async_trait]
pub trait EventStore: EventAppender {
    /// Events at positions `[from, to)`, i.e. versions `from + 1 ..= to`;
    /// `to == None` reads to the end of the stream.
    ///
    /// A missing stream is an empty window, not an error.
    async fn load_events_stream(
        &self,
        stream_id: &StreamId,
        from: AggregateVersion,
        to: Option<AggregateVersion>,
    ) -> Result<EventsStream, EventStoreError>;
}

#[async_trait]
impl<S> EventAppender for Arc<S>
where
    S: EventAppender + ?Sized,
{
    async fn append_to_stream(
        &self,
        command: &CommandHeader,
        stream_id: &StreamId,
        expected: ExpectedVersion,
        events: Vec<EventRecord>,
    ) -> Result<AppendResult, EventStoreError> {
        (**self).append_to_stream(command, stream_id, expected, events).await
    }
}

#[async_trait]
impl<S> EventStore for Arc<S>
where
    S: EventStore + ?Sized,
{
    async fn load_events_stream(
        &self,
        stream_id: &StreamId,
        from: AggregateVersion,
        to: Option<AggregateVersion>,
    ) -> Result<EventsStream, EventStoreError> {
        (**self).load_events_stream(stream_id, from, to).await
    }
}
