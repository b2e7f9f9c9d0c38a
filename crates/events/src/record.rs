//! Type-erased event records and stream windows, as exchanged with stores.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use keel_core::{
    AggregateVersion, CommandId, CommandSequenceId, EventId, PrincipalId, StreamId, TenantId,
};

use crate::event::EventPayload;

/// An event independent of its aggregate id type.
///
/// Storage adapters and publishers only ever see records; the aggregate
/// id is kept in its string form and parsed back on replay.
#[derive(Debug, Clone)]
pub struct EventRecord {
    pub event_id: EventId,
    pub stream_id: StreamId,
    pub aggregate_id: String,
    /// Position in the stream (1-based once committed).
    pub version: AggregateVersion,
    pub timestamp: DateTime<Utc>,
    pub command_id: CommandId,
    pub sequence_id: CommandSequenceId,
    pub principal_id: PrincipalId,
    pub tenant_id: TenantId,
    pub payload: Arc<dyn EventPayload>,
}

impl EventRecord {
    /// Same record at its committed stream position.
    pub fn at_version(mut self, version: AggregateVersion) -> Self {
        self.version = version;
        self
    }

    pub fn event_type(&self) -> &'static str {
        self.payload.type_name()
    }
}

/// A window of one stream, as returned by an event store read.
///
/// `from` is the number of events preceding the window, so the window holds
/// the events with versions `from + 1 ..= version`.
#[derive(Debug, Clone)]
pub struct EventsStream {
    pub stream_id: StreamId,
    pub from: AggregateVersion,
    /// Version of the last event in the window (`from` when empty).
    pub version: AggregateVersion,
    pub events: Vec<EventRecord>,
    /// Whether the window reaches the current end of the stream.
    pub reached_end: bool,
}

impl EventsStream {
    pub fn empty(stream_id: StreamId, from: AggregateVersion) -> Self {
        Self {
            stream_id,
            from,
            version: from,
            events: Vec::new(),
            reached_end: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

/// Outcome of a successful conditional append.
#[derive(Debug, Clone)]
pub struct AppendResult {
    pub stream_id: StreamId,
    /// Stream version the append was checked against.
    pub previous_version: AggregateVersion,
    /// Stream version after the append.
    pub version: AggregateVersion,
    /// Appended records at their committed positions.
    pub committed: Vec<EventRecord>,
}
