//! Event and command envelopes: payload + routing/causality metadata.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keel_core::{
    AggregateIdentity, AggregateVersion, CommandId, CommandSequenceId, EventId, Identifier,
    PrincipalId, TenantId,
};

use crate::command::Command;
use crate::error::CommandValidationError;
use crate::event::{Event, EventPayload};
use crate::record::EventRecord;

/// Envelope for an event, as produced by [`Aggregate::apply`](crate::Aggregate::apply)
/// or decoded from a stored [`EventRecord`].
///
/// Immutable once built. `version` is the stream version the event belongs to;
/// for uncommitted events it is the aggregate version the event was decided
/// against, and the store assigns the final position at append time.
#[derive(Debug, Clone)]
pub struct EventEnvelope<Id> {
    event_id: EventId,
    aggregate_id: Id,
    payload: Arc<dyn EventPayload>,
    timestamp: DateTime<Utc>,
    command_id: CommandId,
    sequence_id: CommandSequenceId,
    version: AggregateVersion,
    principal_id: PrincipalId,
    tenant_id: TenantId,
}

impl<Id> EventEnvelope<Id> {
    pub(crate) fn for_command<P>(
        command: &CommandEnvelope<Id, P>,
        aggregate_id: Id,
        version: AggregateVersion,
        payload: Arc<dyn EventPayload>,
    ) -> Self {
        Self {
            event_id: EventId::new(),
            aggregate_id,
            payload,
            timestamp: Utc::now(),
            command_id: command.command_id(),
            sequence_id: command.sequence_id(),
            version,
            principal_id: command.principal_id(),
            tenant_id: command.tenant_id(),
        }
    }

    pub fn event_id(&self) -> EventId {
        self.event_id
    }

    pub fn aggregate_id(&self) -> &Id {
        &self.aggregate_id
    }

    pub fn payload(&self) -> &dyn EventPayload {
        self.payload.as_ref()
    }

    /// Typed access to the payload; `None` if it is another event type.
    pub fn payload_as<E: Event>(&self) -> Option<&E> {
        self.payload.downcast_ref::<E>()
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn command_id(&self) -> CommandId {
        self.command_id
    }

    pub fn sequence_id(&self) -> CommandSequenceId {
        self.sequence_id
    }

    pub fn version(&self) -> AggregateVersion {
        self.version
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

impl<Id: AggregateIdentity> EventEnvelope<Id> {
    /// Type-erased form exchanged with stores and publishers.
    pub fn to_record(&self) -> EventRecord {
        EventRecord {
            event_id: self.event_id,
            stream_id: self.aggregate_id.stream_id(),
            aggregate_id: self.aggregate_id.to_string(),
            version: self.version,
            timestamp: self.timestamp,
            command_id: self.command_id,
            sequence_id: self.sequence_id,
            principal_id: self.principal_id,
            tenant_id: self.tenant_id,
            payload: Arc::clone(&self.payload),
        }
    }

    /// Typed view of a stored or published record.
    pub fn from_record(record: &EventRecord) -> Result<Self, keel_core::DomainError> {
        Ok(Self {
            event_id: record.event_id,
            aggregate_id: Id::parse(&record.aggregate_id)?,
            payload: Arc::clone(&record.payload),
            timestamp: record.timestamp,
            command_id: record.command_id,
            sequence_id: record.sequence_id,
            version: record.version,
            principal_id: record.principal_id,
            tenant_id: record.tenant_id,
        })
    }
}

/// Routing and causality metadata of a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandHeader {
    tenant_id: TenantId,
    principal_id: PrincipalId,
    command_id: CommandId,
    parent_command_id: CommandId,
    sequence_id: CommandSequenceId,
    timestamp: DateTime<Utc>,
    source: String,
}

impl CommandHeader {
    /// Header for a new root command: fresh command and sequence ids, no parent.
    pub fn new(tenant_id: TenantId, principal_id: PrincipalId, source: impl Into<String>) -> Self {
        Self {
            tenant_id,
            principal_id,
            command_id: CommandId::new(),
            parent_command_id: CommandId::empty(),
            sequence_id: CommandSequenceId::new(),
            timestamp: Utc::now(),
            source: source.into(),
        }
    }

    /// Header for a command caused by `event`.
    ///
    /// Tenant, principal and sequence are inherited; the event's command
    /// becomes the parent and a new command id is generated.
    pub fn caused_by<Id>(event: &EventEnvelope<Id>, source: impl Into<String>) -> Self {
        Self {
            tenant_id: event.tenant_id(),
            principal_id: event.principal_id(),
            command_id: CommandId::new(),
            parent_command_id: event.command_id(),
            sequence_id: event.sequence_id(),
            timestamp: Utc::now(),
            source: source.into(),
        }
    }

    /// Header with every field supplied by the caller (replays, imports, tests).
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        tenant_id: TenantId,
        principal_id: PrincipalId,
        command_id: CommandId,
        parent_command_id: CommandId,
        sequence_id: CommandSequenceId,
        timestamp: DateTime<Utc>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id,
            principal_id,
            command_id,
            parent_command_id,
            sequence_id,
            timestamp,
            source: source.into(),
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.principal_id
    }

    pub fn command_id(&self) -> CommandId {
        self.command_id
    }

    pub fn parent_command_id(&self) -> CommandId {
        self.parent_command_id
    }

    pub fn sequence_id(&self) -> CommandSequenceId {
        self.sequence_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

/// A command payload addressed to one aggregate, with its header.
#[derive(Debug, Clone)]
pub struct CommandEnvelope<Id, P> {
    header: CommandHeader,
    aggregate_id: Id,
    payload: P,
}

impl<Id, P> CommandEnvelope<Id, P> {
    pub fn new(header: CommandHeader, aggregate_id: Id, payload: P) -> Self {
        Self {
            header,
            aggregate_id,
            payload,
        }
    }

    /// Saga-style continuation of `event`; see [`CommandHeader::caused_by`].
    pub fn chained_from<EId>(
        event: &EventEnvelope<EId>,
        aggregate_id: Id,
        payload: P,
        source: impl Into<String>,
    ) -> Self {
        Self::new(CommandHeader::caused_by(event, source), aggregate_id, payload)
    }

    pub fn header(&self) -> &CommandHeader {
        &self.header
    }

    pub fn aggregate_id(&self) -> &Id {
        &self.aggregate_id
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn into_parts(self) -> (CommandHeader, Id, P) {
        (self.header, self.aggregate_id, self.payload)
    }

    pub fn tenant_id(&self) -> TenantId {
        self.header.tenant_id
    }

    pub fn principal_id(&self) -> PrincipalId {
        self.header.principal_id
    }

    pub fn command_id(&self) -> CommandId {
        self.header.command_id
    }

    pub fn parent_command_id(&self) -> CommandId {
        self.header.parent_command_id
    }

    pub fn sequence_id(&self) -> CommandSequenceId {
        self.header.sequence_id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.header.timestamp
    }

    pub fn source(&self) -> &str {
        &self.header.source
    }
}

impl<Id: Identifier, P> CommandEnvelope<Id, P> {
    /// Structural validation, performed before any store access.
    pub fn validate(&self) -> Result<(), CommandValidationError> {
        if self.aggregate_id.is_empty() {
            return Err(CommandValidationError::EmptyAggregateId);
        }
        if self.header.command_id.is_empty() {
            return Err(CommandValidationError::EmptyCommandId);
        }
        if self.header.sequence_id.is_empty() {
            return Err(CommandValidationError::EmptySequenceId);
        }
        if self.header.timestamp == DateTime::<Utc>::default() {
            return Err(CommandValidationError::UnsetTimestamp);
        }
        Ok(())
    }
}

impl<Id, P: Command> CommandEnvelope<Id, P> {
    pub fn command_type(&self) -> &'static str {
        P::command_type()
    }
}
