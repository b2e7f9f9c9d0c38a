//! Events, commands and the aggregate model.
//!
//! Everything here is synchronous and storage-agnostic; the async pipeline
//! lives in `keel-infra`.

pub mod aggregate;
pub mod command;
pub mod envelope;
pub mod error;
pub mod event;
pub mod mutator;
pub mod record;
pub mod result;
pub mod snapshot;

pub use aggregate::Aggregate;
pub use command::{Command, CommandPayload};
pub use envelope::{CommandEnvelope, CommandHeader, EventEnvelope};
pub use error::{AggregateError, CommandValidationError, PayloadTypeConflict};
pub use event::{Event, EventPayload, PayloadType, PayloadTypes};
pub use mutator::{MutatorRegistry, StateMutator};
pub use record::{AppendResult, EventRecord, EventsStream};
pub use result::{CommandExecutionResult, CommandOutcome};
pub use snapshot::Snapshot;
