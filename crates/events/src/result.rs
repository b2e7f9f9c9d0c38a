use serde::{Deserialize, Serialize};

use keel_core::{CommandId, CommandSequenceId};

use crate::command::Command;
use crate::envelope::CommandEnvelope;

pub const COMMAND_NOT_VALID: &str = "command_not_valid";
pub const AGGREGATE_NOT_EXISTS: &str = "aggregate_not_exists";
pub const COMMAND_CANCELLED: &str = "command_cancelled";

/// How a command execution ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandOutcome {
    Accepted,
    Rejected,
    /// Cancellation observed before the write.
    Cancelled,
}

/// Outcome of one command execution.
///
/// Business rejections are values of this type; infrastructure failures are
/// errors of the pipeline and never appear here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandExecutionResult<Id> {
    aggregate_id: Id,
    command_id: CommandId,
    sequence_id: CommandSequenceId,
    outcome: CommandOutcome,
    has_changes: bool,
    error_code: Option<String>,
    command_type: String,
}

impl<Id: Clone> CommandExecutionResult<Id> {
    fn build<P: Command>(
        command: &CommandEnvelope<Id, P>,
        outcome: CommandOutcome,
        has_changes: bool,
        error_code: Option<String>,
    ) -> Self {
        Self {
            aggregate_id: command.aggregate_id().clone(),
            command_id: command.command_id(),
            sequence_id: command.sequence_id(),
            outcome,
            has_changes,
            error_code,
            command_type: command.command_type().to_string(),
        }
    }

    pub fn ok<P: Command>(command: &CommandEnvelope<Id, P>) -> Self {
        Self::build(command, CommandOutcome::Accepted, true, None)
    }

    /// Accepted; `has_changes` reports whether the aggregate produced events.
    pub fn ok_if_changes<P: Command>(command: &CommandEnvelope<Id, P>, has_changes: bool) -> Self {
        Self::build(command, CommandOutcome::Accepted, has_changes, None)
    }

    pub fn no_change<P: Command>(command: &CommandEnvelope<Id, P>) -> Self {
        Self::build(command, CommandOutcome::Accepted, false, None)
    }

    pub fn command_not_valid<P: Command>(command: &CommandEnvelope<Id, P>) -> Self {
        Self::build(command, CommandOutcome::Rejected, false, Some(COMMAND_NOT_VALID.to_string()))
    }

    pub fn not_exists<P: Command>(command: &CommandEnvelope<Id, P>) -> Self {
        Self::build(command, CommandOutcome::Rejected, false, Some(AGGREGATE_NOT_EXISTS.to_string()))
    }

    pub fn error<P: Command>(command: &CommandEnvelope<Id, P>, message: impl Into<String>) -> Self {
        Self::build(command, CommandOutcome::Rejected, false, Some(message.into()))
    }

    /// Cancellation observed before the write; nothing was persisted.
    pub fn cancelled<P: Command>(command: &CommandEnvelope<Id, P>) -> Self {
        Self::build(command, CommandOutcome::Cancelled, false, Some(COMMAND_CANCELLED.to_string()))
    }
}

impl<Id> CommandExecutionResult<Id> {
    pub fn aggregate_id(&self) -> &Id {
        &self.aggregate_id
    }

    pub fn command_id(&self) -> CommandId {
        self.command_id
    }

    pub fn sequence_id(&self) -> CommandSequenceId {
        self.sequence_id
    }

    pub fn outcome(&self) -> CommandOutcome {
        self.outcome
    }

    pub fn is_accepted(&self) -> bool {
        self.outcome == CommandOutcome::Accepted
    }

    pub fn has_changes(&self) -> bool {
        self.has_changes
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    pub fn command_type(&self) -> &str {
        &self.command_type
    }

    pub fn is_cancelled(&self) -> bool {
        self.outcome == CommandOutcome::Cancelled
    }

    /// Same outcome with the aggregate id converted (e.g. to its string form).
    pub fn map_id<T>(self, f: impl FnOnce(Id) -> T) -> CommandExecutionResult<T> {
        CommandExecutionResult {
            aggregate_id: f(self.aggregate_id),
            command_id: self.command_id,
            sequence_id: self.sequence_id,
            outcome: self.outcome,
            has_changes: self.has_changes,
            error_code: self.error_code,
            command_type: self.command_type,
        }
    }
}
