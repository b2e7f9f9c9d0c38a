//! Validation and the bounded optimistic-concurrency retry loop.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use keel_core::AggregateIdentity;
use keel_events::{Aggregate, Command, CommandEnvelope, CommandExecutionResult, MutatorRegistry};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::storage::StorageResolver;
use crate::updater::AggregateUpdater;

/// Drives an [`AggregateUpdater`] until an attempt is not rejected by a
/// concurrency conflict.
///
/// ## Retry policy
///
/// - invalid envelopes fail before any store access and are never retried
/// - [`EngineError::Concurrency`] is the *only* retried error; each retry
///   reloads the aggregate from storage and re-runs the delegate
/// - after `max_attempts` conflicting attempts the command fails with
///   [`EngineError::RetriesExhausted`], which callers must treat as an
///   infrastructure failure, not a business rejection
/// - cancellation is observed before every attempt
pub struct CommandHandler<Id, S> {
    updater: AggregateUpdater<Id, S>,
    max_attempts: u32,
}

impl<Id, S> Clone for CommandHandler<Id, S> {
    fn clone(&self) -> Self {
        Self {
            updater: self.updater.clone(),
            max_attempts: self.max_attempts,
        }
    }
}

impl<Id, S> CommandHandler<Id, S>
where
    Id: AggregateIdentity,
    S: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(
        storage: Arc<dyn StorageResolver>,
        registry: Arc<MutatorRegistry<Id, S>>,
        config: &EngineConfig,
    ) -> Self {
        Self::with_updater(AggregateUpdater::new(storage, registry), config.max_command_attempts)
    }

    pub fn with_updater(updater: AggregateUpdater<Id, S>, max_attempts: u32) -> Self {
        Self {
            updater,
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn updater(&self) -> &AggregateUpdater<Id, S> {
        &self.updater
    }

    /// Execute `command`, retrying the whole load/decide/append cycle on conflicts.
    ///
    /// `delegate` may run once per attempt; it must only decide from the
    /// aggregate it is handed.
    pub async fn update<P, F>(
        &self,
        command: &CommandEnvelope<Id, P>,
        mut delegate: F,
        cancel: &CancellationToken,
    ) -> Result<CommandExecutionResult<Id>, EngineError>
    where
        P: Command,
        F: FnMut(
            &mut Aggregate<Id, S>,
            &CommandEnvelope<Id, P>,
        ) -> Result<CommandExecutionResult<Id>, EngineError>,
    {
        command.validate()?;

        let mut last_conflict = None;
        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                debug!(attempt, command_id = %command.command_id(), "command cancelled");
                return Ok(CommandExecutionResult::cancelled(command));
            }

            match self.updater.execute(command, &mut delegate, cancel).await {
                Err(EngineError::Concurrency(conflict)) => {
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        aggregate_id = %conflict.aggregate_id,
                        expected_version = %conflict.expected,
                        actual_version = %conflict.actual,
                        command_id = %conflict.command_id,
                        "concurrency conflict, retrying"
                    );
                    last_conflict = Some(conflict);
                }
                outcome => return outcome,
            }
        }

        let Some(last_conflict) = last_conflict else {
            return Err(EngineError::Config(
                "max_command_attempts must be at least 1".to_string(),
            ));
        };
        error!(
            attempts = self.max_attempts,
            aggregate_id = %last_conflict.aggregate_id,
            command_type = command.command_type(),
            "command retries exhausted"
        );
        Err(EngineError::RetriesExhausted {
            command_type: command.command_type(),
            aggregate_id: last_conflict.aggregate_id.clone(),
            attempts: self.max_attempts,
            last_conflict,
        })
    }
}
