//! One command execution attempt, end to end.
//!
//! ```text
//! resolve tenant stores
//!   ↓
//! load snapshot → load events after it → replay onto a fresh aggregate
//!   ↓
//! business delegate (decides, applies zero or more events)
//!   ↓
//! conditional append at the pre-command version   ← optimistic concurrency gate
//!   ↓
//! publish → save snapshot
//! ```
//!
//! Every attempt builds its aggregate from storage. A conflicting attempt's
//! aggregate (and its uncommitted events) is dropped, never retried.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

use keel_core::{AggregateIdentity, ExpectedVersion};
use keel_events::{
    Aggregate, Command, CommandEnvelope, CommandExecutionResult, MutatorRegistry,
};

use crate::error::{ConcurrencyConflict, EngineError};
use crate::event_store::{EventStore, EventStoreError};
use crate::storage::StorageResolver;

pub struct AggregateUpdater<Id, S> {
    storage: Arc<dyn StorageResolver>,
    registry: Arc<MutatorRegistry<Id, S>>,
}

impl<Id, S> Clone for AggregateUpdater<Id, S> {
    fn clone(&self) -> Self {
        Self {
            storage: Arc::clone(&self.storage),
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<Id, S> AggregateUpdater<Id, S>
where
    Id: AggregateIdentity,
    S: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub fn new(storage: Arc<dyn StorageResolver>, registry: Arc<MutatorRegistry<Id, S>>) -> Self {
        Self { storage, registry }
    }

    pub fn registry(&self) -> &Arc<MutatorRegistry<Id, S>> {
        &self.registry
    }

    /// Run one attempt of `command` through `delegate`.
    ///
    /// A stale expected version surfaces as [`EngineError::Concurrency`];
    /// nothing was written in that case. Publication and snapshot failures
    /// after a successful append are logged and do not fail the command.
    #[instrument(
        skip_all,
        fields(
            aggregate_id = %command.aggregate_id(),
            command_id = %command.command_id(),
            command_type = command.command_type(),
        ),
        err
    )]
    pub async fn execute<P, F>(
        &self,
        command: &CommandEnvelope<Id, P>,
        delegate: F,
        cancel: &CancellationToken,
    ) -> Result<CommandExecutionResult<Id>, EngineError>
    where
        P: Command,
        F: FnOnce(
            &mut Aggregate<Id, S>,
            &CommandEnvelope<Id, P>,
        ) -> Result<CommandExecutionResult<Id>, EngineError>,
    {
        let tenant_id = command.tenant_id();
        let event_store = self.storage.event_store(tenant_id)?;
        let snapshot_store = self.storage.snapshot_store(tenant_id)?;
        let publisher = self.storage.publisher(tenant_id)?;

        let stream_id = command.aggregate_id().stream_id();
        let snapshot = snapshot_store.load_snapshot(&stream_id).await?;

        let mut aggregate = Aggregate::new(command.aggregate_id().clone(), self.registry.mutator())?;
        aggregate.load_snapshot(&snapshot)?;
        self.replay(&mut aggregate, event_store.as_ref()).await?;

        let result = delegate(&mut aggregate, command)?;

        if !aggregate.has_uncommitted() {
            return Ok(result);
        }
        if !result.is_accepted() {
            debug!(
                discarded = aggregate.uncommitted().len(),
                "command rejected, discarding uncommitted events"
            );
            aggregate.discard_uncommitted();
            return Ok(result);
        }
        if cancel.is_cancelled() {
            debug!("cancelled before append");
            return Ok(CommandExecutionResult::cancelled(command));
        }

        // Point of no return: from here on cancellation only skips the snapshot.
        let expected = ExpectedVersion::Exact(aggregate.version());
        let append = match event_store
            .append_to_stream(
                command.header(),
                &stream_id,
                expected,
                aggregate.uncommitted_records(),
            )
            .await
        {
            Ok(append) => append,
            Err(EventStoreError::Concurrency {
                expected, actual, ..
            }) => {
                return Err(ConcurrencyConflict {
                    aggregate_id: command.aggregate_id().to_string(),
                    expected,
                    actual,
                    command_id: command.command_id(),
                    sequence_id: command.sequence_id(),
                    command_source: command.source().to_string(),
                }
                .into());
            }
            Err(e) => return Err(EngineError::EventStore(e)),
        };
        debug!(version = %append.version, events = append.committed.len(), "appended");

        if let Err(e) = publisher.publish(command.header(), &append.committed).await {
            error!(
                error = %e,
                %stream_id,
                version = %append.version,
                "publish failed after durable append"
            );
        }

        match aggregate.commit(&append) {
            Ok(_) if cancel.is_cancelled() => {
                debug!("cancelled after append, skipping snapshot");
            }
            Ok(snapshot) => {
                if let Err(e) = snapshot_store.save_snapshot(&stream_id, snapshot).await {
                    warn!(error = %e, %stream_id, "snapshot save failed");
                }
            }
            Err(e) => warn!(error = %e, %stream_id, "snapshot build failed"),
        }

        Ok(result)
    }

    /// Load every event after the aggregate's current version, window by window.
    async fn replay(
        &self,
        aggregate: &mut Aggregate<Id, S>,
        event_store: &dyn EventStore,
    ) -> Result<(), EngineError> {
        let stream_id = aggregate.stream_id();
        loop {
            let stream = event_store
                .load_events_stream(&stream_id, aggregate.version(), None)
                .await
                .map_err(EngineError::EventStore)?;
            let reached_end = stream.reached_end;
            let progressed = !stream.is_empty();
            aggregate.load_events(stream)?;
            if reached_end || !progressed {
                return Ok(());
            }
        }
    }
}
