//! Event-sourced aggregate instance.
//!
//! An [`Aggregate`] is built fresh for every command attempt, loaded from an
//! optional snapshot plus the events after it, mutated by business logic via
//! [`Aggregate::apply`], and committed once after a successful append. It is
//! never reused across attempts.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use keel_core::{AggregateIdentity, AggregateVersion, StreamId};

use crate::envelope::{CommandEnvelope, EventEnvelope};
use crate::error::AggregateError;
use crate::event::Event;
use crate::mutator::StateMutator;
use crate::record::{AppendResult, EventRecord, EventsStream};
use crate::snapshot::Snapshot;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Phase {
    Fresh,
    SnapshotLoaded,
    EventsLoaded,
    Committed,
}

#[derive(Debug)]
pub struct Aggregate<Id, S> {
    id: Id,
    version: AggregateVersion,
    mutator: StateMutator<Id, S>,
    uncommitted: Vec<EventEnvelope<Id>>,
    phase: Phase,
}

impl<Id, S> Aggregate<Id, S>
where
    Id: AggregateIdentity,
    S: Clone,
{
    pub fn new(id: Id, mutator: StateMutator<Id, S>) -> Result<Self, AggregateError> {
        if id.is_empty() {
            return Err(AggregateError::EmptyAggregateId {
                aggregate_type: mutator.aggregate_type(),
            });
        }
        Ok(Self {
            id,
            version: AggregateVersion::NOT_CREATED,
            mutator,
            uncommitted: Vec::new(),
            phase: Phase::Fresh,
        })
    }

    pub fn id(&self) -> &Id {
        &self.id
    }

    pub fn stream_id(&self) -> StreamId {
        self.id.stream_id()
    }

    pub fn aggregate_type(&self) -> &'static str {
        self.mutator.aggregate_type()
    }

    /// Last persisted version known to this instance.
    pub fn version(&self) -> AggregateVersion {
        self.version
    }

    pub fn state(&self) -> &S {
        self.mutator.current()
    }

    pub fn uncommitted(&self) -> &[EventEnvelope<Id>] {
        &self.uncommitted
    }

    pub fn has_uncommitted(&self) -> bool {
        !self.uncommitted.is_empty()
    }

    pub fn uncommitted_records(&self) -> Vec<EventRecord> {
        self.uncommitted.iter().map(EventEnvelope::to_record).collect()
    }

    /// Drop the events of a rejected command. The instance must be discarded
    /// afterwards: its state still reflects them.
    pub fn discard_uncommitted(&mut self) {
        self.uncommitted.clear();
    }

    /// Replay events after the current version. The window must start exactly
    /// at [`Aggregate::version`].
    pub fn load_events(&mut self, stream: EventsStream) -> Result<(), AggregateError> {
        if matches!(self.phase, Phase::Committed) || self.has_uncommitted() {
            return Err(AggregateError::Lifecycle("load_events"));
        }
        let own_stream = self.stream_id();
        if stream.stream_id != own_stream {
            return Err(AggregateError::StreamMismatch {
                expected: own_stream,
                found: stream.stream_id,
            });
        }
        if stream.from != self.version {
            return Err(AggregateError::StreamPositionMismatch {
                expected: self.version,
                found: stream.from,
            });
        }

        let mut position = stream.from;
        for record in &stream.events {
            let expected = position.next();
            if record.version != expected {
                return Err(AggregateError::StreamPositionMismatch {
                    expected,
                    found: record.version,
                });
            }
            let envelope =
                EventEnvelope::<Id>::from_record(record).map_err(AggregateError::InvalidRecord)?;
            self.mutator.transition(&envelope)?;
            position = expected;
        }

        self.version = self.version.max(stream.version).max(position);
        self.phase = Phase::EventsLoaded;
        Ok(())
    }

    /// Record a new event decided by business logic and evolve state with it.
    ///
    /// The envelope carries the pre-command version; the store assigns the
    /// final stream position at append time.
    pub fn apply<P, E>(&mut self, command: &CommandEnvelope<Id, P>, event: E) -> Result<(), AggregateError>
    where
        E: Event,
    {
        if matches!(self.phase, Phase::Committed) {
            return Err(AggregateError::Lifecycle("apply"));
        }
        if command.aggregate_id() != &self.id {
            return Err(AggregateError::CommandTargetMismatch {
                aggregate: self.id.to_string(),
                command: command.aggregate_id().to_string(),
            });
        }
        let envelope =
            EventEnvelope::for_command(command, self.id.clone(), self.version, Arc::new(event));
        self.mutator.transition(&envelope)?;
        self.uncommitted.push(envelope);
        Ok(())
    }
}

impl<Id, S> Aggregate<Id, S>
where
    Id: AggregateIdentity,
    S: Clone + DeserializeOwned,
{
    /// Seed state and version from a snapshot. Only valid on a fresh instance.
    pub fn load_snapshot(&mut self, snapshot: &Snapshot) -> Result<(), AggregateError> {
        if self.phase != Phase::Fresh {
            return Err(AggregateError::Lifecycle("load_snapshot"));
        }
        self.phase = Phase::SnapshotLoaded;
        let Some(state) = snapshot.state() else {
            return Ok(());
        };
        let state: S = serde_json::from_value(state.clone())
            .map_err(|e| AggregateError::SnapshotState(e.to_string()))?;
        self.mutator.restore(state);
        self.version = snapshot.version();
        Ok(())
    }
}

impl<Id, S> Aggregate<Id, S>
where
    Id: AggregateIdentity,
    S: Clone + Serialize,
{
    /// Snapshot of the current state at the current version.
    pub fn snapshot(&self) -> Result<Snapshot, AggregateError> {
        let state = serde_json::to_value(self.mutator.current())
            .map_err(|e| AggregateError::SnapshotState(e.to_string()))?;
        Ok(Snapshot::new(self.stream_id(), state, self.version))
    }

    /// Acknowledge a successful append: adopt the store's version, clear the
    /// uncommitted events and return the snapshot to persist.
    pub fn commit(&mut self, append: &AppendResult) -> Result<Snapshot, AggregateError> {
        if self.phase == Phase::Committed {
            return Err(AggregateError::Lifecycle("commit"));
        }
        self.version = append.version;
        self.uncommitted.clear();
        self.phase = Phase::Committed;
        self.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::CommandHeader;
    use crate::mutator::MutatorRegistry;
    use crate::command::Command;
    use keel_core::{Identifier, PrincipalId, TenantId};
    use proptest::prelude::*;
    use serde::Deserialize;

    keel_core::prefixed_uuid_id! {
        struct CounterId => "counter";
    }

    impl AggregateIdentity for CounterId {}

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Tally {
        total: i64,
        steps: u32,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Added(i64);

    impl Event for Added {}

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Doubled;

    impl Event for Doubled {}

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Unhandled;

    impl Event for Unhandled {}

    #[derive(Debug, Clone)]
    struct Bump;

    impl Command for Bump {}

    fn registry() -> Arc<MutatorRegistry<CounterId, Tally>> {
        Arc::new(
            MutatorRegistry::new("counter", Tally::default())
                .register::<Added, _>(|_, e, s| Tally {
                    total: s.total + e.0,
                    steps: s.steps + 1,
                })
                .register::<Doubled, _>(|_, _, s| Tally {
                    total: s.total * 2,
                    steps: s.steps + 1,
                }),
        )
    }

    fn command(id: CounterId) -> CommandEnvelope<CounterId, Bump> {
        CommandEnvelope::new(
            CommandHeader::new(TenantId::new(), PrincipalId::new(), "test"),
            id,
            Bump,
        )
    }

    /// Build a committed stream by applying `ops` one command at a time.
    fn committed_records(id: CounterId, ops: &[Option<i64>]) -> Vec<EventRecord> {
        let registry = registry();
        let mut records = Vec::new();
        for (idx, op) in ops.iter().enumerate() {
            let mut agg = Aggregate::new(id, registry.mutator()).unwrap();
            let cmd = command(id);
            match op {
                Some(n) => agg.apply(&cmd, Added(*n)).unwrap(),
                None => agg.apply(&cmd, Doubled).unwrap(),
            }
            let record = agg.uncommitted_records().remove(0);
            records.push(record.at_version(AggregateVersion::new(idx as u64 + 1)));
        }
        records
    }

    fn window(id: CounterId, records: &[EventRecord], from: u64) -> EventsStream {
        let events: Vec<EventRecord> = records[from as usize..].to_vec();
        EventsStream {
            stream_id: id.stream_id(),
            from: AggregateVersion::new(from),
            version: AggregateVersion::new(records.len() as u64),
            events,
            reached_end: true,
        }
    }

    #[test]
    fn construction_rejects_empty_id() {
        let err = Aggregate::new(CounterId::empty(), registry().mutator()).unwrap_err();
        assert_eq!(err, AggregateError::EmptyAggregateId { aggregate_type: "counter" });
    }

    #[test]
    fn apply_records_uncommitted_without_moving_version() {
        let id = CounterId::new();
        let mut agg = Aggregate::new(id, registry().mutator()).unwrap();
        let cmd = command(id);
        agg.apply(&cmd, Added(5)).unwrap();
        agg.apply(&cmd, Doubled).unwrap();

        assert_eq!(agg.version(), AggregateVersion::NOT_CREATED);
        assert_eq!(agg.state(), &Tally { total: 10, steps: 2 });
        assert_eq!(agg.uncommitted().len(), 2);
        assert!(agg.uncommitted().iter().all(|e| e.version() == AggregateVersion::NOT_CREATED));
        assert_eq!(agg.uncommitted()[0].command_id(), cmd.command_id());
        assert_eq!(agg.uncommitted()[0].tenant_id(), cmd.tenant_id());
    }

    #[test]
    fn apply_rejects_command_for_other_aggregate() {
        let mut agg = Aggregate::new(CounterId::new(), registry().mutator()).unwrap();
        let err = agg.apply(&command(CounterId::new()), Added(1)).unwrap_err();
        assert!(matches!(err, AggregateError::CommandTargetMismatch { .. }));
        assert!(!agg.has_uncommitted());
    }

    #[test]
    fn unknown_event_type_is_a_hard_error() {
        let id = CounterId::new();
        let mut agg = Aggregate::new(id, registry().mutator()).unwrap();
        let err = agg.apply(&command(id), Unhandled).unwrap_err();
        match err {
            AggregateError::UnknownEventType { aggregate_type, event_type } => {
                assert_eq!(aggregate_type, "counter");
                assert!(event_type.ends_with("Unhandled"));
            }
            other => panic!("expected UnknownEventType, got {other:?}"),
        }
        assert_eq!(agg.state(), &Tally::default());
    }

    #[test]
    fn load_events_requires_window_at_current_version() {
        let id = CounterId::new();
        let records = committed_records(id, &[Some(1), Some(2), Some(3)]);
        let mut agg = Aggregate::new(id, registry().mutator()).unwrap();
        let err = agg.load_events(window(id, &records, 1)).unwrap_err();
        assert_eq!(
            err,
            AggregateError::StreamPositionMismatch {
                expected: AggregateVersion::NOT_CREATED,
                found: AggregateVersion::new(1),
            }
        );
    }

    #[test]
    fn load_events_rejects_foreign_stream() {
        let id = CounterId::new();
        let other = CounterId::new();
        let records = committed_records(other, &[Some(1)]);
        let mut agg = Aggregate::new(id, registry().mutator()).unwrap();
        let err = agg.load_events(window(other, &records, 0)).unwrap_err();
        assert!(matches!(err, AggregateError::StreamMismatch { .. }));
    }

    #[test]
    fn load_events_rejects_gaps() {
        let id = CounterId::new();
        let mut records = committed_records(id, &[Some(1), Some(2)]);
        records.remove(0);
        let mut agg = Aggregate::new(id, registry().mutator()).unwrap();
        let stream = EventsStream {
            stream_id: id.stream_id(),
            from: AggregateVersion::NOT_CREATED,
            version: AggregateVersion::new(2),
            events: records,
            reached_end: true,
        };
        assert!(matches!(
            agg.load_events(stream),
            Err(AggregateError::StreamPositionMismatch { .. })
        ));
    }

    #[test]
    fn load_events_never_regresses_version() {
        let id = CounterId::new();
        let records = committed_records(id, &[Some(4), Some(6)]);
        let mut agg = Aggregate::new(id, registry().mutator()).unwrap();
        let mut stream = window(id, &records, 0);
        stream.version = AggregateVersion::new(1);
        agg.load_events(stream).unwrap();
        assert_eq!(agg.version(), AggregateVersion::new(2));
        assert_eq!(agg.state().total, 10);
    }

    #[test]
    fn snapshot_without_state_is_a_noop() {
        let id = CounterId::new();
        let mut agg = Aggregate::new(id, registry().mutator()).unwrap();
        agg.load_snapshot(&Snapshot::none(id.stream_id())).unwrap();
        assert_eq!(agg.version(), AggregateVersion::NOT_CREATED);
        assert_eq!(agg.state(), &Tally::default());
    }

    #[test]
    fn snapshot_can_only_be_loaded_first() {
        let id = CounterId::new();
        let mut agg = Aggregate::new(id, registry().mutator()).unwrap();
        agg.load_events(EventsStream::empty(id.stream_id(), AggregateVersion::NOT_CREATED))
            .unwrap();
        assert_eq!(
            agg.load_snapshot(&Snapshot::none(id.stream_id())),
            Err(AggregateError::Lifecycle("load_snapshot"))
        );
    }

    #[test]
    fn commit_adopts_store_version_and_clears_uncommitted() {
        let id = CounterId::new();
        let mut agg = Aggregate::new(id, registry().mutator()).unwrap();
        let cmd = command(id);
        agg.apply(&cmd, Added(3)).unwrap();
        agg.apply(&cmd, Added(4)).unwrap();

        let committed: Vec<EventRecord> = agg
            .uncommitted_records()
            .into_iter()
            .enumerate()
            .map(|(i, r)| r.at_version(AggregateVersion::new(i as u64 + 1)))
            .collect();
        let append = AppendResult {
            stream_id: id.stream_id(),
            previous_version: AggregateVersion::NOT_CREATED,
            version: AggregateVersion::new(2),
            committed,
        };
        let snapshot = agg.commit(&append).unwrap();

        assert!(!agg.has_uncommitted());
        assert_eq!(agg.version(), AggregateVersion::new(2));
        assert_eq!(snapshot.version(), AggregateVersion::new(2));
        assert_eq!(snapshot.state(), Some(&serde_json::json!({"total": 7, "steps": 2})));
        assert_eq!(agg.commit(&append), Err(AggregateError::Lifecycle("commit")));
    }

    fn op_strategy() -> impl Strategy<Value = Vec<Option<i64>>> {
        prop::collection::vec(prop::option::of(-1_000i64..1_000), 0..40)
    }

    proptest! {
        #[test]
        fn replay_matches_incremental_state(ops in op_strategy()) {
            let id = CounterId::new();
            let registry = registry();

            // Incremental: one aggregate applying every event in turn.
            let mut live = Aggregate::new(id, registry.mutator()).unwrap();
            let cmd = command(id);
            for op in &ops {
                match op {
                    Some(n) => live.apply(&cmd, Added(*n)).unwrap(),
                    None => live.apply(&cmd, Doubled).unwrap(),
                }
            }

            let records = committed_records(id, &ops);
            let mut replayed = Aggregate::new(id, registry.mutator()).unwrap();
            replayed.load_events(window(id, &records, 0)).unwrap();

            prop_assert_eq!(replayed.state(), live.state());
            prop_assert_eq!(replayed.version(), AggregateVersion::new(ops.len() as u64));
        }

        #[test]
        fn snapshot_plus_tail_equals_full_replay(ops in op_strategy(), cut in 0usize..40) {
            let id = CounterId::new();
            let registry = registry();
            let records = committed_records(id, &ops);
            let cut = cut.min(records.len());

            let mut full = Aggregate::new(id, registry.mutator()).unwrap();
            full.load_events(window(id, &records, 0)).unwrap();

            let mut head = Aggregate::new(id, registry.mutator()).unwrap();
            head.load_events(EventsStream {
                stream_id: id.stream_id(),
                from: AggregateVersion::NOT_CREATED,
                version: AggregateVersion::new(cut as u64),
                events: records[..cut].to_vec(),
                reached_end: false,
            }).unwrap();
            let snapshot = head.snapshot().unwrap();

            let mut resumed = Aggregate::new(id, registry.mutator()).unwrap();
            resumed.load_snapshot(&snapshot).unwrap();
            resumed.load_events(window(id, &records, cut as u64)).unwrap();

            prop_assert_eq!(resumed.state(), full.state());
            prop_assert_eq!(resumed.version(), full.version());
        }
    }
}
