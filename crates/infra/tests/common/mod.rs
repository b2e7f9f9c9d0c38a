#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Barrier;

use keel_core::{
    AggregateIdentity, AggregateVersion, ExpectedVersion, PrincipalId, StreamId, TenantId,
};
use keel_events::{
    Aggregate, AppendResult, Command, CommandEnvelope, CommandExecutionResult, CommandHeader, Event,
    EventRecord, EventsStream, MutatorRegistry, PayloadTypes,
};
use keel_infra::{
    CancellationToken, CommandHandler, EngineConfig, EngineError, EventAppender, EventPublisher,
    EventSourcingEngine, EventStore, EventStoreError, HandleCommand, InMemoryBackend,
    InMemoryEventStore, PublishError, SnapshotStore, StorageError, StorageResolver,
};

keel_core::prefixed_uuid_id! {
    pub struct CounterId => "counter";
}

impl AggregateIdentity for CounterId {}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub started: bool,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Started;

impl Event for Started {
    fn event_type() -> &'static str {
        "tests.counter.started"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Added {
    pub by: i64,
}

impl Event for Added {
    fn event_type() -> &'static str {
        "tests.counter.added"
    }
}

#[derive(Debug, Clone)]
pub struct Start;

impl Command for Start {}

/// `by == 0` is accepted without changes.
#[derive(Debug, Clone)]
pub struct Add {
    pub by: i64,
}

impl Command for Add {}

/// Applies an event, then rejects the command.
#[derive(Debug, Clone)]
pub struct AddThenReject {
    pub by: i64,
}

impl Command for AddThenReject {}

pub fn registry() -> MutatorRegistry<CounterId, Tally> {
    MutatorRegistry::new("counter", Tally::default())
        .register::<Started, _>(|_, _, s| Tally {
            started: true,
            ..s.clone()
        })
        .register::<Added, _>(|_, e, s| Tally {
            total: s.total + e.by,
            ..s.clone()
        })
}

pub fn payload_types() -> PayloadTypes {
    let mut types = PayloadTypes::new();
    types.register::<Started>().unwrap();
    types.register::<Added>().unwrap();
    types
}

type Counter = Aggregate<CounterId, Tally>;
type Outcome = Result<CommandExecutionResult<CounterId>, EngineError>;

fn start(counter: &mut Counter, command: &CommandEnvelope<CounterId, Start>) -> Outcome {
    if counter.state().started {
        return Ok(CommandExecutionResult::error(command, "already_started"));
    }
    counter.apply(command, Started)?;
    Ok(CommandExecutionResult::ok(command))
}

fn add(counter: &mut Counter, command: &CommandEnvelope<CounterId, Add>) -> Outcome {
    if !counter.state().started {
        return Ok(CommandExecutionResult::not_exists(command));
    }
    let by = command.payload().by;
    if by != 0 {
        counter.apply(command, Added { by })?;
    }
    Ok(CommandExecutionResult::ok_if_changes(command, by != 0))
}

fn add_then_reject(counter: &mut Counter, command: &CommandEnvelope<CounterId, AddThenReject>) -> Outcome {
    counter.apply(command, Added { by: command.payload().by })?;
    Ok(CommandExecutionResult::error(command, "changed_my_mind"))
}

pub struct Counters {
    pub handler: CommandHandler<CounterId, Tally>,
}

impl Counters {
    pub fn new(storage: Arc<dyn StorageResolver>, config: &EngineConfig) -> Arc<Self> {
        Arc::new(Self {
            handler: CommandHandler::new(storage, Arc::new(registry()), config),
        })
    }
}

#[async_trait]
impl HandleCommand<CounterId, Start> for Counters {
    async fn handle(&self, command: CommandEnvelope<CounterId, Start>, cancel: &CancellationToken) -> Outcome {
        self.handler.update(&command, start, cancel).await
    }
}

#[async_trait]
impl HandleCommand<CounterId, Add> for Counters {
    async fn handle(&self, command: CommandEnvelope<CounterId, Add>, cancel: &CancellationToken) -> Outcome {
        self.handler.update(&command, add, cancel).await
    }
}

#[async_trait]
impl HandleCommand<CounterId, AddThenReject> for Counters {
    async fn handle(
        &self,
        command: CommandEnvelope<CounterId, AddThenReject>,
        cancel: &CancellationToken,
    ) -> Outcome {
        self.handler.update(&command, add_then_reject, cancel).await
    }
}

/// Engine over `storage` with every counter command registered.
pub async fn engine_over(
    backend: &InMemoryBackend,
    storage: Arc<dyn StorageResolver>,
    config: EngineConfig,
) -> EventSourcingEngine {
    let counters = Counters::new(Arc::clone(&storage), &config);
    EventSourcingEngine::builder(
        config,
        storage,
        Arc::clone(&backend.type_mappings),
        backend.awaiter.clone(),
    )
    .register::<CounterId, Start, _>(Arc::clone(&counters))
    .register::<CounterId, Add, _>(Arc::clone(&counters))
    .register::<CounterId, AddThenReject, _>(counters)
    .build()
    .await
    .unwrap()
}

pub struct Harness {
    pub backend: InMemoryBackend,
    pub engine: EventSourcingEngine,
    pub tenant: TenantId,
    pub principal: PrincipalId,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_config(EngineConfig::default()).await
    }

    pub async fn with_config(config: EngineConfig) -> Self {
        keel_observability::init_for_tests();
        let backend = InMemoryBackend::new(payload_types(), &config);
        let engine = engine_over(&backend, backend.storage.clone(), config).await;
        Self {
            backend,
            engine,
            tenant: TenantId::new(),
            principal: PrincipalId::new(),
        }
    }

    pub async fn send<P: Command>(&self, id: CounterId, payload: P) -> Outcome {
        self.engine
            .bus()
            .send(self.tenant, self.principal, "tests", id, payload, &CancellationToken::new())
            .await
    }

    pub fn store(&self) -> Arc<InMemoryEventStore> {
        self.backend.storage.tenant_event_store(self.tenant).unwrap()
    }

    pub fn version(&self, id: CounterId) -> AggregateVersion {
        self.store().stream_version(&id.stream_id()).unwrap()
    }
}

/// Event store wrapper that records the expected version of every append and
/// can hold a number of appends at a barrier until all of them arrived.
pub struct GatedEventStore {
    inner: Arc<InMemoryEventStore>,
    gate: Mutex<Option<(Arc<Barrier>, usize)>>,
    expected: Mutex<Vec<ExpectedVersion>>,
}

impl GatedEventStore {
    pub fn new(inner: Arc<InMemoryEventStore>) -> Self {
        Self {
            inner,
            gate: Mutex::new(None),
            expected: Mutex::new(Vec::new()),
        }
    }

    /// Hold the next `count` appends until all `count` are waiting.
    pub fn gate_next(&self, count: usize) {
        *self.gate.lock().unwrap() = Some((Arc::new(Barrier::new(count)), count));
    }

    pub fn expected_versions(&self) -> Vec<ExpectedVersion> {
        self.expected.lock().unwrap().clone()
    }

    fn take_gate(&self) -> Option<Arc<Barrier>> {
        let mut gate = self.gate.lock().unwrap();
        let (barrier, remaining) = gate.as_mut()?;
        let barrier = Arc::clone(barrier);
        *remaining -= 1;
        if *remaining == 0 {
            *gate = None;
        }
        Some(barrier)
    }
}

#[async_trait]
impl EventAppender for GatedEventStore {
    async fn append_to_stream(
        &self,
        command: &CommandHeader,
        stream_id: &StreamId,
        expected: ExpectedVersion,
        events: Vec<EventRecord>,
    ) -> Result<AppendResult, EventStoreError> {
        self.expected.lock().unwrap().push(expected);
        if let Some(barrier) = self.take_gate() {
            barrier.wait().await;
        }
        self.inner
            .append_to_stream(command, stream_id, expected, events)
            .await
    }
}

#[async_trait]
impl EventStore for GatedEventStore {
    async fn load_events_stream(
        &self,
        stream_id: &StreamId,
        from: AggregateVersion,
        to: Option<AggregateVersion>,
    ) -> Result<EventsStream, EventStoreError> {
        self.inner.load_events_stream(stream_id, from, to).await
    }
}

/// Rejects every append as stale.
pub struct ConflictingEventStore {
    inner: Arc<InMemoryEventStore>,
    pub appends: AtomicUsize,
}

impl ConflictingEventStore {
    pub fn new(inner: Arc<InMemoryEventStore>) -> Self {
        Self {
            inner,
            appends: AtomicUsize::new(0),
        }
    }

    pub fn appends(&self) -> usize {
        self.appends.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventAppender for ConflictingEventStore {
    async fn append_to_stream(
        &self,
        _command: &CommandHeader,
        stream_id: &StreamId,
        expected: ExpectedVersion,
        _events: Vec<EventRecord>,
    ) -> Result<AppendResult, EventStoreError> {
        self.appends.fetch_add(1, Ordering::SeqCst);
        let actual = match expected {
            ExpectedVersion::Exact(v) => v.next(),
            ExpectedVersion::Any => AggregateVersion::NOT_CREATED.next(),
        };
        Err(EventStoreError::Concurrency {
            stream_id: stream_id.clone(),
            expected,
            actual,
        })
    }
}

#[async_trait]
impl EventStore for ConflictingEventStore {
    async fn load_events_stream(
        &self,
        stream_id: &StreamId,
        from: AggregateVersion,
        to: Option<AggregateVersion>,
    ) -> Result<EventsStream, EventStoreError> {
        self.inner.load_events_stream(stream_id, from, to).await
    }
}

/// Resolver that swaps the event store of every tenant for `events` and
/// delegates snapshots and publication to `inner`.
pub struct OverrideEventStore<E> {
    pub inner: Arc<dyn StorageResolver>,
    pub events: Arc<E>,
}

impl<E: EventStore + 'static> StorageResolver for OverrideEventStore<E> {
    fn event_store(&self, _tenant_id: TenantId) -> Result<Arc<dyn EventStore>, StorageError> {
        Ok(self.events.clone())
    }

    fn snapshot_store(&self, tenant_id: TenantId) -> Result<Arc<dyn SnapshotStore>, StorageError> {
        self.inner.snapshot_store(tenant_id)
    }

    fn publisher(&self, tenant_id: TenantId) -> Result<Arc<dyn EventPublisher>, StorageError> {
        self.inner.publisher(tenant_id)
    }
}

/// Cancels `cancel` while the append is in flight, then lets it complete.
pub struct CancellingEventStore {
    inner: Arc<InMemoryEventStore>,
    cancel: CancellationToken,
}

impl CancellingEventStore {
    pub fn new(inner: Arc<InMemoryEventStore>, cancel: CancellationToken) -> Self {
        Self { inner, cancel }
    }
}

#[async_trait]
impl EventAppender for CancellingEventStore {
    async fn append_to_stream(
        &self,
        command: &CommandHeader,
        stream_id: &StreamId,
        expected: ExpectedVersion,
        events: Vec<EventRecord>,
    ) -> Result<AppendResult, EventStoreError> {
        self.cancel.cancel();
        self.inner
            .append_to_stream(command, stream_id, expected, events)
            .await
    }
}

#[async_trait]
impl EventStore for CancellingEventStore {
    async fn load_events_stream(
        &self,
        stream_id: &StreamId,
        from: AggregateVersion,
        to: Option<AggregateVersion>,
    ) -> Result<EventsStream, EventStoreError> {
        self.inner.load_events_stream(stream_id, from, to).await
    }
}

/// Publisher whose transport is always down.
#[derive(Default)]
pub struct FailingPublisher {
    attempts: AtomicUsize,
}

impl FailingPublisher {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventPublisher for FailingPublisher {
    async fn publish(&self, _command: &CommandHeader, _events: &[EventRecord]) -> Result<(), PublishError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PublishError::Transport("broker unreachable".to_string()))
    }
}

/// Resolver that swaps the publisher of every tenant for `publisher`.
pub struct OverridePublisher<P> {
    pub inner: Arc<dyn StorageResolver>,
    pub publisher: Arc<P>,
}

impl<P: EventPublisher + 'static> StorageResolver for OverridePublisher<P> {
    fn event_store(&self, tenant_id: TenantId) -> Result<Arc<dyn EventStore>, StorageError> {
        self.inner.event_store(tenant_id)
    }

    fn snapshot_store(&self, tenant_id: TenantId) -> Result<Arc<dyn SnapshotStore>, StorageError> {
        self.inner.snapshot_store(tenant_id)
    }

    fn publisher(&self, _tenant_id: TenantId) -> Result<Arc<dyn EventPublisher>, StorageError> {
        Ok(self.publisher.clone())
    }
}
