//! Async command pipeline, storage seams and engine assembly.
//!
//! Storage backends plug in behind [`EventStore`], [`SnapshotStore`],
//! [`TypeMappingStorage`] and [`EventPublisher`]; in-memory implementations
//! of each ship here for tests and single-process use.

pub mod awaiter;
pub mod command_bus;
pub mod command_handler;
pub mod config;
pub mod engine;
pub mod error;
pub mod event_store;
pub mod publisher;
pub mod serializer;
pub mod snapshot_store;
pub mod storage;
pub mod type_mapping;
pub mod updater;

pub use awaiter::{
    NoopPublicationAwaiter, PublicationAwaiter, PublicationError, SignalPublicationAwaiter,
};
pub use command_bus::{CommandBus, CommandBusBuilder, HandleCommand};
pub use command_handler::CommandHandler;
pub use config::EngineConfig;
pub use engine::{EngineBuilder, EventSourcingEngine, InMemoryBackend};
pub use error::{ConcurrencyConflict, EngineError, EngineResult};
pub use event_store::{
    EventAppender, EventCodec, EventStore, EventStoreError, InMemoryEventStore, StoredEvent,
};
pub use publisher::{EventPublisher, InMemoryEventPublisher, PublishError, PublishedEvents};
pub use serializer::{JsonPayloadSerializer, PayloadSerializer, SerializationError};
pub use snapshot_store::{InMemorySnapshotStore, SnapshotStore, SnapshotStoreError};
pub use storage::{InMemoryStorage, StorageError, StorageResolver};
pub use type_mapping::{
    InMemoryTypeMappingStorage, TypeMapping, TypeMappingError, TypeMappingHandler,
    TypeMappingStorage,
};
pub use updater::AggregateUpdater;

pub use tokio_util::sync::CancellationToken;
