//! Engine assembly and the process-wide convenience handle.

use std::sync::{Arc, OnceLock};

use tracing::info;

use keel_core::AggregateIdentity;
use keel_events::{Command, PayloadTypes};

use crate::awaiter::{PublicationAwaiter, SignalPublicationAwaiter};
use crate::command_bus::{CommandBus, CommandBusBuilder, HandleCommand};
use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::event_store::EventCodec;
use crate::publisher::InMemoryEventPublisher;
use crate::serializer::JsonPayloadSerializer;
use crate::storage::{InMemoryStorage, StorageResolver};
use crate::type_mapping::{InMemoryTypeMappingStorage, TypeMappingHandler};

static CURRENT: OnceLock<Arc<EventSourcingEngine>> = OnceLock::new();

/// Everything a running application needs to execute commands.
///
/// Components receive the engine (or its parts) explicitly. The global
/// [`install`](Self::install)/[`current`](Self::current) pair exists for call
/// sites that cannot be handed one; it is written once at startup.
pub struct EventSourcingEngine {
    config: EngineConfig,
    storage: Arc<dyn StorageResolver>,
    type_mappings: Arc<TypeMappingHandler>,
    awaiter: Arc<dyn PublicationAwaiter>,
    bus: CommandBus,
}

impl EventSourcingEngine {
    pub fn builder(
        config: EngineConfig,
        storage: Arc<dyn StorageResolver>,
        type_mappings: Arc<TypeMappingHandler>,
        awaiter: Arc<dyn PublicationAwaiter>,
    ) -> EngineBuilder {
        EngineBuilder {
            config,
            storage,
            type_mappings,
            awaiter,
            bus: CommandBus::builder(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn storage(&self) -> &Arc<dyn StorageResolver> {
        &self.storage
    }

    pub fn type_mappings(&self) -> &Arc<TypeMappingHandler> {
        &self.type_mappings
    }

    pub fn awaiter(&self) -> &Arc<dyn PublicationAwaiter> {
        &self.awaiter
    }

    pub fn bus(&self) -> &CommandBus {
        &self.bus
    }

    /// Make `engine` the process-wide engine. Fails if one is installed.
    pub fn install(engine: Arc<Self>) -> Result<(), EngineError> {
        CURRENT
            .set(engine)
            .map_err(|_| EngineError::EngineAlreadyInstalled)
    }

    pub fn current() -> Result<Arc<Self>, EngineError> {
        CURRENT.get().cloned().ok_or(EngineError::EngineNotInstalled)
    }

    /// Release the type mapping handler; later storage traffic fails.
    pub fn shutdown(&self) {
        self.type_mappings.dispose();
        info!("event sourcing engine shut down");
    }
}

impl core::fmt::Debug for EventSourcingEngine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventSourcingEngine")
            .field("config", &self.config)
            .field("type_mappings", &self.type_mappings)
            .field("bus", &self.bus)
            .finish()
    }
}

pub struct EngineBuilder {
    config: EngineConfig,
    storage: Arc<dyn StorageResolver>,
    type_mappings: Arc<TypeMappingHandler>,
    awaiter: Arc<dyn PublicationAwaiter>,
    bus: CommandBusBuilder,
}

impl EngineBuilder {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Storage for constructing command handlers before registration.
    pub fn storage(&self) -> Arc<dyn StorageResolver> {
        Arc::clone(&self.storage)
    }

    pub fn register<Id, P, H>(mut self, handler: Arc<H>) -> Self
    where
        Id: AggregateIdentity,
        P: Command,
        H: HandleCommand<Id, P> + 'static,
    {
        self.bus = self.bus.register::<Id, P, H>(handler);
        self
    }

    /// Validate the configuration and synchronize type mappings with storage.
    pub async fn build(self) -> Result<EventSourcingEngine, EngineError> {
        self.config.validate()?;
        self.type_mappings
            .synchronize_app_types_with_storage_types()
            .await?;
        let bus = self
            .bus
            .build(Arc::clone(&self.awaiter), self.config.publication_wait_timeout);
        info!(
            max_command_attempts = self.config.max_command_attempts,
            "event sourcing engine ready"
        );
        Ok(EventSourcingEngine {
            config: self.config,
            storage: self.storage,
            type_mappings: self.type_mappings,
            awaiter: self.awaiter,
            bus,
        })
    }
}

/// In-memory backend for tests/dev: JSON payloads, in-memory type mapping
/// table, per-tenant stores and a broadcast publisher feeding a signal awaiter.
#[derive(Debug, Clone)]
pub struct InMemoryBackend {
    pub storage: Arc<InMemoryStorage>,
    pub type_mappings: Arc<TypeMappingHandler>,
    pub awaiter: Arc<SignalPublicationAwaiter>,
}

impl InMemoryBackend {
    pub fn new(app_types: PayloadTypes, config: &EngineConfig) -> Self {
        let type_mappings = Arc::new(TypeMappingHandler::new(
            Arc::new(InMemoryTypeMappingStorage::new()),
            app_types,
            config.type_mapping_wait_timeout,
        ));
        let awaiter = Arc::new(SignalPublicationAwaiter::new());
        let publisher = Arc::new(InMemoryEventPublisher::new(awaiter.clone()));
        let codec = EventCodec::new(Arc::clone(&type_mappings), Arc::new(JsonPayloadSerializer));
        Self {
            storage: Arc::new(InMemoryStorage::new(codec, publisher)),
            type_mappings,
            awaiter,
        }
    }

    pub fn engine_builder(&self, config: EngineConfig) -> EngineBuilder {
        EventSourcingEngine::builder(
            config,
            self.storage.clone(),
            Arc::clone(&self.type_mappings),
            self.awaiter.clone(),
        )
    }
}
