//! Command routing by `(aggregate id type, payload type)`.
//!
//! Handlers are registered once at startup into an explicit table; dispatch
//! is a `TypeId` lookup followed by a call through a typed closure. There is
//! no runtime reflection on any path.
//!
//! ## Fast and slow paths
//!
//! - [`CommandBus::send`]: the payload type is known statically.
//! - [`CommandBus::send_dyn`]: only `Box<dyn CommandPayload>` is known; the
//!   payload's `TypeId` selects the route, whose closure downcasts it and
//!   continues exactly like the fast path.
//!
//! Both build the same envelope and reach the same handler.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use keel_core::{AggregateIdentity, PrincipalId, TenantId};
use keel_events::{
    Command, CommandEnvelope, CommandExecutionResult, CommandHeader, CommandPayload, EventEnvelope,
};

use crate::awaiter::PublicationAwaiter;
use crate::error::EngineError;

/// Handler of one command payload type for one aggregate type.
#[async_trait]
pub trait HandleCommand<Id, P>: Send + Sync {
    async fn handle(
        &self,
        command: CommandEnvelope<Id, P>,
        cancel: &CancellationToken,
    ) -> Result<CommandExecutionResult<Id>, EngineError>;
}

type Outcome<Id> = BoxFuture<'static, Result<CommandExecutionResult<Id>, EngineError>>;

type TypedRoute<Id, P> = Arc<dyn Fn(CommandEnvelope<Id, P>, CancellationToken) -> Outcome<Id> + Send + Sync>;

type DynRoute<Id> =
    Arc<dyn Fn(CommandHeader, Id, Box<dyn CommandPayload>, CancellationToken) -> Outcome<Id> + Send + Sync>;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
struct RouteKey {
    aggregate_id: TypeId,
    payload: TypeId,
}

impl RouteKey {
    fn of<Id: 'static, P: 'static>() -> Self {
        Self {
            aggregate_id: TypeId::of::<Id>(),
            payload: TypeId::of::<P>(),
        }
    }
}

struct Route {
    aggregate_id_type: &'static str,
    command_type: &'static str,
    /// `TypedRoute<Id, P>`
    typed: Arc<dyn Any + Send + Sync>,
    /// `DynRoute<Id>`
    dynamic: Arc<dyn Any + Send + Sync>,
}

#[derive(Default)]
pub struct CommandBusBuilder {
    routes: HashMap<RouteKey, Route>,
}

impl CommandBusBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `P` commands for aggregates identified by `Id` to `handler`.
    ///
    /// Registering the same pair again replaces the earlier handler.
    pub fn register<Id, P, H>(mut self, handler: Arc<H>) -> Self
    where
        Id: AggregateIdentity,
        P: Command,
        H: HandleCommand<Id, P> + 'static,
    {
        let typed: TypedRoute<Id, P> = Arc::new(move |command, cancel| {
            let handler = Arc::clone(&handler);
            async move { handler.handle(command, &cancel).await }.boxed()
        });

        let forward = Arc::clone(&typed);
        let dynamic: DynRoute<Id> = Arc::new(move |header, aggregate_id, payload, cancel| {
            match payload.into_any().downcast::<P>() {
                Ok(payload) => forward(CommandEnvelope::new(header, aggregate_id, *payload), cancel),
                Err(_) => {
                    let error = not_registered::<Id>(P::command_type());
                    async move { Err(error) }.boxed()
                }
            }
        });

        let replaced = self.routes.insert(
            RouteKey::of::<Id, P>(),
            Route {
                aggregate_id_type: type_name::<Id>(),
                command_type: P::command_type(),
                typed: Arc::new(typed),
                dynamic: Arc::new(dynamic),
            },
        );
        if replaced.is_some() {
            debug!(
                aggregate_id_type = type_name::<Id>(),
                command_type = P::command_type(),
                "replaced command handler"
            );
        }
        self
    }

    pub fn build(self, awaiter: Arc<dyn PublicationAwaiter>, publication_timeout: Duration) -> CommandBus {
        CommandBus {
            routes: self.routes,
            awaiter,
            publication_timeout,
        }
    }
}

pub struct CommandBus {
    routes: HashMap<RouteKey, Route>,
    awaiter: Arc<dyn PublicationAwaiter>,
    publication_timeout: Duration,
}

impl CommandBus {
    pub fn builder() -> CommandBusBuilder {
        CommandBusBuilder::new()
    }

    pub fn is_registered<Id: 'static, P: 'static>(&self) -> bool {
        self.routes.contains_key(&RouteKey::of::<Id, P>())
    }

    /// Send a new root command: fresh command and sequence ids, no parent.
    pub async fn send<Id, P>(
        &self,
        tenant_id: TenantId,
        principal_id: PrincipalId,
        source: &str,
        aggregate_id: Id,
        payload: P,
        cancel: &CancellationToken,
    ) -> Result<CommandExecutionResult<Id>, EngineError>
    where
        Id: AggregateIdentity,
        P: Command,
    {
        let header = CommandHeader::new(tenant_id, principal_id, source);
        self.dispatch(CommandEnvelope::new(header, aggregate_id, payload), cancel)
            .await
    }

    /// Send a follow-up of `event`, keeping its tenant, principal and sequence
    /// and recording its command as the parent.
    pub async fn send_chained<Id, P, EId>(
        &self,
        event: &EventEnvelope<EId>,
        aggregate_id: Id,
        payload: P,
        source: &str,
        cancel: &CancellationToken,
    ) -> Result<CommandExecutionResult<Id>, EngineError>
    where
        Id: AggregateIdentity,
        P: Command,
    {
        self.dispatch(CommandEnvelope::chained_from(event, aggregate_id, payload, source), cancel)
            .await
    }

    /// Route an already built envelope.
    #[instrument(
        skip_all,
        fields(aggregate_id = %command.aggregate_id(), command_type = P::command_type())
    )]
    pub async fn dispatch<Id, P>(
        &self,
        command: CommandEnvelope<Id, P>,
        cancel: &CancellationToken,
    ) -> Result<CommandExecutionResult<Id>, EngineError>
    where
        Id: AggregateIdentity,
        P: Command,
    {
        let route = self.route::<Id>(RouteKey::of::<Id, P>(), P::command_type())?;
        let typed = route
            .typed
            .downcast_ref::<TypedRoute<Id, P>>()
            .ok_or_else(|| not_registered::<Id>(P::command_type()))?;
        typed(command, cancel.clone()).await
    }

    /// Slow path: the payload's concrete type is only known at runtime.
    #[instrument(
        skip_all,
        fields(aggregate_id = %aggregate_id, command_type = payload.command_type_name())
    )]
    pub async fn send_dyn<Id>(
        &self,
        tenant_id: TenantId,
        principal_id: PrincipalId,
        source: &str,
        aggregate_id: Id,
        payload: Box<dyn CommandPayload>,
        cancel: &CancellationToken,
    ) -> Result<CommandExecutionResult<Id>, EngineError>
    where
        Id: AggregateIdentity,
    {
        let key = RouteKey {
            aggregate_id: TypeId::of::<Id>(),
            payload: payload.payload_type_id(),
        };
        let route = self.route::<Id>(key, payload.command_type_name())?;
        let dynamic = route
            .dynamic
            .downcast_ref::<DynRoute<Id>>()
            .ok_or_else(|| not_registered::<Id>(route.command_type))?;
        let header = CommandHeader::new(tenant_id, principal_id, source);
        dynamic(header, aggregate_id, payload, cancel.clone()).await
    }

    /// [`send`](Self::send), then wait until the command's events were
    /// published when it produced any.
    pub async fn send_and_wait<Id, P>(
        &self,
        tenant_id: TenantId,
        principal_id: PrincipalId,
        source: &str,
        aggregate_id: Id,
        payload: P,
        cancel: &CancellationToken,
    ) -> Result<CommandExecutionResult<Id>, EngineError>
    where
        Id: AggregateIdentity,
        P: Command,
    {
        let result = self
            .send(tenant_id, principal_id, source, aggregate_id, payload, cancel)
            .await?;
        if result.is_accepted() && result.has_changes() {
            self.awaiter
                .wait_for_publication(result.sequence_id(), self.publication_timeout)
                .await?;
        }
        Ok(result)
    }

    fn route<Id: 'static>(&self, key: RouteKey, command_type: &'static str) -> Result<&Route, EngineError> {
        self.routes
            .get(&key)
            .ok_or_else(|| not_registered::<Id>(command_type))
    }
}

fn not_registered<Id>(command_type: &'static str) -> EngineError {
    EngineError::HandlerNotRegistered {
        aggregate_id_type: type_name::<Id>(),
        command_type,
    }
}

impl core::fmt::Debug for CommandBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let mut routes: Vec<(&str, &str)> = self
            .routes
            .values()
            .map(|r| (r.aggregate_id_type, r.command_type))
            .collect();
        routes.sort_unstable();
        f.debug_struct("CommandBus")
            .field("routes", &routes)
            .field("publication_timeout", &self.publication_timeout)
            .finish()
    }
}
