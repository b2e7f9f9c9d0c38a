//! Event publication after a durable append.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::trace;

use keel_events::{CommandHeader, EventRecord};

use crate::awaiter::PublicationAwaiter;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("event publication failed: {0}")]
    Transport(String),
}

/// Fan-out of committed events to downstream consumers.
///
/// Only ever called with events that are already persisted.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, command: &CommandHeader, events: &[EventRecord]) -> Result<(), PublishError>;
}

/// One command's worth of committed events.
#[derive(Debug, Clone)]
pub struct PublishedEvents {
    pub command: CommandHeader,
    pub events: Arc<[EventRecord]>,
}

/// In-process pub/sub publisher for tests/dev.
///
/// - best-effort fan-out over a bounded `tokio::sync::broadcast` channel
///   (slow subscribers observe `Lagged`)
/// - publishing without subscribers is not an error
/// - every publish marks the command's sequence ready on the awaiter
#[derive(Debug)]
pub struct InMemoryEventPublisher {
    sender: broadcast::Sender<PublishedEvents>,
    awaiter: Arc<dyn PublicationAwaiter>,
}

impl InMemoryEventPublisher {
    pub const DEFAULT_CAPACITY: usize = 1024;

    pub fn new(awaiter: Arc<dyn PublicationAwaiter>) -> Self {
        Self::with_capacity(awaiter, Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(awaiter: Arc<dyn PublicationAwaiter>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender, awaiter }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedEvents> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, command: &CommandHeader, events: &[EventRecord]) -> Result<(), PublishError> {
        let message = PublishedEvents {
            command: command.clone(),
            events: events.into(),
        };
        // Err only means nobody is subscribed.
        let receivers = self.sender.send(message).unwrap_or(0);
        trace!(receivers, events = events.len(), "published events");
        self.awaiter.mark_as_ready(command.sequence_id());
        Ok(())
    }
}
