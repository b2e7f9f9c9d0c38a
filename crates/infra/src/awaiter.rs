//! Read-after-write support: wait until a command's events were published.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use keel_core::CommandSequenceId;

#[derive(Debug, Error)]
pub enum PublicationError {
    #[error("publication of {sequence_id} not observed within {waited:?}")]
    Timeout {
        sequence_id: CommandSequenceId,
        waited: Duration,
    },

    #[error("publication awaiter failure: {0}")]
    Internal(String),
}

#[async_trait]
pub trait PublicationAwaiter: Send + Sync + core::fmt::Debug {
    /// Signal that the events of `sequence_id` have been published.
    fn mark_as_ready(&self, sequence_id: CommandSequenceId);

    /// Resolve once `sequence_id` was marked ready, or fail after `timeout`.
    async fn wait_for_publication(
        &self,
        sequence_id: CommandSequenceId,
        timeout: Duration,
    ) -> Result<(), PublicationError>;
}

/// For in-process publication, which completes before the command returns.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPublicationAwaiter;

#[async_trait]
impl PublicationAwaiter for NoopPublicationAwaiter {
    fn mark_as_ready(&self, _sequence_id: CommandSequenceId) {}

    async fn wait_for_publication(
        &self,
        _sequence_id: CommandSequenceId,
        _timeout: Duration,
    ) -> Result<(), PublicationError> {
        Ok(())
    }
}

/// Blocks waiters until the matching [`mark_as_ready`](PublicationAwaiter::mark_as_ready).
///
/// A mark that arrives before the wait is remembered, so the order of the
/// two calls does not matter. Only the `capacity` most recent unobserved
/// marks are kept; a wait that arrives after its mark was evicted times out.
#[derive(Debug)]
pub struct SignalPublicationAwaiter {
    slots: Mutex<Slots>,
    capacity: usize,
}

#[derive(Debug, Default)]
struct Slots {
    waiting: HashMap<CommandSequenceId, watch::Sender<bool>>,
    /// Unobserved marks with the generation they were recorded at.
    marked: HashMap<CommandSequenceId, u64>,
    order: VecDeque<(CommandSequenceId, u64)>,
    generation: u64,
}

impl Slots {
    fn remember(&mut self, sequence_id: CommandSequenceId, capacity: usize) {
        self.generation += 1;
        self.marked.insert(sequence_id, self.generation);
        self.order.push_back((sequence_id, self.generation));
        while self.order.len() > capacity {
            if let Some((evicted, generation)) = self.order.pop_front() {
                if self.marked.get(&evicted) == Some(&generation) {
                    self.marked.remove(&evicted);
                }
            }
        }
    }
}

impl Default for SignalPublicationAwaiter {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalPublicationAwaiter {
    pub const DEFAULT_CAPACITY: usize = 4096;

    pub fn new() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(Slots::default()),
            capacity: capacity.max(1),
        }
    }

    /// Number of sequences marked or awaited but not yet observed.
    pub fn pending(&self) -> usize {
        self.slots
            .lock()
            .map(|s| s.waiting.len() + s.marked.len())
            .unwrap_or(0)
    }

    /// `None` when the mark was already recorded.
    fn subscribe(
        &self,
        sequence_id: CommandSequenceId,
    ) -> Result<Option<watch::Receiver<bool>>, PublicationError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| PublicationError::Internal("lock poisoned".to_string()))?;
        if slots.marked.remove(&sequence_id).is_some() {
            return Ok(None);
        }
        Ok(Some(
            slots
                .waiting
                .entry(sequence_id)
                .or_insert_with(|| watch::channel(false).0)
                .subscribe(),
        ))
    }

    fn release(&self, sequence_id: CommandSequenceId) {
        if let Ok(mut slots) = self.slots.lock() {
            slots.waiting.remove(&sequence_id);
        }
    }
}

#[async_trait]
impl PublicationAwaiter for SignalPublicationAwaiter {
    fn mark_as_ready(&self, sequence_id: CommandSequenceId) {
        let Ok(mut slots) = self.slots.lock() else {
            return;
        };
        if let Some(waiting) = slots.waiting.get(&sequence_id) {
            waiting.send_replace(true);
            return;
        }
        slots.remember(sequence_id, self.capacity);
    }

    async fn wait_for_publication(
        &self,
        sequence_id: CommandSequenceId,
        timeout: Duration,
    ) -> Result<(), PublicationError> {
        let Some(mut ready) = self.subscribe(sequence_id)? else {
            return Ok(());
        };
        let outcome = tokio::time::timeout(timeout, ready.wait_for(|r| *r))
            .await
            .map(|observed| observed.map(|_| ()));
        match outcome {
            Ok(Ok(())) => {
                self.release(sequence_id);
                Ok(())
            }
            Ok(Err(_)) => Err(PublicationError::Internal(format!(
                "signal for {sequence_id} dropped"
            ))),
            Err(_) => {
                self.release(sequence_id);
                Err(PublicationError::Timeout {
                    sequence_id,
                    waited: timeout,
                })
            }
        }
    }
}
