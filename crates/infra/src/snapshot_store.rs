//! Snapshot persistence.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

use keel_core::StreamId;
use keel_events::Snapshot;

#[derive(Debug, Error)]
pub enum SnapshotStoreError {
    #[error("snapshot for {expected} cannot be stored under {found}")]
    StreamMismatch { expected: StreamId, found: StreamId },

    #[error("snapshot storage failure: {0}")]
    Storage(String),
}

#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Latest snapshot of `stream_id`; [`Snapshot::none`] when there is none.
    async fn load_snapshot(&self, stream_id: &StreamId) -> Result<Snapshot, SnapshotStoreError>;

    async fn save_snapshot(
        &self,
        stream_id: &StreamId,
        snapshot: Snapshot,
    ) -> Result<(), SnapshotStoreError>;
}

/// In-memory snapshot store for tests/dev.
///
/// Keeps one snapshot per stream. An older snapshot never replaces a newer one.
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<StreamId, Snapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_poisoned() -> SnapshotStoreError {
    SnapshotStoreError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn load_snapshot(&self, stream_id: &StreamId) -> Result<Snapshot, SnapshotStoreError> {
        let snapshots = self.snapshots.read().map_err(|_| lock_poisoned())?;
        Ok(snapshots
            .get(stream_id)
            .cloned()
            .unwrap_or_else(|| Snapshot::none(stream_id.clone())))
    }

    async fn save_snapshot(
        &self,
        stream_id: &StreamId,
        snapshot: Snapshot,
    ) -> Result<(), SnapshotStoreError> {
        if snapshot.stream_id() != stream_id {
            return Err(SnapshotStoreError::StreamMismatch {
                expected: snapshot.stream_id().clone(),
                found: stream_id.clone(),
            });
        }
        if !snapshot.has_snapshot() {
            return Ok(());
        }

        let mut snapshots = self.snapshots.write().map_err(|_| lock_poisoned())?;
        let stale = snapshots
            .get(stream_id)
            .is_some_and(|existing| existing.version() >= snapshot.version());
        if stale {
            debug!(%stream_id, version = %snapshot.version(), "ignoring stale snapshot");
        } else {
            snapshots.insert(stream_id.clone(), snapshot);
        }
        Ok(())
    }
}
