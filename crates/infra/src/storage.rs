//! Tenant-scoped resolution of stores and publishers.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;
use tracing::debug;

use keel_core::TenantId;

use crate::event_store::{EventCodec, EventStore, InMemoryEventStore};
use crate::publisher::{EventPublisher, InMemoryEventPublisher};
use crate::snapshot_store::{InMemorySnapshotStore, SnapshotStore};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage resolution failure: {0}")]
    Internal(String),
}

/// Where a tenant's events, snapshots and publications go.
pub trait StorageResolver: Send + Sync {
    fn event_store(&self, tenant_id: TenantId) -> Result<Arc<dyn EventStore>, StorageError>;

    fn snapshot_store(&self, tenant_id: TenantId) -> Result<Arc<dyn SnapshotStore>, StorageError>;

    fn publisher(&self, tenant_id: TenantId) -> Result<Arc<dyn EventPublisher>, StorageError>;
}

#[derive(Debug, Clone)]
struct TenantStores {
    events: Arc<InMemoryEventStore>,
    snapshots: Arc<InMemorySnapshotStore>,
}

/// In-memory storage for tests/dev: isolated stores per tenant, created on
/// first use, and one shared publisher.
#[derive(Debug)]
pub struct InMemoryStorage {
    codec: EventCodec,
    publisher: Arc<InMemoryEventPublisher>,
    tenants: RwLock<HashMap<TenantId, TenantStores>>,
}

impl InMemoryStorage {
    pub fn new(codec: EventCodec, publisher: Arc<InMemoryEventPublisher>) -> Self {
        Self {
            codec,
            publisher,
            tenants: RwLock::new(HashMap::new()),
        }
    }

    pub fn in_memory_publisher(&self) -> &Arc<InMemoryEventPublisher> {
        &self.publisher
    }

    /// The concrete event store of `tenant_id`, for inspection in tests.
    pub fn tenant_event_store(&self, tenant_id: TenantId) -> Result<Arc<InMemoryEventStore>, StorageError> {
        Ok(self.tenant(tenant_id)?.events)
    }

    fn tenant(&self, tenant_id: TenantId) -> Result<TenantStores, StorageError> {
        if let Some(stores) = self
            .tenants
            .read()
            .map_err(|_| lock_poisoned())?
            .get(&tenant_id)
        {
            return Ok(stores.clone());
        }

        let mut tenants = self.tenants.write().map_err(|_| lock_poisoned())?;
        let stores = tenants.entry(tenant_id).or_insert_with(|| {
            debug!(%tenant_id, "creating in-memory tenant stores");
            TenantStores {
                events: Arc::new(InMemoryEventStore::new(self.codec.clone())),
                snapshots: Arc::new(InMemorySnapshotStore::new()),
            }
        });
        Ok(stores.clone())
    }
}

fn lock_poisoned() -> StorageError {
    StorageError::Internal("lock poisoned".to_string())
}

impl StorageResolver for InMemoryStorage {
    fn event_store(&self, tenant_id: TenantId) -> Result<Arc<dyn EventStore>, StorageError> {
        Ok(self.tenant(tenant_id)?.events)
    }

    fn snapshot_store(&self, tenant_id: TenantId) -> Result<Arc<dyn SnapshotStore>, StorageError> {
        Ok(self.tenant(tenant_id)?.snapshots)
    }

    fn publisher(&self, _tenant_id: TenantId) -> Result<Arc<dyn EventPublisher>, StorageError> {
        Ok(self.publisher.clone())
    }
}
