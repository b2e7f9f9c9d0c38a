use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::{OnceCell, watch};
use tracing::{debug, info, instrument};

use keel_core::{Identifier, TypeMappingId};
use keel_events::{PayloadType, PayloadTypeConflict, PayloadTypes};

use super::{TypeMapping, TypeMappingError, TypeMappingStorage};

#[derive(Debug, Default)]
struct Mappings {
    by_id: HashMap<TypeMappingId, String>,
    by_name: HashMap<String, TypeMappingId>,
    last_id: TypeMappingId,
    /// Types registered on first use that are not app types.
    late: PayloadTypes,
}

impl Mappings {
    fn insert(&mut self, mapping: TypeMapping) {
        if mapping.id > self.last_id {
            self.last_id = mapping.id;
        }
        self.by_name.insert(mapping.name.clone(), mapping.id);
        self.by_id.insert(mapping.id, mapping.name);
    }

    /// Reserve the next unused id.
    fn reserve(&mut self) -> TypeMappingId {
        self.last_id = self.last_id.next();
        self.last_id
    }
}

type Gate = watch::Receiver<Option<TypeMappingId>>;

enum Claim {
    Register(watch::Sender<Option<TypeMappingId>>),
    Wait(Gate),
}

/// Removes the pending registration gate when the registering call ends,
/// including when its future is dropped mid-registration.
struct PendingGate<'a> {
    pending: &'a Mutex<HashMap<&'static str, Gate>>,
    name: &'static str,
}

impl Drop for PendingGate<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(self.name);
        }
    }
}

/// Bidirectional, thread-safe `PayloadType <-> TypeMappingId` registry.
///
/// Lookups of known types only take a read lock. The first use of a type the
/// table has never seen registers it with storage; concurrent callers asking
/// for the same type wait on a per-type gate for the winner's id instead of
/// registering a duplicate, bounded by `wait_timeout`.
///
/// [`synchronize_app_types_with_storage_types`](Self::synchronize_app_types_with_storage_types)
/// must complete before any lookup; until then lookups fail with
/// [`TypeMappingError::NotSynchronized`].
pub struct TypeMappingHandler {
    storage: Arc<dyn TypeMappingStorage>,
    app_types: PayloadTypes,
    mappings: RwLock<Mappings>,
    pending: Mutex<HashMap<&'static str, Gate>>,
    synchronized: OnceCell<()>,
    disposed: AtomicBool,
    wait_timeout: Duration,
}

impl TypeMappingHandler {
    pub fn new(
        storage: Arc<dyn TypeMappingStorage>,
        app_types: PayloadTypes,
        wait_timeout: Duration,
    ) -> Self {
        Self {
            storage,
            app_types,
            mappings: RwLock::new(Mappings::default()),
            pending: Mutex::new(HashMap::new()),
            synchronized: OnceCell::new(),
            disposed: AtomicBool::new(false),
            wait_timeout,
        }
    }

    pub fn app_types(&self) -> &PayloadTypes {
        &self.app_types
    }

    pub fn is_synchronized(&self) -> bool {
        self.synchronized.initialized()
    }

    /// Load the persisted table, then persist ids for every app type it lacks.
    ///
    /// Runs exactly once; concurrent and later callers share the first
    /// successful run. A failed run may be retried.
    pub async fn synchronize_app_types_with_storage_types(&self) -> Result<(), TypeMappingError> {
        self.ensure_live()?;
        self.synchronized
            .get_or_try_init(|| self.synchronize())
            .await
            .map(|_| ())
    }

    #[instrument(skip(self), fields(app_types = self.app_types.len()), err)]
    async fn synchronize(&self) -> Result<(), TypeMappingError> {
        self.storage.initialize().await?;
        let stored = self.storage.get_mappings().await?;

        let added = {
            let mut mappings = self.write()?;
            for mapping in stored {
                mappings.insert(mapping);
            }
            let mut added = Vec::new();
            for payload_type in self.app_types.iter() {
                if !mappings.by_name.contains_key(payload_type.name()) {
                    let id = mappings.reserve();
                    added.push(TypeMapping::new(id, payload_type.name()));
                }
            }
            added
        };

        if !added.is_empty() {
            self.storage.add_mappings(&added).await?;
        }

        let mut mappings = self.write()?;
        for mapping in added {
            info!(type_id = %mapping.id, type_name = %mapping.name, "registered type mapping");
            mappings.insert(mapping);
        }
        debug!(known = mappings.by_id.len(), "type mappings synchronized");
        Ok(())
    }

    /// Resolve a stored id back to a payload type.
    pub fn get_type_by_id(&self, id: TypeMappingId) -> Result<PayloadType, TypeMappingError> {
        self.ensure_ready()?;
        let mappings = self.read()?;
        let name = mappings
            .by_id
            .get(&id)
            .ok_or(TypeMappingError::UnknownId(id))?;
        self.app_types
            .get(name)
            .or_else(|| mappings.late.get(name))
            .ok_or_else(|| TypeMappingError::TypeNotInCodebase {
                id,
                name: name.clone(),
            })
    }

    /// Id for `payload_type`, registering it with storage on first use.
    ///
    /// A type registered here that is not an app type stays decodable through
    /// [`get_type_by_id`](Self::get_type_by_id) for the handler's lifetime.
    pub async fn get_id_by_type(
        &self,
        payload_type: &PayloadType,
    ) -> Result<TypeMappingId, TypeMappingError> {
        self.ensure_ready()?;
        let name = payload_type.name();
        loop {
            self.ensure_live()?;
            if let Some(id) = self.lookup(name)? {
                return Ok(id);
            }

            let claim = {
                let mut pending = self.pending()?;
                // Registration may have completed between the lookup and the gate.
                if let Some(id) = self.lookup(name)? {
                    return Ok(id);
                }
                match pending.get(name) {
                    Some(gate) => Claim::Wait(gate.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        pending.insert(name, rx);
                        Claim::Register(tx)
                    }
                }
            };

            match claim {
                Claim::Register(tx) => {
                    let _gate = PendingGate {
                        pending: &self.pending,
                        name,
                    };
                    let id = self.register(*payload_type).await?;
                    tx.send_replace(Some(id));
                    return Ok(id);
                }
                Claim::Wait(gate) => {
                    if let Some(id) = self.wait_for_registration(name, gate).await? {
                        return Ok(id);
                    }
                    debug!(type_name = name, "registration abandoned, retrying");
                }
            }
        }
    }

    /// Invalidate the handler. Every later call fails with
    /// [`TypeMappingError::Disposed`]; callers waiting on a registration
    /// gate are released.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
        debug!("type mapping handler disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    #[instrument(skip_all, fields(type_name = payload_type.name()), err)]
    async fn register(&self, payload_type: PayloadType) -> Result<TypeMappingId, TypeMappingError> {
        let name = payload_type.name();
        if let Some(known) = self.app_types.get(name) {
            if known != payload_type {
                return Err(PayloadTypeConflict { name }.into());
            }
        }
        let id = self.write()?.reserve();
        let mapping = TypeMapping::new(id, name);
        self.storage.add_mappings(std::slice::from_ref(&mapping)).await?;
        {
            let mut mappings = self.write()?;
            if self.app_types.get(name).is_none() {
                mappings.late.insert(payload_type)?;
            }
            mappings.insert(mapping);
        }
        info!(type_id = %id, type_name = name, "registered type mapping");
        Ok(id)
    }

    /// `None` when the registering caller gave up without an id.
    async fn wait_for_registration(
        &self,
        name: &'static str,
        mut gate: Gate,
    ) -> Result<Option<TypeMappingId>, TypeMappingError> {
        let waited = tokio::time::timeout(self.wait_timeout, gate.wait_for(Option::is_some)).await;
        match waited {
            Err(_) => Err(TypeMappingError::Timeout {
                type_name: name,
                waited: self.wait_timeout,
            }),
            Ok(Err(_)) => Ok(None),
            Ok(Ok(id)) => Ok(*id),
        }
    }

    fn lookup(&self, name: &str) -> Result<Option<TypeMappingId>, TypeMappingError> {
        Ok(self.read()?.by_name.get(name).copied().filter(|id| !id.is_empty()))
    }

    fn ensure_live(&self) -> Result<(), TypeMappingError> {
        if self.is_disposed() {
            return Err(TypeMappingError::Disposed);
        }
        Ok(())
    }

    fn ensure_ready(&self) -> Result<(), TypeMappingError> {
        self.ensure_live()?;
        if !self.is_synchronized() {
            return Err(TypeMappingError::NotSynchronized);
        }
        Ok(())
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Mappings>, TypeMappingError> {
        self.mappings.read().map_err(|_| lock_poisoned())
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Mappings>, TypeMappingError> {
        self.mappings.write().map_err(|_| lock_poisoned())
    }

    fn pending(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<&'static str, Gate>>, TypeMappingError> {
        self.pending.lock().map_err(|_| lock_poisoned())
    }
}

fn lock_poisoned() -> TypeMappingError {
    TypeMappingError::Storage("type mapping lock poisoned".to_string())
}

impl core::fmt::Debug for TypeMappingHandler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TypeMappingHandler")
            .field("app_types", &self.app_types.len())
            .field("synchronized", &self.is_synchronized())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
