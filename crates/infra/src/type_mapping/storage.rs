use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use keel_core::TypeMappingId;

use super::{TypeMapping, TypeMappingError};

/// Persistence of the mapping table.
#[async_trait]
pub trait TypeMappingStorage: Send + Sync {
    /// Prepare the backing store (create tables, open files, ...). Idempotent.
    async fn initialize(&self) -> Result<(), TypeMappingError>;

    async fn get_mappings(&self) -> Result<Vec<TypeMapping>, TypeMappingError>;

    /// Persist new pairs. Re-adding an identical pair is a no-op; reusing an
    /// id or a name for something else fails with
    /// [`TypeMappingError::Conflict`] and persists nothing.
    async fn add_mappings(&self, mappings: &[TypeMapping]) -> Result<(), TypeMappingError>;
}

#[derive(Debug, Default)]
struct Table {
    by_id: HashMap<TypeMappingId, String>,
    by_name: HashMap<String, TypeMappingId>,
}

/// In-memory mapping table for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryTypeMappingStorage {
    table: RwLock<Table>,
}

impl InMemoryTypeMappingStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.read().map(|t| t.by_id.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> TypeMappingError {
    TypeMappingError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl TypeMappingStorage for InMemoryTypeMappingStorage {
    async fn initialize(&self) -> Result<(), TypeMappingError> {
        Ok(())
    }

    async fn get_mappings(&self) -> Result<Vec<TypeMapping>, TypeMappingError> {
        let table = self.table.read().map_err(|_| poisoned())?;
        let mut mappings: Vec<TypeMapping> = table
            .by_id
            .iter()
            .map(|(id, name)| TypeMapping::new(*id, name.clone()))
            .collect();
        mappings.sort_by_key(|m| m.id);
        Ok(mappings)
    }

    async fn add_mappings(&self, mappings: &[TypeMapping]) -> Result<(), TypeMappingError> {
        let mut table = self.table.write().map_err(|_| poisoned())?;

        // Validate the whole batch first so a conflict persists nothing.
        for m in mappings {
            if let Some(existing) = table.by_id.get(&m.id) {
                if existing != &m.name {
                    return Err(TypeMappingError::Conflict(format!(
                        "id {} already maps to '{existing}', not '{}'",
                        m.id, m.name
                    )));
                }
            }
            if let Some(existing) = table.by_name.get(&m.name) {
                if *existing != m.id {
                    return Err(TypeMappingError::Conflict(format!(
                        "'{}' already maps to {existing}, not {}",
                        m.name, m.id
                    )));
                }
            }
        }

        for m in mappings {
            table.by_id.insert(m.id, m.name.clone());
            table.by_name.insert(m.name.clone(), m.id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_lists_mappings_in_id_order() {
        let storage = InMemoryTypeMappingStorage::new();
        storage
            .add_mappings(&[
                TypeMapping::new(TypeMappingId::new(2), "b"),
                TypeMapping::new(TypeMappingId::new(1), "a"),
            ])
            .await
            .unwrap();

        let names: Vec<String> = storage
            .get_mappings()
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn identical_pairs_are_idempotent() {
        let storage = InMemoryTypeMappingStorage::new();
        let pair = TypeMapping::new(TypeMappingId::new(1), "a");
        storage.add_mappings(&[pair.clone()]).await.unwrap();
        storage.add_mappings(&[pair]).await.unwrap();
        assert_eq!(storage.len(), 1);
    }

    #[tokio::test]
    async fn conflicting_batch_persists_nothing() {
        let storage = InMemoryTypeMappingStorage::new();
        storage
            .add_mappings(&[TypeMapping::new(TypeMappingId::new(1), "a")])
            .await
            .unwrap();

        let err = storage
            .add_mappings(&[
                TypeMapping::new(TypeMappingId::new(2), "b"),
                TypeMapping::new(TypeMappingId::new(3), "a"),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, TypeMappingError::Conflict(_)));
        assert_eq!(storage.len(), 1);
    }
}
