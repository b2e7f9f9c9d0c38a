use std::sync::Arc;

use keel_events::EventRecord;

use super::r#trait::{EventStoreError, StoredEvent};
use crate::serializer::PayloadSerializer;
use crate::type_mapping::TypeMappingHandler;

/// Converts [`EventRecord`]s to storage rows and back.
#[derive(Debug, Clone)]
pub struct EventCodec {
    type_mappings: Arc<TypeMappingHandler>,
    serializer: Arc<dyn PayloadSerializer>,
}

impl EventCodec {
    pub fn new(type_mappings: Arc<TypeMappingHandler>, serializer: Arc<dyn PayloadSerializer>) -> Self {
        Self {
            type_mappings,
            serializer,
        }
    }

    pub fn type_mappings(&self) -> &Arc<TypeMappingHandler> {
        &self.type_mappings
    }

    /// Row for `record`; registers the payload type on first use.
    pub async fn encode(&self, record: &EventRecord) -> Result<StoredEvent, EventStoreError> {
        let type_id = self
            .type_mappings
            .get_id_by_type(&record.payload.payload_type())
            .await?;
        let payload = self.serializer.serialize(record.payload.as_ref())?;
        Ok(StoredEvent {
            event_id: record.event_id,
            stream_id: record.stream_id.clone(),
            aggregate_id: record.aggregate_id.clone(),
            version: record.version,
            timestamp: record.timestamp,
            command_id: record.command_id,
            sequence_id: record.sequence_id,
            principal_id: record.principal_id,
            tenant_id: record.tenant_id,
            type_id,
            payload,
        })
    }

    pub fn decode(&self, stored: &StoredEvent) -> Result<EventRecord, EventStoreError> {
        let payload_type = self.type_mappings.get_type_by_id(stored.type_id)?;
        let payload = self.serializer.deserialize(&payload_type, &stored.payload)?;
        Ok(EventRecord {
            event_id: stored.event_id,
            stream_id: stored.stream_id.clone(),
            aggregate_id: stored.aggregate_id.clone(),
            version: stored.version,
            timestamp: stored.timestamp,
            command_id: stored.command_id,
            sequence_id: stored.sequence_id,
            principal_id: stored.principal_id,
            tenant_id: stored.tenant_id,
            payload,
        })
    }
}
