use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use tracing::instrument;

use keel_core::{AggregateVersion, ExpectedVersion, StreamId};
use keel_events::{AppendResult, CommandHeader, EventRecord, EventsStream};

use super::codec::EventCodec;
use super::r#trait::{EventAppender, EventStore, EventStoreError, StoredEvent};

/// In-memory append-only event store.
///
/// Intended for tests/dev. Payloads go through the full [`EventCodec`]
/// path, so what is read back is decoded from bytes exactly as a durable
/// backend would do it. The version check and the write happen under one
/// write lock, which makes the conditional append atomic.
#[derive(Debug)]
pub struct InMemoryEventStore {
    codec: EventCodec,
    streams: RwLock<HashMap<StreamId, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new(codec: EventCodec) -> Self {
        Self {
            codec,
            streams: RwLock::new(HashMap::new()),
        }
    }

    /// Current version of `stream_id` (`NOT_CREATED` if absent).
    pub fn stream_version(&self, stream_id: &StreamId) -> Result<AggregateVersion, EventStoreError> {
        let streams = self.streams.read().map_err(|_| lock_poisoned())?;
        Ok(Self::current_version(
            streams.get(stream_id).map(Vec::as_slice).unwrap_or_default(),
        ))
    }

    /// Raw rows of one stream, as persisted.
    pub fn stored_events(&self, stream_id: &StreamId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self.streams.read().map_err(|_| lock_poisoned())?;
        Ok(streams.get(stream_id).cloned().unwrap_or_default())
    }

    fn current_version(stream: &[StoredEvent]) -> AggregateVersion {
        stream.last().map(|e| e.version).unwrap_or_default()
    }
}

fn lock_poisoned() -> EventStoreError {
    EventStoreError::Storage("lock poisoned".to_string())
}

#[async_trait]
impl EventAppender for InMemoryEventStore {
    #[instrument(
        skip(self, command, stream_id, events),
        fields(stream_id = %stream_id, expected_version = %expected, event_count = events.len()),
        err
    )]
    async fn append_to_stream(
        &self,
        command: &CommandHeader,
        stream_id: &StreamId,
        expected: ExpectedVersion,
        events: Vec<EventRecord>,
    ) -> Result<AppendResult, EventStoreError> {
        for (idx, e) in events.iter().enumerate() {
            if &e.stream_id != stream_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "event {idx} belongs to stream {}, not {stream_id}",
                    e.stream_id
                )));
            }
            if e.tenant_id != command.tenant_id() {
                return Err(EventStoreError::TenantIsolation(format!(
                    "event {idx} belongs to tenant {}, command to {}",
                    e.tenant_id,
                    command.tenant_id()
                )));
            }
        }

        // Encode outside the lock; type registration may suspend.
        let mut rows = Vec::with_capacity(events.len());
        for e in &events {
            rows.push(self.codec.encode(e).await?);
        }

        let mut streams = self.streams.write().map_err(|_| lock_poisoned())?;
        let stream = streams.entry(stream_id.clone()).or_default();
        let current = Self::current_version(stream);

        if !expected.matches(current) {
            return Err(EventStoreError::Concurrency {
                stream_id: stream_id.clone(),
                expected,
                actual: current,
            });
        }

        let mut version = current;
        let mut committed = Vec::with_capacity(events.len());
        for (mut row, record) in rows.into_iter().zip(events) {
            version = version.next();
            row.version = version;
            stream.push(row);
            committed.push(record.at_version(version));
        }

        Ok(AppendResult {
            stream_id: stream_id.clone(),
            previous_version: current,
            version,
            committed,
        })
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    #[instrument(skip(self, stream_id), fields(stream_id = %stream_id), err)]
    async fn load_events_stream(
        &self,
        stream_id: &StreamId,
        from: AggregateVersion,
        to: Option<AggregateVersion>,
    ) -> Result<EventsStream, EventStoreError> {
        if let Some(to) = to {
            if to < from {
                return Err(EventStoreError::InvalidRange {
                    stream_id: stream_id.clone(),
                    from,
                    to,
                });
            }
        }

        let (rows, current) = {
            let streams = self.streams.read().map_err(|_| lock_poisoned())?;
            let stream = streams.get(stream_id).map(Vec::as_slice).unwrap_or_default();
            let current = Self::current_version(stream);
            let end = to.map_or(current, |to| to.min(current));
            let start = usize::try_from(from.value()).unwrap_or(usize::MAX).min(stream.len());
            let end = usize::try_from(end.value()).unwrap_or(usize::MAX).min(stream.len());
            (stream[start..end.max(start)].to_vec(), current)
        };

        let events = rows
            .iter()
            .map(|row| self.codec.decode(row))
            .collect::<Result<Vec<_>, _>>()?;
        let version = events.last().map_or(from, |e| e.version);

        Ok(EventsStream {
            stream_id: stream_id.clone(),
            from,
            version,
            events,
            reached_end: version >= current,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::serializer::JsonPayloadSerializer;
    use crate::type_mapping::{InMemoryTypeMappingStorage, TypeMappingHandler};
    use chrono::Utc;
    use keel_core::{CommandId, CommandSequenceId, EventId, PrincipalId, TenantId};
    use keel_events::{Event, PayloadTypes};
    use serde::{Deserialize, Serialize};
    use std::sync::Arc;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tick(u32);

    impl Event for Tick {}

    async fn store() -> InMemoryEventStore {
        let mut types = PayloadTypes::new();
        types.register::<Tick>().unwrap();
        let handler = TypeMappingHandler::new(
            Arc::new(InMemoryTypeMappingStorage::new()),
            types,
            Duration::from_secs(1),
        );
        handler.synchronize_app_types_with_storage_types().await.unwrap();
        InMemoryEventStore::new(EventCodec::new(Arc::new(handler), Arc::new(JsonPayloadSerializer)))
    }

    fn header(tenant_id: TenantId) -> CommandHeader {
        CommandHeader::new(tenant_id, PrincipalId::new(), "test")
    }

    fn record(header: &CommandHeader, stream_id: &StreamId, n: u32) -> EventRecord {
        EventRecord {
            event_id: EventId::new(),
            stream_id: stream_id.clone(),
            aggregate_id: stream_id.to_string(),
            version: AggregateVersion::NOT_CREATED,
            timestamp: Utc::now(),
            command_id: CommandId::new(),
            sequence_id: CommandSequenceId::new(),
            principal_id: header.principal_id(),
            tenant_id: header.tenant_id(),
            payload: Arc::new(Tick(n)),
        }
    }

    fn ticks(stream: &EventsStream) -> Vec<u32> {
        stream
            .events
            .iter()
            .map(|e| e.payload.downcast_ref::<Tick>().unwrap().0)
            .collect()
    }

    #[tokio::test]
    async fn append_assigns_sequential_versions() {
        let store = store().await;
        let header = header(TenantId::new());
        let stream_id = StreamId::new("clock_1");

        let first = store
            .append_to_stream(
                &header,
                &stream_id,
                ExpectedVersion::Exact(AggregateVersion::NOT_CREATED),
                vec![record(&header, &stream_id, 1), record(&header, &stream_id, 2)],
            )
            .await
            .unwrap();
        assert_eq!(first.previous_version, AggregateVersion::NOT_CREATED);
        assert_eq!(first.version, AggregateVersion::new(2));
        let versions: Vec<u64> = first.committed.iter().map(|e| e.version.value()).collect();
        assert_eq!(versions, vec![1, 2]);

        let second = store
            .append_to_stream(
                &header,
                &stream_id,
                ExpectedVersion::Exact(AggregateVersion::new(2)),
                vec![record(&header, &stream_id, 3)],
            )
            .await
            .unwrap();
        assert_eq!(second.version, AggregateVersion::new(3));
        assert_eq!(store.stream_version(&stream_id).unwrap(), AggregateVersion::new(3));
    }

    #[tokio::test]
    async fn stale_expected_version_is_rejected_without_writing() {
        let store = store().await;
        let header = header(TenantId::new());
        let stream_id = StreamId::new("clock_2");
        store
            .append_to_stream(
                &header,
                &stream_id,
                ExpectedVersion::Any,
                vec![record(&header, &stream_id, 1)],
            )
            .await
            .unwrap();

        let err = store
            .append_to_stream(
                &header,
                &stream_id,
                ExpectedVersion::Exact(AggregateVersion::NOT_CREATED),
                vec![record(&header, &stream_id, 2)],
            )
            .await
            .unwrap_err();
        match err {
            EventStoreError::Concurrency { expected, actual, .. } => {
                assert_eq!(expected, ExpectedVersion::Exact(AggregateVersion::NOT_CREATED));
                assert_eq!(actual, AggregateVersion::new(1));
            }
            other => panic!("expected concurrency error, got {other:?}"),
        }
        assert_eq!(store.stored_events(&stream_id).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn load_reads_half_open_windows() {
        let store = store().await;
        let header = header(TenantId::new());
        let stream_id = StreamId::new("clock_3");
        let batch = (1..=5).map(|n| record(&header, &stream_id, n)).collect();
        store
            .append_to_stream(&header, &stream_id, ExpectedVersion::Any, batch)
            .await
            .unwrap();

        let all = store
            .load_events_stream(&stream_id, AggregateVersion::NOT_CREATED, None)
            .await
            .unwrap();
        assert_eq!(ticks(&all), vec![1, 2, 3, 4, 5]);
        assert_eq!(all.version, AggregateVersion::new(5));
        assert!(all.reached_end);

        let middle = store
            .load_events_stream(&stream_id, AggregateVersion::new(1), Some(AggregateVersion::new(3)))
            .await
            .unwrap();
        assert_eq!(ticks(&middle), vec![2, 3]);
        assert_eq!(middle.from, AggregateVersion::new(1));
        assert_eq!(middle.version, AggregateVersion::new(3));
        assert!(!middle.reached_end);

        let tail = store
            .load_events_stream(&stream_id, AggregateVersion::new(5), None)
            .await
            .unwrap();
        assert!(tail.is_empty());
        assert_eq!(tail.version, AggregateVersion::new(5));
        assert!(tail.reached_end);
    }

    #[tokio::test]
    async fn missing_stream_is_empty() {
        let store = store().await;
        let stream = store
            .load_events_stream(&StreamId::new("nowhere"), AggregateVersion::NOT_CREATED, None)
            .await
            .unwrap();
        assert!(stream.is_empty());
        assert_eq!(stream.version, AggregateVersion::NOT_CREATED);
    }

    #[tokio::test]
    async fn inverted_range_is_rejected() {
        let store = store().await;
        let err = store
            .load_events_stream(
                &StreamId::new("clock_4"),
                AggregateVersion::new(3),
                Some(AggregateVersion::new(1)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidRange { .. }));
    }

    #[tokio::test]
    async fn cross_tenant_events_are_rejected() {
        let store = store().await;
        let stream_id = StreamId::new("clock_5");
        let owner = header(TenantId::new());
        let intruder = header(TenantId::new());
        let err = store
            .append_to_stream(
                &intruder,
                &stream_id,
                ExpectedVersion::Any,
                vec![record(&owner, &stream_id, 1)],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EventStoreError::TenantIsolation(_)));
    }

    #[tokio::test]
    async fn rows_hold_compact_type_ids_and_bytes() {
        let store = store().await;
        let header = header(TenantId::new());
        let stream_id = StreamId::new("clock_6");
        store
            .append_to_stream(
                &header,
                &stream_id,
                ExpectedVersion::Any,
                vec![record(&header, &stream_id, 42)],
            )
            .await
            .unwrap();

        let rows = store.stored_events(&stream_id).unwrap();
        assert_eq!(rows[0].payload, b"42");
        assert_eq!(rows[0].type_id.value(), 1);
    }
}
