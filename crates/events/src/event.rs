//! Domain event payloads and their runtime type descriptors.

use std::any::{Any, TypeId};
use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use crate::error::PayloadTypeConflict;

/// A domain event payload.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **serializable** (they outlive the process that produced them)
/// - identified by a stable [`Event::event_type`] name, which is what storage
///   persists instead of the Rust type
pub trait Event: Serialize + DeserializeOwned + Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable persisted name. Defaults to the fully-qualified Rust type name;
    /// override it to keep stored streams readable across refactors.
    fn event_type() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }
}

/// Object-safe view of an [`Event`], as carried by envelopes and records.
pub trait EventPayload: Any + Send + Sync + core::fmt::Debug {
    fn as_any(&self) -> &dyn Any;

    fn payload_type(&self) -> PayloadType;

    fn to_json(&self) -> Result<JsonValue, serde_json::Error>;
}

impl<E: Event> EventPayload for E {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn payload_type(&self) -> PayloadType {
        PayloadType::of::<E>()
    }

    fn to_json(&self) -> Result<JsonValue, serde_json::Error> {
        serde_json::to_value(self)
    }
}

impl dyn EventPayload {
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }

    pub fn type_name(&self) -> &'static str {
        self.payload_type().name()
    }
}

type DecodeFn = fn(JsonValue) -> Result<Arc<dyn EventPayload>, serde_json::Error>;

fn decode_as<E: Event>(value: JsonValue) -> Result<Arc<dyn EventPayload>, serde_json::Error> {
    let event: E = serde_json::from_value(value)?;
    Ok(Arc::new(event))
}

/// Runtime descriptor of an event type: identity, persisted name and decoder.
///
/// This replaces reflection: storage adapters look a descriptor up by name
/// (or by type-mapping id) and decode bytes through it.
#[derive(Clone, Copy)]
pub struct PayloadType {
    type_id: TypeId,
    name: &'static str,
    decode: DecodeFn,
}

impl PayloadType {
    pub fn of<E: Event>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            name: E::event_type(),
            decode: decode_as::<E>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn decode(&self, value: JsonValue) -> Result<Arc<dyn EventPayload>, serde_json::Error> {
        (self.decode)(value)
    }
}

impl PartialEq for PayloadType {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for PayloadType {}

impl core::fmt::Debug for PayloadType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("PayloadType").field(&self.name).finish()
    }
}

/// The set of event types known to the running codebase.
#[derive(Debug, Clone, Default)]
pub struct PayloadTypes {
    by_name: BTreeMap<&'static str, PayloadType>,
}

impl PayloadTypes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<E: Event>(&mut self) -> Result<(), PayloadTypeConflict> {
        self.insert(PayloadType::of::<E>())
    }

    pub fn insert(&mut self, payload_type: PayloadType) -> Result<(), PayloadTypeConflict> {
        match self.by_name.get(payload_type.name()) {
            Some(existing) if *existing != payload_type => Err(PayloadTypeConflict {
                name: payload_type.name(),
            }),
            Some(_) => Ok(()),
            None => {
                self.by_name.insert(payload_type.name(), payload_type);
                Ok(())
            }
        }
    }

    pub fn extend(
        &mut self,
        types: impl IntoIterator<Item = PayloadType>,
    ) -> Result<(), PayloadTypeConflict> {
        for t in types {
            self.insert(t)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<PayloadType> {
        self.by_name.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = PayloadType> + '_ {
        self.by_name.values().copied()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}
