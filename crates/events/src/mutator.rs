//! Per-aggregate-type reducer registry and the state it materializes.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use crate::envelope::EventEnvelope;
use crate::error::AggregateError;
use crate::event::{Event, PayloadType};

type Reducer<Id, S> = Box<dyn Fn(&EventEnvelope<Id>, &S) -> Option<S> + Send + Sync>;

struct Registration<Id, S> {
    payload_type: PayloadType,
    reducer: Reducer<Id, S>,
}

/// Reducers of one aggregate type, keyed by event payload type.
///
/// Built once (typically at startup) and shared by every aggregate instance
/// of that type through an `Arc`.
pub struct MutatorRegistry<Id, S> {
    aggregate_type: &'static str,
    default_state: S,
    reducers: HashMap<TypeId, Registration<Id, S>>,
}

impl<Id, S> MutatorRegistry<Id, S>
where
    S: Clone,
{
    pub fn new(aggregate_type: &'static str, default_state: S) -> Self {
        Self {
            aggregate_type,
            default_state,
            reducers: HashMap::new(),
        }
    }

    /// Register the pure reducer for event type `E`.
    ///
    /// Registering the same event type twice replaces the earlier reducer.
    pub fn register<E, F>(mut self, reducer: F) -> Self
    where
        E: Event,
        F: Fn(&EventEnvelope<Id>, &E, &S) -> S + Send + Sync + 'static,
    {
        let reducer: Reducer<Id, S> = Box::new(move |envelope, state| {
            envelope
                .payload_as::<E>()
                .map(|payload| reducer(envelope, payload, state))
        });
        self.reducers.insert(
            TypeId::of::<E>(),
            Registration {
                payload_type: PayloadType::of::<E>(),
                reducer,
            },
        );
        self
    }

    pub fn aggregate_type(&self) -> &'static str {
        self.aggregate_type
    }

    pub fn default_state(&self) -> &S {
        &self.default_state
    }

    pub fn handles(&self, payload_type: &PayloadType) -> bool {
        self.reducers.contains_key(&payload_type.type_id())
    }

    /// Event types this aggregate can replay.
    pub fn payload_types(&self) -> impl Iterator<Item = PayloadType> + '_ {
        self.reducers.values().map(|r| r.payload_type)
    }

    /// A mutator seeded with the default state.
    pub fn mutator(self: &Arc<Self>) -> StateMutator<Id, S> {
        StateMutator {
            registry: Arc::clone(self),
            current: self.default_state.clone(),
        }
    }

    fn reduce(&self, envelope: &EventEnvelope<Id>, state: &S) -> Result<S, AggregateError> {
        let payload_type = envelope.payload().payload_type();
        self.reducers
            .get(&payload_type.type_id())
            .and_then(|r| (r.reducer)(envelope, state))
            .ok_or_else(|| AggregateError::UnknownEventType {
                aggregate_type: self.aggregate_type,
                event_type: payload_type.name().to_string(),
            })
    }
}

impl<Id, S> core::fmt::Debug for MutatorRegistry<Id, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MutatorRegistry")
            .field("aggregate_type", &self.aggregate_type)
            .field("reducers", &self.reducers.len())
            .finish()
    }
}

/// Current materialized state of one aggregate instance.
pub struct StateMutator<Id, S> {
    registry: Arc<MutatorRegistry<Id, S>>,
    current: S,
}

impl<Id, S> StateMutator<Id, S>
where
    S: Clone,
{
    pub fn current(&self) -> &S {
        &self.current
    }

    pub fn default_state(&self) -> &S {
        self.registry.default_state()
    }

    pub fn aggregate_type(&self) -> &'static str {
        self.registry.aggregate_type()
    }

    /// Apply `envelope` through its registered reducer.
    ///
    /// On an unknown payload type the current state is left untouched.
    pub fn transition(&mut self, envelope: &EventEnvelope<Id>) -> Result<&S, AggregateError> {
        self.current = self.registry.reduce(envelope, &self.current)?;
        Ok(&self.current)
    }

    /// Replace the current state (snapshot load).
    pub fn restore(&mut self, state: S) {
        self.current = state;
    }
}

impl<Id, S: core::fmt::Debug> core::fmt::Debug for StateMutator<Id, S> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StateMutator")
            .field("aggregate_type", &self.registry.aggregate_type)
            .field("current", &self.current)
            .finish()
    }
}
