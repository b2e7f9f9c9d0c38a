use std::any::{Any, TypeId};

/// A command payload: intent to change one aggregate.
///
/// Commands are transient (never persisted); the events they produce are.
/// Routing and causality metadata live in the [`CommandEnvelope`](crate::CommandEnvelope),
/// not in the payload.
pub trait Command: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Name reported in execution results and logs.
    fn command_type() -> &'static str
    where
        Self: Sized,
    {
        std::any::type_name::<Self>()
    }
}

/// Type-erased command payload, for call sites that only know "some command".
pub trait CommandPayload: Any + Send + Sync + core::fmt::Debug {
    fn command_type_name(&self) -> &'static str;

    fn payload_type_id(&self) -> TypeId;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send>;
}

impl<C: Command> CommandPayload for C {
    fn command_type_name(&self) -> &'static str {
        C::command_type()
    }

    fn payload_type_id(&self) -> TypeId {
        TypeId::of::<C>()
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}
