//! `keel-core`: event-sourcing primitives.
//!
//! Identifiers, stream versions and the domain error model. No IO, no async.

pub mod error;
pub mod id;
pub mod version;

pub use error::{DomainError, DomainResult};
pub use id::{
    AggregateIdentity, CommandId, CommandSequenceId, EventId, Identifier, PrincipalId, StreamId,
    TenantId, TypeMappingId,
};
pub use version::{AggregateVersion, ExpectedVersion};

#[doc(hidden)]
pub mod __private {
    pub use serde;
    pub use uuid::Uuid;
}
