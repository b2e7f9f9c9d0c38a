//! Append-only event store boundary.
//!
//! Defines the conditional-append contract the command pipeline relies on
//! for optimistic concurrency, the row codec shared by adapters, and an
//! in-memory implementation.

mod codec;
pub mod in_memory;
pub mod r#trait;

pub use codec::EventCodec;
pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventAppender, EventStore, EventStoreError, StoredEvent};
