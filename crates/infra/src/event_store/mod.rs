//! Append-only event store boundary.
//!
//! Stores one stream per declaration without making storage assumptions;
//! the in-memory implementation backs tests and local runs.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
