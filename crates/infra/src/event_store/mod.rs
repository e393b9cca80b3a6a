//! Ledger store: append-only, versioned event streams.
//!
//! Every persistent entity (order, vendor, buyer, pack, pack request) is one
//! stream. Its state is the fold of the stream; appends are atomic per stream
//! and guarded by `ExpectedVersion`.

pub mod in_memory;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
