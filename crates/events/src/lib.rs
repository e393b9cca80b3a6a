//! Domain events and their distribution.
//!
//! Events are persisted by the ledger store first and published afterwards.
//! Publication is the notification seam towards external collaborators.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::execute;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
