//! Infrastructure layer: ledger store, dispatch, configuration, collaborators
//! and the application services built on them.

pub mod command_dispatcher;
pub mod config;
pub mod error;
pub mod event_store;
pub mod external;
pub mod read_model;
pub mod services;

#[cfg(test)]
mod integration_tests;

pub use command_dispatcher::{CommandDispatcher, DispatchError, Dispatched};
pub use config::{ConfigError, PackloopConfig};
pub use error::{ErrorKind, FulfillmentStep, ReturnStep, ServiceError, ServiceResult};
pub use event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
pub use external::{Catalog, CatalogError, Clock, FixedClock, InMemoryCatalog, SystemClock};
pub use read_model::{InMemoryOrderCodeIndex, OrderCodeIndex};
pub use services::{
    CompletionOutcome, OrderFulfillmentService, OrderPlacementService, PackLifecycleManager,
    Packloop, PlaceOrderRequest, RegistrationService, ReturnRequestWorkflow,
};
