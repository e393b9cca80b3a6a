//! External collaborators the core calls out to.

pub mod catalog;
pub mod clock;

pub use catalog::{Catalog, CatalogError, InMemoryCatalog};
pub use clock::{Clock, FixedClock, SystemClock};
