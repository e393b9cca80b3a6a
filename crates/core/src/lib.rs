//! Building blocks shared by the packloop domain crates: aggregate traits,
//! typed identifiers and the domain error.
//!
//! Nothing here performs IO.

pub mod aggregate;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::{ActorId, AggregateId};
pub use value_object::ValueObject;
