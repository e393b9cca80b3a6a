//! Errors raised by aggregates while deciding on a command.

use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Why an aggregate refused a command.
///
/// Only deterministic outcomes live here: the same state and command always
/// produce the same error. Storage and transport failures are reported by the
/// infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed command input (blank buyer code, zero quantity, ...).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A command addressed to one stream names a different entity.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// The command needs an existing entity and the stream is empty.
    #[error("not found")]
    NotFound,

    /// The entity already exists, or holds a slot the command wants
    /// (a buyer's pending return request).
    #[error("conflict: {0}")]
    Conflict(String),

    /// The entity reached a state the command cannot leave from: a completed
    /// order, an approved request.
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_transition(msg: impl Into<String>) -> Self {
        Self::InvalidTransition(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }
}
