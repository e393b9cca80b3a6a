//! Command execution pipeline for event-sourced aggregates.
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the aggregate stream
//!   ↓
//! 2. Rehydrate (apply history in sequence order)
//!   ↓
//! 3. Handle the command (pure decision, produces events)
//!   ↓
//! 4. Append to the store (CAS on the loaded version, or unchecked)
//!   ↓
//! 5. Publish committed events to the bus (best effort)
//! ```
//!
//! Publication happens only after a successful append. A publish failure is
//! logged and swallowed: the events are already durable and notification
//! consumers tolerate gaps.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use packloop_core::{Aggregate, AggregateId, AggregateRoot, DomainError, ExpectedVersion};
use packloop_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The stream moved between load and append (lost compare-and-swap).
    #[error("concurrency conflict: {0}")]
    Concurrency(String),
    /// Domain-level conflict (e.g. entity already exists).
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),
    #[error("not found")]
    NotFound,
    /// Historical payloads did not deserialize into the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),
    #[error(transparent)]
    Store(EventStoreError),
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

impl From<DomainError> for DispatchError {
    fn from(value: DomainError) -> Self {
        match value {
            DomainError::Validation(msg) => DispatchError::Validation(msg),
            DomainError::InvariantViolation(msg) => DispatchError::InvariantViolation(msg),
            DomainError::Conflict(msg) => DispatchError::Conflict(msg),
            DomainError::InvalidTransition(msg) => DispatchError::InvalidTransition(msg),
            DomainError::NotFound => DispatchError::NotFound,
            DomainError::InvalidId(msg) => DispatchError::Validation(msg),
        }
    }
}

/// Result of a successful dispatch: the aggregate after the new events were
/// applied, and the committed events themselves (empty for a no-op command).
#[derive(Debug, Clone)]
pub struct Dispatched<A> {
    pub aggregate: A,
    pub committed: Vec<StoredEvent>,
}

/// Append concurrency mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
enum Guard {
    /// Append only if the stream is still at the version the decision was made on.
    LoadedVersion,
    /// Append regardless of concurrent writers.
    Unchecked,
}

/// Reusable command execution engine.
///
/// Generic over the store and bus so tests run against the in-memory
/// implementations and production wiring can swap either one.
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self { store, bus }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load and rehydrate an aggregate. A never-written stream yields the
    /// empty aggregate (check `exists()` on the result).
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history(&mut aggregate, &history)?;
        Ok(aggregate)
    }

    /// Dispatch with compare-and-swap on the loaded version.
    ///
    /// If another writer appended in between, this fails with
    /// `DispatchError::Concurrency`. Use for state-machine transitions and
    /// create-if-absent.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: packloop_events::Event + Serialize + DeserializeOwned,
    {
        self.run(aggregate_id, aggregate_type, command, make_aggregate, Guard::LoadedVersion)
    }

    /// Dispatch without a version check.
    ///
    /// Only for commands whose events commute and whose `apply` is idempotent
    /// per operation token (counter increments keyed by order id, order links).
    /// The returned aggregate may not include events appended concurrently.
    pub fn dispatch_unchecked<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: packloop_events::Event + Serialize + DeserializeOwned,
    {
        self.run(aggregate_id, aggregate_type, command, make_aggregate, Guard::Unchecked)
    }

    fn run<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: &str,
        command: A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
        guard: Guard,
    ) -> Result<Dispatched<A>, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: packloop_events::Event + Serialize + DeserializeOwned,
    {
        // 1-2) Load + rehydrate
        let mut aggregate = self.load(aggregate_id, make_aggregate)?;
        let expected = match guard {
            Guard::LoadedVersion => ExpectedVersion::Exact(aggregate.version()),
            Guard::Unchecked => ExpectedVersion::Any,
        };

        // 3) Decide (no mutation)
        let decided = aggregate.handle(&command)?;
        if decided.is_empty() {
            return Ok(Dispatched {
                aggregate,
                committed: vec![],
            });
        }

        // 4) Persist
        let uncommitted = decided
            .iter()
            .map(|ev| UncommittedEvent::from_typed(aggregate_id, aggregate_type, Uuid::now_v7(), ev))
            .collect::<Result<Vec<_>, _>>()?;

        let committed = self.store.append(uncommitted, expected)?;

        for ev in &decided {
            aggregate.apply(ev);
        }

        // 5) Publish (after append, best effort)
        self.publish(&committed);

        Ok(Dispatched {
            aggregate,
            committed,
        })
    }

    fn publish(&self, committed: &[StoredEvent]) {
        for stored in committed {
            if let Err(err) = self.bus.publish(stored.to_envelope()) {
                tracing::warn!(
                    event_id = %stored.event_id,
                    event_type = %stored.event_type,
                    aggregate_id = %stored.aggregate_id,
                    error = ?err,
                    "event publication failed; continuing"
                );
            }
        }
    }
}

fn validate_loaded_stream(aggregate_id: AggregateId, stream: &[StoredEvent]) -> Result<(), DispatchError> {
    // A backend bug must not leak events from another stream into a fold.
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
        aggregate.apply(&ev);
    }

    Ok(())
}
