use chrono::{DateTime, Utc};

/// A fact recorded in the ledger.
///
/// Counters, pack states and loyalty balances are all folds over these, so an
/// event is never edited once appended. Payload changes bump `version`.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted name, `<crate>.<aggregate>.<past-tense verb>`:
    /// "orders.order.completed", "packs.pack.reactivated".
    fn event_type(&self) -> &'static str;

    fn version(&self) -> u32;

    /// Business time of the change, from the service clock.
    fn occurred_at(&self) -> DateTime<Utc>;
}
