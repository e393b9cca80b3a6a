//! Disposable lookup indexes maintained alongside the ledger.

pub mod order_codes;

pub use order_codes::{InMemoryOrderCodeIndex, OrderCodeIndex};
