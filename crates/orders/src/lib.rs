//! Orders domain module (event-sourced).
//!
//! Cart validation, order codes and the order fulfillment state machine,
//! implemented purely as deterministic domain logic (no IO, no storage).

pub mod cart;
pub mod code;
pub mod order;

pub use cart::{Cart, CartError, CartLine, CatalogItem, ItemId, OrderLine};
pub use code::OrderCode;
pub use order::{
    CancelOrder, CompleteOrder, Order, OrderCancelled, OrderCommand, OrderCompleted, OrderEvent,
    OrderId, OrderPlaced, OrderStatus, PlaceOrder,
};
