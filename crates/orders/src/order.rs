use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use packloop_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use packloop_events::Event;
use packloop_parties::{BuyerId, VendorId};

use crate::cart::{Cart, OrderLine};
use crate::code::OrderCode;

/// Order identifier (storage identity; see `OrderCode` for the display id).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderId(pub AggregateId);

impl OrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for OrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Order status lifecycle: `placed` then exactly one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Placed,
    Completed,
    Cancelled,
}

impl OrderStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::Placed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Placed => "placed",
            OrderStatus::Completed => "completed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    code: Option<OrderCode>,
    buyer_id: Option<BuyerId>,
    vendor_id: Option<VendorId>,
    status: OrderStatus,
    lines: Vec<OrderLine>,
    total_price: u64,
    total_quantity: u64,
    cover_image: Option<String>,
    placed_at: Option<DateTime<Utc>>,
    closed_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            code: None,
            buyer_id: None,
            vendor_id: None,
            status: OrderStatus::Placed,
            lines: Vec::new(),
            total_price: 0,
            total_quantity: 0,
            cover_image: None,
            placed_at: None,
            closed_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn code(&self) -> Option<&OrderCode> {
        self.code.as_ref()
    }

    pub fn buyer_id(&self) -> Option<BuyerId> {
        self.buyer_id
    }

    pub fn vendor_id(&self) -> Option<VendorId> {
        self.vendor_id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn total_price(&self) -> u64 {
        self.total_price
    }

    pub fn total_quantity(&self) -> u64 {
        self.total_quantity
    }

    pub fn cover_image(&self) -> Option<&str> {
        self.cover_image.as_deref()
    }

    pub fn placed_at(&self) -> Option<DateTime<Utc>> {
        self.placed_at
    }

    /// When the order reached its terminal state.
    pub fn closed_at(&self) -> Option<DateTime<Utc>> {
        self.closed_at
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: PlaceOrder. The cart is already validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrder {
    pub order_id: OrderId,
    pub code: OrderCode,
    pub buyer_id: BuyerId,
    pub cart: Cart,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    PlaceOrder(PlaceOrder),
    CompleteOrder(CompleteOrder),
    CancelOrder(CancelOrder),
}

/// Event: OrderPlaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPlaced {
    pub order_id: OrderId,
    pub code: OrderCode,
    pub buyer_id: BuyerId,
    pub vendor_id: VendorId,
    pub lines: Vec<OrderLine>,
    pub total_price: u64,
    pub total_quantity: u64,
    pub cover_image: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCompleted {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderPlaced(OrderPlaced),
    OrderCompleted(OrderCompleted),
    OrderCancelled(OrderCancelled),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderPlaced(_) => "orders.order.placed",
            OrderEvent::OrderCompleted(_) => "orders.order.completed",
            OrderEvent::OrderCancelled(_) => "orders.order.cancelled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderPlaced(e) => e.occurred_at,
            OrderEvent::OrderCompleted(e) => e.occurred_at,
            OrderEvent::OrderCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderPlaced(e) => {
                self.id = e.order_id;
                self.code = Some(e.code.clone());
                self.buyer_id = Some(e.buyer_id);
                self.vendor_id = Some(e.vendor_id);
                self.status = OrderStatus::Placed;
                self.lines = e.lines.clone();
                self.total_price = e.total_price;
                self.total_quantity = e.total_quantity;
                self.cover_image = e.cover_image.clone();
                self.placed_at = Some(e.occurred_at);
                self.created = true;
            }
            OrderEvent::OrderCompleted(e) => {
                self.status = OrderStatus::Completed;
                self.closed_at = Some(e.occurred_at);
            }
            OrderEvent::OrderCancelled(e) => {
                self.status = OrderStatus::Cancelled;
                self.closed_at = Some(e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::PlaceOrder(cmd) => self.handle_place(cmd),
            OrderCommand::CompleteOrder(cmd) => self.handle_complete(cmd),
            OrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Order {
    fn ensure_order_id(&self, order_id: OrderId) -> Result<(), DomainError> {
        if self.id != order_id {
            return Err(DomainError::invariant("order_id mismatch"));
        }
        Ok(())
    }

    /// Only `placed` orders may transition; terminal states are final.
    fn ensure_transition(&self, target: OrderStatus) -> Result<(), DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::invalid_transition(format!(
                "order is already {}; cannot move to {}",
                self.status.as_str(),
                target.as_str()
            )));
        }
        Ok(())
    }

    fn handle_place(&self, cmd: &PlaceOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }

        let cart = &cmd.cart;
        Ok(vec![OrderEvent::OrderPlaced(OrderPlaced {
            order_id: cmd.order_id,
            code: cmd.code.clone(),
            buyer_id: cmd.buyer_id,
            vendor_id: cart.vendor_id(),
            lines: cart.lines().to_vec(),
            total_price: cart.total_price(),
            total_quantity: cart.total_quantity(),
            cover_image: cart.cover_image().map(str::to_string),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_transition(OrderStatus::Completed)?;

        Ok(vec![OrderEvent::OrderCompleted(OrderCompleted {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_order_id(cmd.order_id)?;
        self.ensure_transition(OrderStatus::Cancelled)?;

        Ok(vec![OrderEvent::OrderCancelled(OrderCancelled {
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
