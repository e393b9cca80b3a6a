use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use packloop_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use packloop_events::Event;

/// Vendor identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VendorId(pub AggregateId);

impl VendorId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for VendorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Snapshot of a vendor's running counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorStats {
    pub completed_orders: u64,
    pub canceled_orders: u64,
    /// Minor currency units.
    pub total_sales: u64,
    /// Minor currency units. Tracked separately from `total_sales`; both move
    /// together on completion.
    pub total_amount: u64,
}

/// Aggregate root: Vendor.
///
/// Counters are never written directly. Each completed or canceled order is
/// recorded once, keyed by the order id, and the counters are the fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vendor {
    id: VendorId,
    code: String,
    name: String,
    stats: VendorStats,
    orders: Vec<AggregateId>,
    processed_orders: HashSet<AggregateId>,
    version: u64,
    created: bool,
}

impl Vendor {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: VendorId) -> Self {
        Self {
            id,
            code: String::new(),
            name: String::new(),
            stats: VendorStats::default(),
            orders: Vec::new(),
            processed_orders: HashSet::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> VendorId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stats(&self) -> VendorStats {
        self.stats
    }

    pub fn orders(&self) -> &[AggregateId] {
        &self.orders
    }

    /// Whether a completion or cancellation of this order was already counted.
    pub fn has_processed(&self, order_id: AggregateId) -> bool {
        self.processed_orders.contains(&order_id)
    }
}

impl AggregateRoot for Vendor {
    type Id = VendorId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterVendor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterVendor {
    pub vendor_id: VendorId,
    pub code: String,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: LinkVendorOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkVendorOrder {
    pub vendor_id: VendorId,
    pub order_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordCompletedOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCompletedOrder {
    pub vendor_id: VendorId,
    pub order_id: AggregateId,
    pub total_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordCanceledOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCanceledOrder {
    pub vendor_id: VendorId,
    pub order_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VendorCommand {
    RegisterVendor(RegisterVendor),
    LinkVendorOrder(LinkVendorOrder),
    RecordCompletedOrder(RecordCompletedOrder),
    RecordCanceledOrder(RecordCanceledOrder),
}

/// Event: VendorRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorRegistered {
    pub vendor_id: VendorId,
    pub code: String,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: VendorOrderLinked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VendorOrderLinked {
    pub vendor_id: VendorId,
    pub order_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CompletedOrderRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedOrderRecorded {
    pub vendor_id: VendorId,
    pub order_id: AggregateId,
    pub total_price: u64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: CanceledOrderRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanceledOrderRecorded {
    pub vendor_id: VendorId,
    pub order_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VendorEvent {
    VendorRegistered(VendorRegistered),
    VendorOrderLinked(VendorOrderLinked),
    CompletedOrderRecorded(CompletedOrderRecorded),
    CanceledOrderRecorded(CanceledOrderRecorded),
}

impl Event for VendorEvent {
    fn event_type(&self) -> &'static str {
        match self {
            VendorEvent::VendorRegistered(_) => "parties.vendor.registered",
            VendorEvent::VendorOrderLinked(_) => "parties.vendor.order_linked",
            VendorEvent::CompletedOrderRecorded(_) => "parties.vendor.completed_order_recorded",
            VendorEvent::CanceledOrderRecorded(_) => "parties.vendor.canceled_order_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            VendorEvent::VendorRegistered(e) => e.occurred_at,
            VendorEvent::VendorOrderLinked(e) => e.occurred_at,
            VendorEvent::CompletedOrderRecorded(e) => e.occurred_at,
            VendorEvent::CanceledOrderRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Vendor {
    type Command = VendorCommand;
    type Event = VendorEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            VendorEvent::VendorRegistered(e) => {
                self.id = e.vendor_id;
                self.code = e.code.clone();
                self.name = e.name.clone();
                self.created = true;
            }
            VendorEvent::VendorOrderLinked(e) => {
                if !self.orders.contains(&e.order_id) {
                    self.orders.push(e.order_id);
                }
            }
            VendorEvent::CompletedOrderRecorded(e) => {
                if self.processed_orders.insert(e.order_id) {
                    self.stats.completed_orders += 1;
                    self.stats.total_sales += e.total_price;
                    self.stats.total_amount += e.total_price;
                }
            }
            VendorEvent::CanceledOrderRecorded(e) => {
                if self.processed_orders.insert(e.order_id) {
                    self.stats.canceled_orders += 1;
                }
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            VendorCommand::RegisterVendor(cmd) => self.handle_register(cmd),
            VendorCommand::LinkVendorOrder(cmd) => self.handle_link_order(cmd),
            VendorCommand::RecordCompletedOrder(cmd) => self.handle_completed(cmd),
            VendorCommand::RecordCanceledOrder(cmd) => self.handle_canceled(cmd),
        }
    }
}

impl Vendor {
    fn ensure_created(&self, vendor_id: VendorId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != vendor_id {
            return Err(DomainError::invariant("vendor_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterVendor) -> Result<Vec<VendorEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("vendor already exists"));
        }
        if cmd.name.trim().is_empty() {
            return Err(DomainError::validation("vendor name cannot be empty"));
        }

        Ok(vec![VendorEvent::VendorRegistered(VendorRegistered {
            vendor_id: cmd.vendor_id,
            code: cmd.code.clone(),
            name: cmd.name.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_link_order(&self, cmd: &LinkVendorOrder) -> Result<Vec<VendorEvent>, DomainError> {
        self.ensure_created(cmd.vendor_id)?;
        if self.orders.contains(&cmd.order_id) {
            return Ok(vec![]);
        }

        Ok(vec![VendorEvent::VendorOrderLinked(VendorOrderLinked {
            vendor_id: cmd.vendor_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_completed(
        &self,
        cmd: &RecordCompletedOrder,
    ) -> Result<Vec<VendorEvent>, DomainError> {
        self.ensure_created(cmd.vendor_id)?;
        if self.has_processed(cmd.order_id) {
            return Ok(vec![]);
        }

        Ok(vec![VendorEvent::CompletedOrderRecorded(CompletedOrderRecorded {
            vendor_id: cmd.vendor_id,
            order_id: cmd.order_id,
            total_price: cmd.total_price,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_canceled(&self, cmd: &RecordCanceledOrder) -> Result<Vec<VendorEvent>, DomainError> {
        self.ensure_created(cmd.vendor_id)?;
        if self.has_processed(cmd.order_id) {
            return Ok(vec![]);
        }

        Ok(vec![VendorEvent::CanceledOrderRecorded(CanceledOrderRecorded {
            vendor_id: cmd.vendor_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}
