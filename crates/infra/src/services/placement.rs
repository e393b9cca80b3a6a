use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use packloop_core::AggregateId;
use packloop_events::{EventBus, EventEnvelope};
use packloop_orders::{Cart, CartLine, ItemId, Order, OrderCode, OrderCommand, OrderId, PlaceOrder};
use packloop_parties::{BuyerCommand, BuyerId, LinkBuyerOrder, LinkVendorOrder, VendorCommand, VendorId};

use super::{BUYER, Loader, ORDER, VENDOR, new_buyer, new_order, new_vendor};
use crate::command_dispatcher::CommandDispatcher;
use crate::error::{ServiceError, ServiceResult};
use crate::event_store::EventStore;
use crate::external::{Catalog, Clock};
use crate::read_model::OrderCodeIndex;

/// A buyer's checkout: item references, quantities and the totals the client
/// displayed. Prices and vendor are never taken from here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaceOrderRequest {
    pub buyer_id: BuyerId,
    pub lines: Vec<CartLine>,
    pub declared_total_price: u64,
    pub declared_total_quantity: u64,
}

pub struct OrderPlacementService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    catalog: Arc<dyn Catalog>,
    codes: Arc<dyn OrderCodeIndex>,
    clock: Arc<dyn Clock>,
    rng: Mutex<fastrand::Rng>,
    max_code_attempts: u32,
}

impl<S, B> OrderPlacementService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        catalog: Arc<dyn Catalog>,
        codes: Arc<dyn OrderCodeIndex>,
        clock: Arc<dyn Clock>,
        max_code_attempts: u32,
    ) -> Self {
        Self {
            dispatcher,
            catalog,
            codes,
            clock,
            rng: Mutex::new(fastrand::Rng::new()),
            max_code_attempts: max_code_attempts.max(1),
        }
    }

    /// Reseed the order-code generator (deterministic codes in tests).
    pub fn seed_codes(&self, seed: u64) {
        let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        rng.seed(seed);
    }

    /// Validate a cart against the catalog and persist a `placed` order.
    ///
    /// Checks run in order and the first failure wins: empty cart, quantities,
    /// buyer existence, catalog resolution, single vendor, declared totals,
    /// vendor existence, code reservation.
    #[tracing::instrument(
        skip_all,
        fields(buyer_id = %request.buyer_id, lines = request.lines.len())
    )]
    pub fn place_order(&self, request: PlaceOrderRequest) -> ServiceResult<Order> {
        if request.lines.is_empty() {
            return Err(ServiceError::NoItems);
        }
        if let Some(line) = request.lines.iter().find(|l| l.quantity == 0) {
            return Err(ServiceError::Validation(format!(
                "quantity for item {} must be positive",
                line.item_id
            )));
        }

        let loader = Loader(&*self.dispatcher);
        let buyer = loader.buyer(request.buyer_id)?;

        let item_ids: Vec<ItemId> = request.lines.iter().map(|l| l.item_id).collect();
        let resolved = self.catalog.resolve(&item_ids)?;

        let cart = Cart::new(&request.lines, &resolved)?;
        cart.check_declared_totals(request.declared_total_price, request.declared_total_quantity)
            .inspect_err(|err| {
                tracing::warn!(error = %err, "declared totals rejected");
            })?;

        let vendor_id = cart.vendor_id();
        loader.vendor(vendor_id)?;

        let order_id = OrderId::new(AggregateId::new());
        let code = self.reserve_code(order_id)?;
        let now = self.clock.now();

        let cmd = OrderCommand::PlaceOrder(PlaceOrder {
            order_id,
            code: code.clone(),
            buyer_id: buyer.id_typed(),
            cart,
            occurred_at: now,
        });

        let order = match self.dispatcher.dispatch(order_id.0, ORDER, cmd, new_order) {
            Ok(out) => out.aggregate,
            Err(err) => {
                self.codes.release(&code, order_id);
                return Err(ServiceError::from_dispatch("order", err));
            }
        };

        self.link_order(buyer.id_typed(), vendor_id, order_id, now);

        tracing::info!(
            order_id = %order_id,
            code = %code,
            vendor_id = %vendor_id,
            total_price = order.total_price(),
            total_quantity = order.total_quantity(),
            "order placed"
        );
        Ok(order)
    }

    fn reserve_code(&self, order_id: OrderId) -> ServiceResult<OrderCode> {
        for attempt in 1..=self.max_code_attempts {
            let code = {
                let mut rng = self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                OrderCode::random(&mut rng)
            };
            if self.codes.reserve(&code, order_id) {
                return Ok(code);
            }
            tracing::debug!(attempt, code = %code, "order code taken; drawing another");
        }

        tracing::warn!(attempts = self.max_code_attempts, "order code space exhausted");
        Err(ServiceError::OrderCodeExhausted {
            attempts: self.max_code_attempts,
        })
    }

    /// Buyer and vendor order lists are a cache of the order stream; a failed
    /// link is logged and does not undo the placement.
    fn link_order(&self, buyer_id: BuyerId, vendor_id: VendorId, order_id: OrderId, at: DateTime<Utc>) {
        let link_buyer = BuyerCommand::LinkBuyerOrder(LinkBuyerOrder {
            buyer_id,
            order_id: order_id.0,
            occurred_at: at,
        });
        if let Err(err) = self
            .dispatcher
            .dispatch_unchecked(buyer_id.0, BUYER, link_buyer, new_buyer)
        {
            tracing::warn!(order_id = %order_id, buyer_id = %buyer_id, error = %err, "failed to link order to buyer");
        }

        let link_vendor = VendorCommand::LinkVendorOrder(LinkVendorOrder {
            vendor_id,
            order_id: order_id.0,
            occurred_at: at,
        });
        if let Err(err) = self
            .dispatcher
            .dispatch_unchecked(vendor_id.0, VENDOR, link_vendor, new_vendor)
        {
            tracing::warn!(order_id = %order_id, vendor_id = %vendor_id, error = %err, "failed to link order to vendor");
        }
    }
}
