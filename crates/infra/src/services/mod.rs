//! Application services: the order, pack and return-request workflows.
//!
//! Services own no state of their own; every entity lives in the ledger and
//! is reloaded per call.

pub mod fulfillment;
pub mod packs;
pub mod placement;
pub mod registration;
pub mod returns;

use std::sync::Arc;

use serde_json::Value as JsonValue;

use packloop_core::AggregateId;
use packloop_events::{EventBus, EventEnvelope};
use packloop_orders::{Order, OrderId};
use packloop_packs::{Pack, PackId, PackRequest, PackRequestId};
use packloop_parties::{Buyer, BuyerId, Vendor, VendorId};

use crate::command_dispatcher::CommandDispatcher;
use crate::config::PackloopConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::event_store::EventStore;
use crate::external::{Catalog, Clock};
use crate::read_model::OrderCodeIndex;

pub use fulfillment::{CompletionOutcome, OrderFulfillmentService};
pub use packs::PackLifecycleManager;
pub use placement::{OrderPlacementService, PlaceOrderRequest};
pub use registration::RegistrationService;
pub use returns::ReturnRequestWorkflow;

pub(crate) const ORDER: &str = "orders.order";
pub(crate) const BUYER: &str = "parties.buyer";
pub(crate) const VENDOR: &str = "parties.vendor";
pub(crate) const PACK: &str = "packs.pack";
pub(crate) const PACK_REQUEST: &str = "packs.request";

pub(crate) fn new_order(id: AggregateId) -> Order {
    Order::empty(OrderId::new(id))
}

pub(crate) fn new_buyer(id: AggregateId) -> Buyer {
    Buyer::empty(BuyerId::new(id))
}

pub(crate) fn new_vendor(id: AggregateId) -> Vendor {
    Vendor::empty(VendorId::new(id))
}

pub(crate) fn new_pack(id: AggregateId) -> Pack {
    Pack::empty(PackId::new(id))
}

pub(crate) fn new_request(id: AggregateId) -> PackRequest {
    PackRequest::empty(PackRequestId::new(id))
}

/// Load-by-id for each entity, failing with `NotFound` for unwritten streams.
pub(crate) struct Loader<'a, S, B>(pub &'a CommandDispatcher<S, B>);

impl<S, B> Loader<'_, S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn order(&self, id: OrderId) -> ServiceResult<Order> {
        let order = self.0.load(id.0, new_order).map_err(|e| ServiceError::from_dispatch("order", e))?;
        if !order.exists() {
            return Err(ServiceError::NotFound("order"));
        }
        Ok(order)
    }

    pub fn buyer(&self, id: BuyerId) -> ServiceResult<Buyer> {
        let buyer = self.0.load(id.0, new_buyer).map_err(|e| ServiceError::from_dispatch("buyer", e))?;
        if !buyer.exists() {
            return Err(ServiceError::NotFound("buyer"));
        }
        Ok(buyer)
    }

    pub fn vendor(&self, id: VendorId) -> ServiceResult<Vendor> {
        let vendor = self.0.load(id.0, new_vendor).map_err(|e| ServiceError::from_dispatch("vendor", e))?;
        if !vendor.exists() {
            return Err(ServiceError::NotFound("vendor"));
        }
        Ok(vendor)
    }

    pub fn pack(&self, id: PackId) -> ServiceResult<Pack> {
        let pack = self.0.load(id.0, new_pack).map_err(|e| ServiceError::from_dispatch("pack", e))?;
        if !pack.exists() {
            return Err(ServiceError::NotFound("pack"));
        }
        Ok(pack)
    }

    pub fn request(&self, id: PackRequestId) -> ServiceResult<PackRequest> {
        let request = self
            .0
            .load(id.0, new_request)
            .map_err(|e| ServiceError::from_dispatch("pack request", e))?;
        if !request.exists() {
            return Err(ServiceError::NotFound("pack request"));
        }
        Ok(request)
    }
}

/// The wired-up core: one dispatcher shared by every service.
pub struct Packloop<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    pub registration: RegistrationService<S, B>,
    pub placement: OrderPlacementService<S, B>,
    pub fulfillment: OrderFulfillmentService<S, B>,
    pub packs: Arc<PackLifecycleManager<S, B>>,
    pub returns: ReturnRequestWorkflow<S, B>,
}

impl<S, B> Packloop<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        store: S,
        bus: B,
        catalog: Arc<dyn Catalog>,
        codes: Arc<dyn OrderCodeIndex>,
        clock: Arc<dyn Clock>,
        config: &PackloopConfig,
    ) -> Self {
        let dispatcher = Arc::new(CommandDispatcher::new(store, bus));
        let packs = Arc::new(PackLifecycleManager::new(dispatcher.clone(), config.pack_keying));

        tracing::info!(
            pack_keying = ?config.pack_keying,
            order_code_max_attempts = config.order_code_max_attempts,
            "packloop core initialised"
        );

        Self {
            registration: RegistrationService::new(dispatcher.clone(), clock.clone()),
            placement: OrderPlacementService::new(
                dispatcher.clone(),
                catalog,
                codes,
                clock.clone(),
                config.order_code_max_attempts,
            ),
            fulfillment: OrderFulfillmentService::new(dispatcher.clone(), packs.clone(), clock.clone()),
            returns: ReturnRequestWorkflow::new(dispatcher.clone(), packs.clone(), clock),
            packs,
            dispatcher,
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher<S, B> {
        &self.dispatcher
    }

    pub fn order(&self, id: OrderId) -> ServiceResult<Order> {
        Loader(&*self.dispatcher).order(id)
    }

    pub fn buyer(&self, id: BuyerId) -> ServiceResult<Buyer> {
        Loader(&*self.dispatcher).buyer(id)
    }

    pub fn vendor(&self, id: VendorId) -> ServiceResult<Vendor> {
        Loader(&*self.dispatcher).vendor(id)
    }

    pub fn pack(&self, id: PackId) -> ServiceResult<Pack> {
        Loader(&*self.dispatcher).pack(id)
    }

    pub fn request(&self, id: PackRequestId) -> ServiceResult<PackRequest> {
        Loader(&*self.dispatcher).request(id)
    }
}
