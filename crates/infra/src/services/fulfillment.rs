use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use packloop_events::{EventBus, EventEnvelope};
use packloop_orders::{CancelOrder, CompleteOrder, Order, OrderCommand, OrderId, OrderStatus};
use packloop_packs::Pack;
use packloop_parties::{
    BuyerCommand, BuyerId, RecordCanceledOrder, RecordCompletedOrder, RecordPackActivation,
    VendorCommand, VendorId, VendorStats,
};

use super::packs::PackLifecycleManager;
use super::{BUYER, Loader, ORDER, VENDOR, new_buyer, new_order, new_vendor};
use crate::command_dispatcher::CommandDispatcher;
use crate::error::{FulfillmentStep, ServiceError, ServiceResult};
use crate::event_store::EventStore;
use crate::external::Clock;

/// What a completed order produced downstream.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub order: Order,
    pub vendor_stats: VendorStats,
    pub pack: Pack,
}

/// Drives orders from `placed` to a terminal state and applies the
/// downstream effects (vendor counters, pack issue, buyer pack fields).
///
/// The order transition is a compare-and-swap on the order stream, so only one
/// of several concurrent callers gets to run the effects. Effects are keyed by
/// order id and can be re-run with [`reconcile`](Self::reconcile).
pub struct OrderFulfillmentService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    packs: Arc<PackLifecycleManager<S, B>>,
    clock: Arc<dyn Clock>,
}

impl<S, B> OrderFulfillmentService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(
        dispatcher: Arc<CommandDispatcher<S, B>>,
        packs: Arc<PackLifecycleManager<S, B>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            dispatcher,
            packs,
            clock,
        }
    }

    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    pub fn complete(&self, order_id: OrderId) -> ServiceResult<CompletionOutcome> {
        let cmd = OrderCommand::CompleteOrder(CompleteOrder {
            order_id,
            occurred_at: self.clock.now(),
        });
        let order = self
            .dispatcher
            .dispatch(order_id.0, ORDER, cmd, new_order)
            .map_err(|e| ServiceError::from_dispatch("order", e))?
            .aggregate;

        tracing::info!(total_price = order.total_price(), "order completed");
        self.completion_effects(&order)
    }

    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    pub fn cancel(&self, order_id: OrderId) -> ServiceResult<Order> {
        let cmd = OrderCommand::CancelOrder(CancelOrder {
            order_id,
            occurred_at: self.clock.now(),
        });
        let order = self
            .dispatcher
            .dispatch(order_id.0, ORDER, cmd, new_order)
            .map_err(|e| ServiceError::from_dispatch("order", e))?
            .aggregate;

        tracing::info!("order cancelled");
        self.cancellation_effects(&order)?;
        Ok(order)
    }

    /// Re-run the downstream effects of a terminal order, skipping the ones
    /// already applied. Use after a `PartialFulfillment`.
    #[tracing::instrument(skip_all, fields(order_id = %order_id))]
    pub fn reconcile(&self, order_id: OrderId) -> ServiceResult<Order> {
        let order = Loader(&*self.dispatcher).order(order_id)?;

        match order.status() {
            OrderStatus::Placed => {
                return Err(ServiceError::InvalidStateTransition(
                    "order is still placed; nothing to reconcile".to_string(),
                ));
            }
            OrderStatus::Completed => {
                self.completion_effects(&order)?;
            }
            OrderStatus::Cancelled => {
                self.cancellation_effects(&order)?;
            }
        }

        tracing::info!(status = order.status().as_str(), "order reconciled");
        Ok(order)
    }

    fn completion_effects(&self, order: &Order) -> ServiceResult<CompletionOutcome> {
        let order_id = order.id_typed();
        let (buyer_id, vendor_id) = parties(order)?;
        let at = order.closed_at().unwrap_or_else(|| self.clock.now());

        let record = VendorCommand::RecordCompletedOrder(RecordCompletedOrder {
            vendor_id,
            order_id: order_id.0,
            total_price: order.total_price(),
            occurred_at: at,
        });
        let vendor = self
            .dispatcher
            .dispatch_unchecked(vendor_id.0, VENDOR, record, new_vendor)
            .map_err(|e| partial(order_id, FulfillmentStep::VendorStats, e))?
            .aggregate;

        let buyer = Loader(&*self.dispatcher)
            .buyer(buyer_id)
            .map_err(|e| partial(order_id, FulfillmentStep::Pack, e))?;
        let pack = self
            .packs
            .issue_or_reactivate(&buyer, order_id, at)
            .map_err(|e| partial(order_id, FulfillmentStep::Pack, e))?;

        self.record_activation(buyer_id, &pack, order_id, at)
            .map_err(|e| partial(order_id, FulfillmentStep::BuyerPacks, e))?;

        Ok(CompletionOutcome {
            order: order.clone(),
            vendor_stats: vendor.stats(),
            pack,
        })
    }

    fn cancellation_effects(&self, order: &Order) -> ServiceResult<()> {
        let order_id = order.id_typed();
        let (_, vendor_id) = parties(order)?;

        let record = VendorCommand::RecordCanceledOrder(RecordCanceledOrder {
            vendor_id,
            order_id: order_id.0,
            occurred_at: order.closed_at().unwrap_or_else(|| self.clock.now()),
        });
        self.dispatcher
            .dispatch_unchecked(vendor_id.0, VENDOR, record, new_vendor)
            .map_err(|e| partial(order_id, FulfillmentStep::VendorStats, e))?;
        Ok(())
    }

    fn record_activation(
        &self,
        buyer_id: BuyerId,
        pack: &Pack,
        order_id: OrderId,
        at: DateTime<Utc>,
    ) -> Result<(), crate::command_dispatcher::DispatchError> {
        let cmd = BuyerCommand::RecordPackActivation(RecordPackActivation {
            buyer_id,
            pack_id: pack.id_typed().0,
            order_id: order_id.0,
            occurred_at: at,
        });
        self.dispatcher
            .dispatch_unchecked(buyer_id.0, BUYER, cmd, new_buyer)?;
        Ok(())
    }
}

fn parties(order: &Order) -> ServiceResult<(BuyerId, VendorId)> {
    match (order.buyer_id(), order.vendor_id()) {
        (Some(buyer_id), Some(vendor_id)) => Ok((buyer_id, vendor_id)),
        _ => Err(ServiceError::Validation(format!(
            "order {} has no buyer or vendor",
            order.id_typed()
        ))),
    }
}

fn partial(order_id: OrderId, step: FulfillmentStep, err: impl core::fmt::Display) -> ServiceError {
    tracing::warn!(order_id = %order_id, step = ?step, error = %err, "downstream fulfillment step failed");
    ServiceError::PartialFulfillment {
        order_id,
        step,
        reason: err.to_string(),
    }
}
