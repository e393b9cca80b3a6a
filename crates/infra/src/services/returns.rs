use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use packloop_core::{ActorId, AggregateId};
use packloop_events::{EventBus, EventEnvelope};
use packloop_packs::{
    PackId, PackRequest, PackRequestCommand, PackRequestId, PackRequestStatus, ResolveAction,
    SubmitPackRequest,
};
use packloop_parties::{BuyerCommand, BuyerId, CloseReturnRequest, CreditReturnedPack, OpenReturnRequest};

use super::packs::PackLifecycleManager;
use super::{BUYER, Loader, PACK_REQUEST, new_buyer, new_request};
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::error::{ReturnStep, ServiceError, ServiceResult};
use crate::event_store::EventStore;
use crate::external::Clock;

/// Writes to the buyer stream race with order links and pack activations;
/// a lost race on the slot claim is retried this many times in total.
const SLOT_CLAIM_ATTEMPTS: u32 = 3;

/// Buyer-submitted pack returns and their staff resolution.
pub struct ReturnRequestWorkflow<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    packs: Arc<PackLifecycleManager<S, B>>,
    clock: Arc<dyn Clock>,
}

impl<S, B> ReturnRequestWorkflow<S, B>
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

    /// Open a return request for the buyer holding `claimed_code`.
    ///
    /// The code must equal the buyer's code exactly. The buyer's single
    /// pending slot is claimed first (compare-and-swap on the buyer stream),
    /// then the request is created. Nothing is written when the code does not
    /// match.
    #[tracing::instrument(skip_all, fields(buyer_id = %buyer_id))]
    pub fn submit(&self, buyer_id: BuyerId, claimed_code: &str) -> ServiceResult<PackRequest> {
        let buyer = Loader(&*self.dispatcher).buyer(buyer_id)?;
        if buyer.code() != Some(claimed_code) {
            tracing::warn!("return request rejected: code does not match buyer");
            return Err(ServiceError::InvalidCode);
        }

        let request_id = PackRequestId::new(AggregateId::new());
        let now = self.clock.now();
        self.claim_slot(buyer_id, request_id, now)?;

        let submit = PackRequestCommand::SubmitPackRequest(SubmitPackRequest {
            request_id,
            buyer_id,
            code: claimed_code.to_string(),
            occurred_at: now,
        });
        match self
            .dispatcher
            .dispatch(request_id.0, PACK_REQUEST, submit, new_request)
        {
            Ok(out) => {
                tracing::info!(request_id = %request_id, "pack request submitted");
                Ok(out.aggregate)
            }
            Err(err) => {
                self.release_slot(buyer_id, request_id, now);
                Err(ServiceError::from_dispatch("pack request", err))
            }
        }
    }

    /// Approve or reject a pending request on behalf of a staff member.
    ///
    /// The request transition is a compare-and-swap: of two concurrent
    /// resolutions only one succeeds, the other sees
    /// `InvalidOrAlreadyProcessed`. Follow-up writes run after it and fail
    /// with `PartialFailure`; [`reconcile`](Self::reconcile) finishes them.
    #[tracing::instrument(skip_all, fields(request_id = %request_id, action = %action, staff = %staff))]
    pub fn resolve(
        &self,
        request_id: PackRequestId,
        action: &str,
        staff: ActorId,
    ) -> ServiceResult<PackRequest> {
        let parsed: ResolveAction = action
            .parse()
            .map_err(|_| ServiceError::InvalidAction(action.to_string()))?;
        let now = self.clock.now();

        let cmd = PackRequestCommand::resolve(parsed, request_id, staff, now);
        let request = self
            .dispatcher
            .dispatch(request_id.0, PACK_REQUEST, cmd, new_request)
            .map_err(|e| match e {
                DispatchError::NotFound
                | DispatchError::InvalidTransition(_)
                | DispatchError::Concurrency(_) => {
                    tracing::warn!(error = %e, "pack request is missing or already resolved");
                    ServiceError::InvalidOrAlreadyProcessed
                }
                other => ServiceError::from_dispatch("pack request", other),
            })?
            .aggregate;

        self.settle(&request, now)?;

        tracing::info!(status = request.status().as_str(), "pack request resolved");
        Ok(request)
    }

    /// Re-run the buyer and pack follow-ups of a resolved request, skipping
    /// the ones already applied. Use after a `PartialFailure`.
    #[tracing::instrument(skip_all, fields(request_id = %request_id))]
    pub fn reconcile(&self, request_id: PackRequestId) -> ServiceResult<PackRequest> {
        let request = Loader(&*self.dispatcher).request(request_id)?;
        if request.status() == PackRequestStatus::Pending {
            return Err(ServiceError::InvalidStateTransition(
                "pack request is still pending; nothing to reconcile".to_string(),
            ));
        }

        self.settle(&request, self.clock.now())?;

        tracing::info!(status = request.status().as_str(), "pack request reconciled");
        Ok(request)
    }

    fn claim_slot(&self, buyer_id: BuyerId, request_id: PackRequestId, at: DateTime<Utc>) -> ServiceResult<()> {
        let open = BuyerCommand::OpenReturnRequest(OpenReturnRequest {
            buyer_id,
            request_id: request_id.0,
            occurred_at: at,
        });

        let mut attempt = 1;
        loop {
            match self.dispatcher.dispatch(buyer_id.0, BUYER, open.clone(), new_buyer) {
                Ok(_) => return Ok(()),
                Err(DispatchError::Conflict(_)) => return Err(ServiceError::DuplicatePendingRequest),
                Err(DispatchError::Concurrency(msg)) if attempt < SLOT_CLAIM_ATTEMPTS => {
                    tracing::debug!(attempt, reason = %msg, "buyer changed while claiming return slot; retrying");
                    attempt += 1;
                }
                Err(other) => return Err(ServiceError::from_dispatch("buyer", other)),
            }
        }
    }

    /// Apply the buyer (and pack) effects of the request's terminal status.
    fn settle(&self, request: &PackRequest, at: DateTime<Utc>) -> ServiceResult<()> {
        let request_id = request.id_typed();
        let buyer_id = request.buyer_id().ok_or_else(|| {
            ServiceError::Validation(format!("pack request {request_id} has no buyer"))
        })?;

        match request.status() {
            PackRequestStatus::Approved => self.reward(request_id, buyer_id, at),
            PackRequestStatus::Rejected => self.close(request_id, buyer_id, at),
            PackRequestStatus::Pending => Ok(()),
        }
    }

    /// Credit the buyer and retire the pack they handed back.
    fn reward(&self, request_id: PackRequestId, buyer_id: BuyerId, at: DateTime<Utc>) -> ServiceResult<()> {
        let credit = BuyerCommand::CreditReturnedPack(CreditReturnedPack {
            buyer_id,
            request_id: request_id.0,
            occurred_at: at,
        });
        let out = self
            .dispatcher
            .dispatch_unchecked(buyer_id.0, BUYER, credit, new_buyer)
            .map_err(|e| partial(request_id, ReturnStep::BuyerReward, e))?;

        let buyer = out.aggregate;
        let loyalty = buyer.loyalty();
        tracing::info!(
            buyer_id = %buyer_id,
            returned_packs = loyalty.returned_packs,
            points = loyalty.points,
            money_balance = loyalty.money_balance,
            "buyer credited for returned pack"
        );

        if let Some(pack_id) = buyer.settled_pack(request_id.0) {
            self.packs
                .mark_returned(PackId::new(pack_id), request_id.0, at)
                .map_err(|e| partial(request_id, ReturnStep::PackStatus, e))?;
        }
        Ok(())
    }

    fn close(&self, request_id: PackRequestId, buyer_id: BuyerId, at: DateTime<Utc>) -> ServiceResult<()> {
        let close = BuyerCommand::CloseReturnRequest(CloseReturnRequest {
            buyer_id,
            request_id: request_id.0,
            occurred_at: at,
        });
        self.dispatcher
            .dispatch_unchecked(buyer_id.0, BUYER, close, new_buyer)
            .map_err(|e| partial(request_id, ReturnStep::BuyerPendingMarker, e))?;
        Ok(())
    }

    fn release_slot(&self, buyer_id: BuyerId, request_id: PackRequestId, at: DateTime<Utc>) {
        let close = BuyerCommand::CloseReturnRequest(CloseReturnRequest {
            buyer_id,
            request_id: request_id.0,
            occurred_at: at,
        });
        if let Err(err) = self
            .dispatcher
            .dispatch_unchecked(buyer_id.0, BUYER, close, new_buyer)
        {
            tracing::warn!(
                buyer_id = %buyer_id,
                request_id = %request_id,
                error = %err,
                "failed to release pending request slot"
            );
        }
    }
}

fn partial(request_id: PackRequestId, step: ReturnStep, err: impl core::fmt::Display) -> ServiceError {
    tracing::warn!(request_id = %request_id, step = ?step, error = %err, "return follow-up step failed");
    ServiceError::PartialFailure {
        request_id,
        step,
        reason: err.to_string(),
    }
}
