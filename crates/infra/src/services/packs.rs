use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value as JsonValue;

use packloop_core::AggregateId;
use packloop_events::{EventBus, EventEnvelope};
use packloop_orders::OrderId;
use packloop_packs::{
    IssuePack, MarkPackReturned, Pack, PackCommand, PackId, PackKey, PackKeying, ReactivatePack,
};
use packloop_parties::Buyer;

use super::{Loader, PACK, new_pack};
use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::error::{ServiceError, ServiceResult};
use crate::event_store::EventStore;

/// Issues, reactivates and retires buyer packs.
pub struct PackLifecycleManager<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    keying: PackKeying,
}

impl<S, B> PackLifecycleManager<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>, keying: PackKeying) -> Self {
        Self { dispatcher, keying }
    }

    pub fn keying(&self) -> PackKeying {
        self.keying
    }

    /// The key a pack for this buyer code would have on `date`.
    pub fn key_for(&self, buyer_code: &str, date: NaiveDate) -> PackKey {
        PackKey::new(self.keying, buyer_code, date)
    }

    /// Look a pack up by key; `None` if it was never issued.
    pub fn find(&self, key: &PackKey) -> ServiceResult<Option<Pack>> {
        match Loader(&*self.dispatcher).pack(key.pack_id()) {
            Ok(pack) => Ok(Some(pack)),
            Err(ServiceError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Create the buyer's pack for the completion date, or set the existing
    /// one back to `active`.
    ///
    /// Creation is create-if-absent on a key-derived stream id. A writer that
    /// loses the creation race falls through to reactivation, so concurrent
    /// completions on the same key leave exactly one pack.
    #[tracing::instrument(skip_all, fields(buyer_id = %buyer.id_typed(), order_id = %order_id))]
    pub fn issue_or_reactivate(
        &self,
        buyer: &Buyer,
        order_id: OrderId,
        at: DateTime<Utc>,
    ) -> ServiceResult<Pack> {
        let profile = buyer.profile().ok_or(ServiceError::NotFound("buyer"))?;
        let issue_date = at.date_naive();
        let key = PackKey::new(self.keying, profile.code.clone(), issue_date);
        let pack_id = key.pack_id();

        let existing = self
            .dispatcher
            .load(pack_id.0, new_pack)
            .map_err(|e| ServiceError::from_dispatch("pack", e))?;
        if existing.exists() {
            // Already activated by this very order (a reconcile re-run).
            if existing.last_order() == Some(order_id.0) {
                return Ok(existing);
            }
            return self.reactivate(pack_id, order_id, at);
        }

        let cmd = PackCommand::IssuePack(IssuePack {
            pack_id,
            buyer_id: buyer.id_typed(),
            buyer_code: profile.code.clone(),
            buyer_name: profile.display_name(),
            organization: profile.organization.clone(),
            issue_date,
            order_id: order_id.0,
            occurred_at: at,
        });

        match self.dispatcher.dispatch(pack_id.0, PACK, cmd, new_pack) {
            Ok(out) => {
                tracing::info!(pack = %out.aggregate.display_id(), "pack issued");
                Ok(out.aggregate)
            }
            Err(DispatchError::Concurrency(_)) | Err(DispatchError::Conflict(_)) => {
                tracing::debug!(pack = %key.buyer_code, "pack created concurrently; reactivating instead");
                self.reactivate(pack_id, order_id, at)
            }
            Err(err) => Err(ServiceError::from_dispatch("pack", err)),
        }
    }

    fn reactivate(&self, pack_id: PackId, order_id: OrderId, at: DateTime<Utc>) -> ServiceResult<Pack> {
        let cmd = PackCommand::ReactivatePack(ReactivatePack {
            pack_id,
            order_id: order_id.0,
            occurred_at: at,
        });
        let pack = self
            .dispatcher
            .dispatch_unchecked(pack_id.0, PACK, cmd, new_pack)
            .map_err(|e| ServiceError::from_dispatch("pack", e))?
            .aggregate;

        tracing::info!(pack = %pack.display_id(), "pack reactivated");
        Ok(pack)
    }

    /// Retire a pack after its return was approved. Idempotent.
    #[tracing::instrument(skip_all, fields(pack_id = %pack_id))]
    pub fn mark_returned(
        &self,
        pack_id: PackId,
        request_id: AggregateId,
        at: DateTime<Utc>,
    ) -> ServiceResult<Pack> {
        let cmd = PackCommand::MarkPackReturned(MarkPackReturned {
            pack_id,
            request_id,
            occurred_at: at,
        });
        let pack = self
            .dispatcher
            .dispatch_unchecked(pack_id.0, PACK, cmd, new_pack)
            .map_err(|e| ServiceError::from_dispatch("pack", e))?
            .aggregate;

        tracing::info!(pack = %pack.display_id(), "pack marked returned");
        Ok(pack)
    }
}
