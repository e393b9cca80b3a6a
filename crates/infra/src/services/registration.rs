use std::sync::Arc;

use serde_json::Value as JsonValue;

use packloop_core::AggregateId;
use packloop_events::{EventBus, EventEnvelope};
use packloop_parties::{
    Buyer, BuyerCommand, BuyerId, BuyerProfile, RegisterBuyer, RegisterVendor, UpdateBuyerProfile,
    Vendor, VendorCommand, VendorId,
};

use super::{BUYER, VENDOR, new_buyer, new_vendor};
use crate::command_dispatcher::CommandDispatcher;
use crate::error::{ServiceError, ServiceResult};
use crate::event_store::EventStore;
use crate::external::Clock;

/// Buyer and vendor registration.
pub struct RegistrationService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    clock: Arc<dyn Clock>,
}

impl<S, B> RegistrationService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>, clock: Arc<dyn Clock>) -> Self {
        Self { dispatcher, clock }
    }

    #[tracing::instrument(skip_all, fields(buyer_code = %profile.code))]
    pub fn register_buyer(&self, profile: BuyerProfile) -> ServiceResult<Buyer> {
        let buyer_id = BuyerId::new(AggregateId::new());
        let cmd = BuyerCommand::RegisterBuyer(RegisterBuyer {
            buyer_id,
            profile,
            occurred_at: self.clock.now(),
        });

        let out = self
            .dispatcher
            .dispatch(buyer_id.0, BUYER, cmd, new_buyer)
            .map_err(|e| ServiceError::from_dispatch("buyer", e))?;

        tracing::info!(buyer_id = %buyer_id, "buyer registered");
        Ok(out.aggregate)
    }

    /// Names and organization only; the buyer code never changes.
    #[tracing::instrument(skip_all, fields(buyer_id = %buyer_id))]
    pub fn update_buyer_profile(
        &self,
        buyer_id: BuyerId,
        first_name: &str,
        last_name: &str,
        organization: &str,
    ) -> ServiceResult<Buyer> {
        let cmd = BuyerCommand::UpdateBuyerProfile(UpdateBuyerProfile {
            buyer_id,
            first_name: first_name.to_string(),
            last_name: last_name.to_string(),
            organization: organization.to_string(),
            occurred_at: self.clock.now(),
        });

        let out = self
            .dispatcher
            .dispatch(buyer_id.0, BUYER, cmd, new_buyer)
            .map_err(|e| ServiceError::from_dispatch("buyer", e))?;
        Ok(out.aggregate)
    }

    #[tracing::instrument(skip_all, fields(vendor_code = %code))]
    pub fn register_vendor(&self, code: &str, name: &str) -> ServiceResult<Vendor> {
        let vendor_id = VendorId::new(AggregateId::new());
        let cmd = VendorCommand::RegisterVendor(RegisterVendor {
            vendor_id,
            code: code.to_string(),
            name: name.to_string(),
            occurred_at: self.clock.now(),
        });

        let out = self
            .dispatcher
            .dispatch(vendor_id.0, VENDOR, cmd, new_vendor)
            .map_err(|e| ServiceError::from_dispatch("vendor", e))?;

        tracing::info!(vendor_id = %vendor_id, "vendor registered");
        Ok(out.aggregate)
    }
}
