use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use packloop_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use packloop_events::Event;

use crate::loyalty::LoyaltyBalance;

/// Buyer identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuyerId(pub AggregateId);

impl BuyerId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for BuyerId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Registration data of a buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerProfile {
    /// Personal code printed on the buyer's pack; also the return-claim code.
    pub code: String,
    pub first_name: String,
    pub last_name: String,
    /// Name of the organization (agency) the buyer belongs to.
    pub organization: String,
}

impl BuyerProfile {
    pub fn display_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name).trim().to_string()
    }
}

/// Aggregate root: Buyer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Buyer {
    id: BuyerId,
    profile: Option<BuyerProfile>,
    returned_pack_count: u64,
    active_pack_count: u64,
    current_pack: Option<AggregateId>,
    pending_request: Option<AggregateId>,
    /// Closed or credited requests, with the pack credited for each.
    settled_requests: Vec<(AggregateId, Option<AggregateId>)>,
    orders: Vec<AggregateId>,
    version: u64,
    created: bool,
}

impl Buyer {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: BuyerId) -> Self {
        Self {
            id,
            profile: None,
            returned_pack_count: 0,
            active_pack_count: 0,
            current_pack: None,
            pending_request: None,
            settled_requests: Vec::new(),
            orders: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> BuyerId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn profile(&self) -> Option<&BuyerProfile> {
        self.profile.as_ref()
    }

    pub fn code(&self) -> Option<&str> {
        self.profile.as_ref().map(|p| p.code.as_str())
    }

    pub fn returned_pack_count(&self) -> u64 {
        self.returned_pack_count
    }

    pub fn loyalty(&self) -> LoyaltyBalance {
        LoyaltyBalance::for_returned_packs(self.returned_pack_count)
    }

    pub fn points(&self) -> u64 {
        self.loyalty().points
    }

    /// Money balance in minor currency units.
    pub fn money_balance(&self) -> u64 {
        self.loyalty().money_balance
    }

    pub fn active_pack_count(&self) -> u64 {
        self.active_pack_count
    }

    /// Storage id of the pack the buyer currently holds, if any.
    pub fn current_pack(&self) -> Option<AggregateId> {
        self.current_pack
    }

    pub fn pending_request(&self) -> Option<AggregateId> {
        self.pending_request
    }

    pub fn has_settled(&self, request_id: AggregateId) -> bool {
        self.settled_requests.iter().any(|(id, _)| *id == request_id)
    }

    /// The pack retired by an approved return request, if the buyer held one
    /// when it was credited.
    pub fn settled_pack(&self, request_id: AggregateId) -> Option<AggregateId> {
        self.settled_requests
            .iter()
            .find(|(id, _)| *id == request_id)
            .and_then(|(_, pack)| *pack)
    }

    /// Linked orders. A cache; the orders themselves are the source of truth.
    pub fn orders(&self) -> &[AggregateId] {
        &self.orders
    }
}

impl AggregateRoot for Buyer {
    type Id = BuyerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterBuyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterBuyer {
    pub buyer_id: BuyerId,
    pub profile: BuyerProfile,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateBuyerProfile. The buyer code is immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBuyerProfile {
    pub buyer_id: BuyerId,
    pub first_name: String,
    pub last_name: String,
    pub organization: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: LinkBuyerOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkBuyerOrder {
    pub buyer_id: BuyerId,
    pub order_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordPackActivation (a completed order issued or reactivated a pack).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPackActivation {
    pub buyer_id: BuyerId,
    pub pack_id: AggregateId,
    pub order_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: OpenReturnRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenReturnRequest {
    pub buyer_id: BuyerId,
    pub request_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CloseReturnRequest (request rejected, no reward).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseReturnRequest {
    pub buyer_id: BuyerId,
    pub request_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CreditReturnedPack (request approved).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditReturnedPack {
    pub buyer_id: BuyerId,
    pub request_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuyerCommand {
    RegisterBuyer(RegisterBuyer),
    UpdateBuyerProfile(UpdateBuyerProfile),
    LinkBuyerOrder(LinkBuyerOrder),
    RecordPackActivation(RecordPackActivation),
    OpenReturnRequest(OpenReturnRequest),
    CloseReturnRequest(CloseReturnRequest),
    CreditReturnedPack(CreditReturnedPack),
}

/// Event: BuyerRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerRegistered {
    pub buyer_id: BuyerId,
    pub profile: BuyerProfile,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BuyerProfileUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerProfileUpdated {
    pub buyer_id: BuyerId,
    pub first_name: String,
    pub last_name: String,
    pub organization: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: BuyerOrderLinked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuyerOrderLinked {
    pub buyer_id: BuyerId,
    pub order_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PackActivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackActivated {
    pub buyer_id: BuyerId,
    pub pack_id: AggregateId,
    pub order_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnRequestOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRequestOpened {
    pub buyer_id: BuyerId,
    pub request_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReturnRequestClosed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRequestClosed {
    pub buyer_id: BuyerId,
    pub request_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PackReturnCredited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackReturnCredited {
    pub buyer_id: BuyerId,
    pub request_id: AggregateId,
    /// The pack that was handed back, if the buyer held one.
    pub pack_id: Option<AggregateId>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuyerEvent {
    BuyerRegistered(BuyerRegistered),
    BuyerProfileUpdated(BuyerProfileUpdated),
    BuyerOrderLinked(BuyerOrderLinked),
    PackActivated(PackActivated),
    ReturnRequestOpened(ReturnRequestOpened),
    ReturnRequestClosed(ReturnRequestClosed),
    PackReturnCredited(PackReturnCredited),
}

impl Event for BuyerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            BuyerEvent::BuyerRegistered(_) => "parties.buyer.registered",
            BuyerEvent::BuyerProfileUpdated(_) => "parties.buyer.profile_updated",
            BuyerEvent::BuyerOrderLinked(_) => "parties.buyer.order_linked",
            BuyerEvent::PackActivated(_) => "parties.buyer.pack_activated",
            BuyerEvent::ReturnRequestOpened(_) => "parties.buyer.return_request_opened",
            BuyerEvent::ReturnRequestClosed(_) => "parties.buyer.return_request_closed",
            BuyerEvent::PackReturnCredited(_) => "parties.buyer.pack_return_credited",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            BuyerEvent::BuyerRegistered(e) => e.occurred_at,
            BuyerEvent::BuyerProfileUpdated(e) => e.occurred_at,
            BuyerEvent::BuyerOrderLinked(e) => e.occurred_at,
            BuyerEvent::PackActivated(e) => e.occurred_at,
            BuyerEvent::ReturnRequestOpened(e) => e.occurred_at,
            BuyerEvent::ReturnRequestClosed(e) => e.occurred_at,
            BuyerEvent::PackReturnCredited(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Buyer {
    type Command = BuyerCommand;
    type Event = BuyerEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            BuyerEvent::BuyerRegistered(e) => {
                self.id = e.buyer_id;
                self.profile = Some(e.profile.clone());
                self.created = true;
            }
            BuyerEvent::BuyerProfileUpdated(e) => {
                if let Some(profile) = self.profile.as_mut() {
                    profile.first_name = e.first_name.clone();
                    profile.last_name = e.last_name.clone();
                    profile.organization = e.organization.clone();
                }
            }
            BuyerEvent::BuyerOrderLinked(e) => {
                if !self.orders.contains(&e.order_id) {
                    self.orders.push(e.order_id);
                }
            }
            BuyerEvent::PackActivated(e) => {
                // Only ever moves 0 -> 1; a count of 1 or more is left as is.
                if self.active_pack_count == 0 {
                    self.active_pack_count = 1;
                }
                self.current_pack = Some(e.pack_id);
            }
            BuyerEvent::ReturnRequestOpened(e) => {
                self.pending_request = Some(e.request_id);
            }
            BuyerEvent::ReturnRequestClosed(e) => {
                if self.pending_request == Some(e.request_id) {
                    self.pending_request = None;
                }
                self.settled_requests.push((e.request_id, None));
            }
            BuyerEvent::PackReturnCredited(e) => {
                self.returned_pack_count += 1;
                if self.pending_request == Some(e.request_id) {
                    self.pending_request = None;
                }
                self.current_pack = None;
                self.settled_requests.push((e.request_id, e.pack_id));
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            BuyerCommand::RegisterBuyer(cmd) => self.handle_register(cmd),
            BuyerCommand::UpdateBuyerProfile(cmd) => self.handle_update_profile(cmd),
            BuyerCommand::LinkBuyerOrder(cmd) => self.handle_link_order(cmd),
            BuyerCommand::RecordPackActivation(cmd) => self.handle_pack_activation(cmd),
            BuyerCommand::OpenReturnRequest(cmd) => self.handle_open_request(cmd),
            BuyerCommand::CloseReturnRequest(cmd) => self.handle_close_request(cmd),
            BuyerCommand::CreditReturnedPack(cmd) => self.handle_credit(cmd),
        }
    }
}

impl Buyer {
    fn ensure_created(&self, buyer_id: BuyerId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != buyer_id {
            return Err(DomainError::invariant("buyer_id mismatch"));
        }
        Ok(())
    }

    fn ensure_pending(&self, request_id: AggregateId) -> Result<(), DomainError> {
        if self.pending_request != Some(request_id) {
            return Err(DomainError::invalid_transition(format!(
                "return request {request_id} is not pending for this buyer"
            )));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterBuyer) -> Result<Vec<BuyerEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("buyer already exists"));
        }
        if cmd.profile.code.trim().is_empty() {
            return Err(DomainError::validation("buyer code cannot be empty"));
        }
        if cmd.profile.organization.trim().is_empty() {
            return Err(DomainError::validation("organization cannot be empty"));
        }

        Ok(vec![BuyerEvent::BuyerRegistered(BuyerRegistered {
            buyer_id: cmd.buyer_id,
            profile: cmd.profile.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_profile(
        &self,
        cmd: &UpdateBuyerProfile,
    ) -> Result<Vec<BuyerEvent>, DomainError> {
        self.ensure_created(cmd.buyer_id)?;
        if cmd.organization.trim().is_empty() {
            return Err(DomainError::validation("organization cannot be empty"));
        }

        Ok(vec![BuyerEvent::BuyerProfileUpdated(BuyerProfileUpdated {
            buyer_id: cmd.buyer_id,
            first_name: cmd.first_name.clone(),
            last_name: cmd.last_name.clone(),
            organization: cmd.organization.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_link_order(&self, cmd: &LinkBuyerOrder) -> Result<Vec<BuyerEvent>, DomainError> {
        self.ensure_created(cmd.buyer_id)?;
        if self.orders.contains(&cmd.order_id) {
            return Ok(vec![]);
        }

        Ok(vec![BuyerEvent::BuyerOrderLinked(BuyerOrderLinked {
            buyer_id: cmd.buyer_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_pack_activation(
        &self,
        cmd: &RecordPackActivation,
    ) -> Result<Vec<BuyerEvent>, DomainError> {
        self.ensure_created(cmd.buyer_id)?;

        Ok(vec![BuyerEvent::PackActivated(PackActivated {
            buyer_id: cmd.buyer_id,
            pack_id: cmd.pack_id,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_open_request(
        &self,
        cmd: &OpenReturnRequest,
    ) -> Result<Vec<BuyerEvent>, DomainError> {
        self.ensure_created(cmd.buyer_id)?;
        if let Some(pending) = self.pending_request {
            return Err(DomainError::conflict(format!(
                "return request {pending} is already pending"
            )));
        }

        Ok(vec![BuyerEvent::ReturnRequestOpened(ReturnRequestOpened {
            buyer_id: cmd.buyer_id,
            request_id: cmd.request_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_close_request(
        &self,
        cmd: &CloseReturnRequest,
    ) -> Result<Vec<BuyerEvent>, DomainError> {
        self.ensure_created(cmd.buyer_id)?;
        if self.has_settled(cmd.request_id) {
            return Ok(vec![]);
        }
        self.ensure_pending(cmd.request_id)?;

        Ok(vec![BuyerEvent::ReturnRequestClosed(ReturnRequestClosed {
            buyer_id: cmd.buyer_id,
            request_id: cmd.request_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_credit(&self, cmd: &CreditReturnedPack) -> Result<Vec<BuyerEvent>, DomainError> {
        self.ensure_created(cmd.buyer_id)?;
        // Keyed by request id: re-running a credit after a partial failure
        // never pays twice.
        if self.has_settled(cmd.request_id) {
            return Ok(vec![]);
        }
        self.ensure_pending(cmd.request_id)?;

        Ok(vec![BuyerEvent::PackReturnCredited(PackReturnCredited {
            buyer_id: cmd.buyer_id,
            request_id: cmd.request_id,
            pack_id: self.current_pack,
            occurred_at: cmd.occurred_at,
        })])
    }
}
