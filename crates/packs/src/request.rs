use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use packloop_core::{ActorId, Aggregate, AggregateId, AggregateRoot, DomainError};
use packloop_events::Event;
use packloop_parties::BuyerId;

/// Return request identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackRequestId(pub AggregateId);

impl PackRequestId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PackRequestId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackRequestStatus {
    Pending,
    Approved,
    Rejected,
}

impl PackRequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            PackRequestStatus::Pending => "Pending",
            PackRequestStatus::Approved => "Approved",
            PackRequestStatus::Rejected => "Rejected",
        }
    }
}

/// Staff decision on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolveAction {
    Approve,
    Reject,
}

impl FromStr for ResolveAction {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(ResolveAction::Approve),
            "reject" => Ok(ResolveAction::Reject),
            other => Err(DomainError::validation(format!("unknown action {other:?}"))),
        }
    }
}

/// Aggregate root: PackRequest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackRequest {
    id: PackRequestId,
    buyer_id: Option<BuyerId>,
    code: String,
    status: PackRequestStatus,
    submitted_at: Option<DateTime<Utc>>,
    resolved_by: Option<ActorId>,
    resolved_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl PackRequest {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PackRequestId) -> Self {
        Self {
            id,
            buyer_id: None,
            code: String::new(),
            status: PackRequestStatus::Pending,
            submitted_at: None,
            resolved_by: None,
            resolved_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PackRequestId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn buyer_id(&self) -> Option<BuyerId> {
        self.buyer_id
    }

    /// The buyer code as claimed when the request was submitted.
    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn status(&self) -> PackRequestStatus {
        self.status
    }

    pub fn submitted_at(&self) -> Option<DateTime<Utc>> {
        self.submitted_at
    }

    pub fn resolved_by(&self) -> Option<ActorId> {
        self.resolved_by
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }
}

impl AggregateRoot for PackRequest {
    type Id = PackRequestId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: SubmitPackRequest. Code verification happens before this is issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitPackRequest {
    pub request_id: PackRequestId,
    pub buyer_id: BuyerId,
    pub code: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApprovePackRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovePackRequest {
    pub request_id: PackRequestId,
    pub resolved_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RejectPackRequest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectPackRequest {
    pub request_id: PackRequestId,
    pub resolved_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackRequestCommand {
    SubmitPackRequest(SubmitPackRequest),
    ApprovePackRequest(ApprovePackRequest),
    RejectPackRequest(RejectPackRequest),
}

impl PackRequestCommand {
    /// Build the resolution command matching a staff action.
    pub fn resolve(
        action: ResolveAction,
        request_id: PackRequestId,
        resolved_by: ActorId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        match action {
            ResolveAction::Approve => PackRequestCommand::ApprovePackRequest(ApprovePackRequest {
                request_id,
                resolved_by,
                occurred_at,
            }),
            ResolveAction::Reject => PackRequestCommand::RejectPackRequest(RejectPackRequest {
                request_id,
                resolved_by,
                occurred_at,
            }),
        }
    }
}

/// Event: PackRequestSubmitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackRequestSubmitted {
    pub request_id: PackRequestId,
    pub buyer_id: BuyerId,
    pub code: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PackRequestApproved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackRequestApproved {
    pub request_id: PackRequestId,
    pub buyer_id: BuyerId,
    pub resolved_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PackRequestRejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackRequestRejected {
    pub request_id: PackRequestId,
    pub buyer_id: BuyerId,
    pub resolved_by: ActorId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackRequestEvent {
    PackRequestSubmitted(PackRequestSubmitted),
    PackRequestApproved(PackRequestApproved),
    PackRequestRejected(PackRequestRejected),
}

impl Event for PackRequestEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PackRequestEvent::PackRequestSubmitted(_) => "packs.request.submitted",
            PackRequestEvent::PackRequestApproved(_) => "packs.request.approved",
            PackRequestEvent::PackRequestRejected(_) => "packs.request.rejected",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PackRequestEvent::PackRequestSubmitted(e) => e.occurred_at,
            PackRequestEvent::PackRequestApproved(e) => e.occurred_at,
            PackRequestEvent::PackRequestRejected(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PackRequest {
    type Command = PackRequestCommand;
    type Event = PackRequestEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PackRequestEvent::PackRequestSubmitted(e) => {
                self.id = e.request_id;
                self.buyer_id = Some(e.buyer_id);
                self.code = e.code.clone();
                self.status = PackRequestStatus::Pending;
                self.submitted_at = Some(e.occurred_at);
                self.created = true;
            }
            PackRequestEvent::PackRequestApproved(e) => {
                self.status = PackRequestStatus::Approved;
                self.resolved_by = Some(e.resolved_by);
                self.resolved_at = Some(e.occurred_at);
            }
            PackRequestEvent::PackRequestRejected(e) => {
                self.status = PackRequestStatus::Rejected;
                self.resolved_by = Some(e.resolved_by);
                self.resolved_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PackRequestCommand::SubmitPackRequest(cmd) => self.handle_submit(cmd),
            PackRequestCommand::ApprovePackRequest(cmd) => {
                let buyer_id = self.ensure_pending(cmd.request_id)?;
                Ok(vec![PackRequestEvent::PackRequestApproved(
                    PackRequestApproved {
                        request_id: cmd.request_id,
                        buyer_id,
                        resolved_by: cmd.resolved_by,
                        occurred_at: cmd.occurred_at,
                    },
                )])
            }
            PackRequestCommand::RejectPackRequest(cmd) => {
                let buyer_id = self.ensure_pending(cmd.request_id)?;
                Ok(vec![PackRequestEvent::PackRequestRejected(
                    PackRequestRejected {
                        request_id: cmd.request_id,
                        buyer_id,
                        resolved_by: cmd.resolved_by,
                        occurred_at: cmd.occurred_at,
                    },
                )])
            }
        }
    }
}

impl PackRequest {
    fn handle_submit(&self, cmd: &SubmitPackRequest) -> Result<Vec<PackRequestEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("request already submitted"));
        }
        if cmd.code.trim().is_empty() {
            return Err(DomainError::validation("code cannot be empty"));
        }

        Ok(vec![PackRequestEvent::PackRequestSubmitted(
            PackRequestSubmitted {
                request_id: cmd.request_id,
                buyer_id: cmd.buyer_id,
                code: cmd.code.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    /// Approve and reject share one guard: a resolved request is final.
    fn ensure_pending(&self, request_id: PackRequestId) -> Result<BuyerId, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != request_id {
            return Err(DomainError::invariant("request_id mismatch"));
        }
        if self.status != PackRequestStatus::Pending {
            return Err(DomainError::invalid_transition(format!(
                "request is already {}",
                self.status.as_str()
            )));
        }
        self.buyer_id
            .ok_or_else(|| DomainError::invariant("submitted request has no buyer"))
    }
}
