use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use packloop_core::{Aggregate, AggregateId, AggregateRoot, DomainError, ValueObject};
use packloop_events::Event;
use packloop_parties::BuyerId;

/// Pack storage identifier, derived from the pack key.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackId(pub AggregateId);

impl PackId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PackId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// How packs are keyed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackKeying {
    /// One pack per buyer per calendar day.
    #[default]
    PerBuyerPerDay,
    /// One pack per buyer, reactivated indefinitely (legacy data layout).
    PerBuyer,
}

/// Natural key of a pack under a given keying policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PackKey {
    pub buyer_code: String,
    /// `None` under `PackKeying::PerBuyer`.
    pub issue_date: Option<NaiveDate>,
}

impl ValueObject for PackKey {}

impl PackKey {
    pub fn new(keying: PackKeying, buyer_code: impl Into<String>, date: NaiveDate) -> Self {
        let issue_date = match keying {
            PackKeying::PerBuyerPerDay => Some(date),
            PackKeying::PerBuyer => None,
        };
        Self {
            buyer_code: buyer_code.into(),
            issue_date,
        }
    }

    /// Deterministic storage id: every writer with the same key hits the same
    /// stream.
    pub fn pack_id(&self) -> PackId {
        let key = match self.issue_date {
            Some(date) => format!("{}-{}", self.buyer_code, date.format("%Y-%m-%d")),
            None => self.buyer_code.clone(),
        };
        PackId::new(AggregateId::from_key("packs.pack", &key))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackStatus {
    Active,
    Returned,
}

/// Aggregate root: Pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pack {
    id: PackId,
    buyer_id: Option<BuyerId>,
    buyer_code: String,
    buyer_name: String,
    organization: String,
    issue_date: Option<NaiveDate>,
    status: PackStatus,
    last_order: Option<AggregateId>,
    /// Return requests that retired this pack.
    returned_by: Vec<AggregateId>,
    version: u64,
    created: bool,
}

impl Pack {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: PackId) -> Self {
        Self {
            id,
            buyer_id: None,
            buyer_code: String::new(),
            buyer_name: String::new(),
            organization: String::new(),
            issue_date: None,
            status: PackStatus::Active,
            last_order: None,
            returned_by: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PackId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    /// Display id: `{buyerCode}-{issueDate}`.
    pub fn display_id(&self) -> String {
        match self.issue_date {
            Some(date) => format!("{}-{}", self.buyer_code, date.format("%Y-%m-%d")),
            None => self.buyer_code.clone(),
        }
    }

    pub fn buyer_id(&self) -> Option<BuyerId> {
        self.buyer_id
    }

    pub fn buyer_code(&self) -> &str {
        &self.buyer_code
    }

    /// Buyer name as it was when the pack was issued.
    pub fn buyer_name(&self) -> &str {
        &self.buyer_name
    }

    pub fn organization(&self) -> &str {
        &self.organization
    }

    pub fn issue_date(&self) -> Option<NaiveDate> {
        self.issue_date
    }

    pub fn status(&self) -> PackStatus {
        self.status
    }

    /// The order that last issued or reactivated this pack.
    pub fn last_order(&self) -> Option<AggregateId> {
        self.last_order
    }
}

impl AggregateRoot for Pack {
    type Id = PackId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: IssuePack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuePack {
    pub pack_id: PackId,
    pub buyer_id: BuyerId,
    pub buyer_code: String,
    pub buyer_name: String,
    pub organization: String,
    pub issue_date: NaiveDate,
    pub order_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReactivatePack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactivatePack {
    pub pack_id: PackId,
    pub order_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkPackReturned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkPackReturned {
    pub pack_id: PackId,
    pub request_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackCommand {
    IssuePack(IssuePack),
    ReactivatePack(ReactivatePack),
    MarkPackReturned(MarkPackReturned),
}

/// Event: PackIssued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackIssued {
    pub pack_id: PackId,
    pub buyer_id: BuyerId,
    pub buyer_code: String,
    pub buyer_name: String,
    pub organization: String,
    pub issue_date: NaiveDate,
    pub order_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PackReactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackReactivated {
    pub pack_id: PackId,
    pub previous_status: PackStatus,
    pub order_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PackReturned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackReturned {
    pub pack_id: PackId,
    pub request_id: AggregateId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PackEvent {
    PackIssued(PackIssued),
    PackReactivated(PackReactivated),
    PackReturned(PackReturned),
}

impl Event for PackEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PackEvent::PackIssued(_) => "packs.pack.issued",
            PackEvent::PackReactivated(_) => "packs.pack.reactivated",
            PackEvent::PackReturned(_) => "packs.pack.returned",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PackEvent::PackIssued(e) => e.occurred_at,
            PackEvent::PackReactivated(e) => e.occurred_at,
            PackEvent::PackReturned(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Pack {
    type Command = PackCommand;
    type Event = PackEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PackEvent::PackIssued(e) => {
                self.id = e.pack_id;
                self.buyer_id = Some(e.buyer_id);
                self.buyer_code = e.buyer_code.clone();
                self.buyer_name = e.buyer_name.clone();
                self.organization = e.organization.clone();
                self.issue_date = Some(e.issue_date);
                self.status = PackStatus::Active;
                self.last_order = Some(e.order_id);
                self.created = true;
            }
            PackEvent::PackReactivated(e) => {
                self.status = PackStatus::Active;
                self.last_order = Some(e.order_id);
            }
            PackEvent::PackReturned(e) => {
                self.status = PackStatus::Returned;
                self.returned_by.push(e.request_id);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PackCommand::IssuePack(cmd) => self.handle_issue(cmd),
            PackCommand::ReactivatePack(cmd) => self.handle_reactivate(cmd),
            PackCommand::MarkPackReturned(cmd) => self.handle_returned(cmd),
        }
    }
}

impl Pack {
    fn ensure_created(&self, pack_id: PackId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.id != pack_id {
            return Err(DomainError::invariant("pack_id mismatch"));
        }
        Ok(())
    }

    fn handle_issue(&self, cmd: &IssuePack) -> Result<Vec<PackEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("pack already issued"));
        }
        if cmd.buyer_code.trim().is_empty() {
            return Err(DomainError::validation("buyer code cannot be empty"));
        }

        Ok(vec![PackEvent::PackIssued(PackIssued {
            pack_id: cmd.pack_id,
            buyer_id: cmd.buyer_id,
            buyer_code: cmd.buyer_code.clone(),
            buyer_name: cmd.buyer_name.clone(),
            organization: cmd.organization.clone(),
            issue_date: cmd.issue_date,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Reactivation always lands on `active`, whatever the prior status.
    fn handle_reactivate(&self, cmd: &ReactivatePack) -> Result<Vec<PackEvent>, DomainError> {
        self.ensure_created(cmd.pack_id)?;

        Ok(vec![PackEvent::PackReactivated(PackReactivated {
            pack_id: cmd.pack_id,
            previous_status: self.status,
            order_id: cmd.order_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_returned(&self, cmd: &MarkPackReturned) -> Result<Vec<PackEvent>, DomainError> {
        self.ensure_created(cmd.pack_id)?;
        // A request retires the pack once, even if it was reactivated since.
        if self.status == PackStatus::Returned || self.returned_by.contains(&cmd.request_id) {
            return Ok(vec![]);
        }

        Ok(vec![PackEvent::PackReturned(PackReturned {
            pack_id: cmd.pack_id,
            request_id: cmd.request_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packloop_events::execute;
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    fn issued_pack(key: &PackKey, date: NaiveDate) -> Pack {
        let pack_id = key.pack_id();
        let mut pack = Pack::empty(pack_id);
        let cmd = IssuePack {
            pack_id,
            buyer_id: BuyerId::new(AggregateId::new()),
            buyer_code: key.buyer_code.clone(),
            buyer_name: "Ama Mensah".to_string(),
            organization: "Harbour Logistics".to_string(),
            issue_date: date,
            order_id: AggregateId::new(),
            occurred_at: test_time(),
        };
        execute(&mut pack, &PackCommand::IssuePack(cmd)).unwrap();
        pack
    }

    #[test]
    fn per_day_keys_differ_across_days() {
        let monday = PackKey::new(PackKeying::PerBuyerPerDay, "AMA-204", day(19));
        let tuesday = PackKey::new(PackKeying::PerBuyerPerDay, "AMA-204", day(20));
        let monday_again = PackKey::new(PackKeying::PerBuyerPerDay, "AMA-204", day(19));

        assert_ne!(monday.pack_id(), tuesday.pack_id());
        assert_eq!(monday.pack_id(), monday_again.pack_id());
    }

    #[test]
    fn per_buyer_keys_ignore_the_date() {
        let a = PackKey::new(PackKeying::PerBuyer, "AMA-204", day(19));
        let b = PackKey::new(PackKeying::PerBuyer, "AMA-204", day(20));
        assert_eq!(a.pack_id(), b.pack_id());
    }

    #[test]
    fn issued_pack_exposes_composite_display_id() {
        let key = PackKey::new(PackKeying::PerBuyerPerDay, "AMA-204", day(18));
        let pack = issued_pack(&key, day(18));

        assert_eq!(pack.display_id(), "AMA-204-2026-10-18");
        assert_eq!(pack.status(), PackStatus::Active);
        assert_eq!(pack.buyer_name(), "Ama Mensah");
    }

    #[test]
    fn second_issue_on_same_key_conflicts() {
        let key = PackKey::new(PackKeying::PerBuyerPerDay, "AMA-204", day(18));
        let pack = issued_pack(&key, day(18));
        let cmd = IssuePack {
            pack_id: key.pack_id(),
            buyer_id: BuyerId::new(AggregateId::new()),
            buyer_code: "AMA-204".to_string(),
            buyer_name: "Ama Mensah".to_string(),
            organization: "Harbour Logistics".to_string(),
            issue_date: day(18),
            order_id: AggregateId::new(),
            occurred_at: test_time(),
        };

        let err = pack.handle(&PackCommand::IssuePack(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn reactivation_overwrites_returned_status() {
        let key = PackKey::new(PackKeying::PerBuyer, "AMA-204", day(18));
        let mut pack = issued_pack(&key, day(18));

        let returned = MarkPackReturned {
            pack_id: pack.id_typed(),
            request_id: AggregateId::new(),
            occurred_at: test_time(),
        };
        execute(&mut pack, &PackCommand::MarkPackReturned(returned)).unwrap();
        assert_eq!(pack.status(), PackStatus::Returned);

        let order_id = AggregateId::new();
        let reactivate = ReactivatePack {
            pack_id: pack.id_typed(),
            order_id,
            occurred_at: test_time(),
        };
        let events = execute(&mut pack, &PackCommand::ReactivatePack(reactivate)).unwrap();

        match &events[0] {
            PackEvent::PackReactivated(e) => assert_eq!(e.previous_status, PackStatus::Returned),
            _ => panic!("Expected PackReactivated event"),
        }
        assert_eq!(pack.status(), PackStatus::Active);
        assert_eq!(pack.last_order(), Some(order_id));
        // Reactivation keeps the original issue period.
        assert_eq!(pack.display_id(), "AMA-204-2026-10-18");
    }

    #[test]
    fn marking_returned_twice_is_a_no_op() {
        let key = PackKey::new(PackKeying::PerBuyerPerDay, "AMA-204", day(18));
        let mut pack = issued_pack(&key, day(18));
        let cmd = MarkPackReturned {
            pack_id: pack.id_typed(),
            request_id: AggregateId::new(),
            occurred_at: test_time(),
        };

        execute(&mut pack, &PackCommand::MarkPackReturned(cmd.clone())).unwrap();
        let events = execute(&mut pack, &PackCommand::MarkPackReturned(cmd)).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn replayed_return_does_not_retire_a_reactivated_pack() {
        let key = PackKey::new(PackKeying::PerBuyer, "AMA-204", day(18));
        let mut pack = issued_pack(&key, day(18));
        let returned = MarkPackReturned {
            pack_id: pack.id_typed(),
            request_id: AggregateId::new(),
            occurred_at: test_time(),
        };
        execute(&mut pack, &PackCommand::MarkPackReturned(returned.clone())).unwrap();

        let reactivate = ReactivatePack {
            pack_id: pack.id_typed(),
            order_id: AggregateId::new(),
            occurred_at: test_time(),
        };
        execute(&mut pack, &PackCommand::ReactivatePack(reactivate)).unwrap();

        let events = execute(&mut pack, &PackCommand::MarkPackReturned(returned)).unwrap();
        assert!(events.is_empty());
        assert_eq!(pack.status(), PackStatus::Active);
    }

    #[test]
    fn reactivating_missing_pack_is_not_found() {
        let key = PackKey::new(PackKeying::PerBuyerPerDay, "AMA-204", day(18));
        let pack = Pack::empty(key.pack_id());
        let cmd = ReactivatePack {
            pack_id: key.pack_id(),
            order_id: AggregateId::new(),
            occurred_at: test_time(),
        };

        let err = pack.handle(&PackCommand::ReactivatePack(cmd)).unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: for a given buyer, per-day keys collide exactly when the
        /// dates are equal.
        #[test]
        fn per_day_key_identity_tracks_the_date(
            code in "[A-Z]{3}-[0-9]{3}",
            a in 0u32..365,
            b in 0u32..365,
        ) {
            let base = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
            let da = base + chrono::Duration::days(i64::from(a));
            let db = base + chrono::Duration::days(i64::from(b));

            let ka = PackKey::new(PackKeying::PerBuyerPerDay, code.clone(), da);
            let kb = PackKey::new(PackKeying::PerBuyerPerDay, code, db);
            prop_assert_eq!(ka.pack_id() == kb.pack_id(), a == b);
        }
    }
}
