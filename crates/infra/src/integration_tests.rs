//! End-to-end tests for the order, pack and return workflows.
//!
//! Command → Ledger store → EventBus, through the wired-up `Packloop` core.
//!
//! Verifies:
//! - Vendor counters, packs and buyer loyalty fields follow order transitions
//! - Terminal states are final and counters never double-increment
//! - Concurrent completions leave exactly one pack per buyer and day
//! - Partial failures are surfaced and repaired by `reconcile`
//! - Concurrent approvals of one return request credit the buyer once

use std::collections::HashSet;
use std::sync::{Arc, Mutex, mpsc};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::Value as JsonValue;

use packloop_core::{ActorId, AggregateId, ExpectedVersion};
use packloop_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use packloop_orders::{CartLine, CatalogItem, ItemId, Order, OrderCode, OrderId, OrderStatus};
use packloop_packs::{PackKeying, PackRequestId, PackRequestStatus, PackStatus};
use packloop_parties::{Buyer, BuyerId, BuyerProfile, Vendor, VendorId};

use crate::config::PackloopConfig;
use crate::error::{ErrorKind, FulfillmentStep, ReturnStep, ServiceError};
use crate::event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
use crate::external::{Clock, FixedClock, InMemoryCatalog};
use crate::read_model::{InMemoryOrderCodeIndex, OrderCodeIndex};
use crate::services::{Packloop, PlaceOrderRequest};

type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Core = Packloop<Arc<FlakyStore>, Bus>;

fn test_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 9, 30, 0).unwrap()
}

fn test_staff() -> ActorId {
    ActorId::new()
}

/// In-memory store that can be told to fail appends for one aggregate type,
/// or to report one lost version race on it.
#[derive(Default)]
struct FlakyStore {
    inner: InMemoryEventStore,
    failing: Mutex<Option<&'static str>>,
    lose_race: Mutex<Option<&'static str>>,
}

impl FlakyStore {
    fn fail_appends_to(&self, aggregate_type: Option<&'static str>) {
        *self.failing.lock().unwrap() = aggregate_type;
    }

    /// The next compare-and-swap append to `aggregate_type` fails as if
    /// another writer got there first.
    fn lose_next_race_on(&self, aggregate_type: &'static str) {
        *self.lose_race.lock().unwrap() = Some(aggregate_type);
    }
}

impl EventStore for FlakyStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let failing = *self.failing.lock().unwrap();
        if let (Some(kind), Some(first)) = (failing, events.first()) {
            if first.aggregate_type == kind {
                return Err(EventStoreError::Unavailable(format!("{kind} writes disabled")));
            }
        }

        if let (ExpectedVersion::Exact(_), Some(first)) = (expected_version, events.first()) {
            let mut lose_race = self.lose_race.lock().unwrap();
            if *lose_race == Some(first.aggregate_type.as_str()) {
                *lose_race = None;
                return Err(EventStoreError::Concurrency("another writer appended first".to_string()));
            }
        }

        self.inner.append(events, expected_version)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        self.inner.load_stream(aggregate_id)
    }
}

/// A clock the test can move forward.
struct TestClock(Mutex<DateTime<Utc>>);

impl TestClock {
    fn advance(&self, by: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

struct Fixture {
    core: Core,
    store: Arc<FlakyStore>,
    bus: Bus,
    catalog: Arc<InMemoryCatalog>,
    codes: Arc<InMemoryOrderCodeIndex>,
    clock: Arc<TestClock>,
}

fn setup() -> Fixture {
    setup_with(PackloopConfig::default())
}

fn setup_with(config: PackloopConfig) -> Fixture {
    packloop_observability::init_for_tests();

    let store = Arc::new(FlakyStore::default());
    let bus: Bus = Arc::new(InMemoryEventBus::new());
    let catalog = Arc::new(InMemoryCatalog::new());
    let codes = Arc::new(InMemoryOrderCodeIndex::new());
    let clock = Arc::new(TestClock(Mutex::new(test_time())));

    let core = Packloop::new(
        store.clone(),
        bus.clone(),
        catalog.clone(),
        codes.clone(),
        clock.clone(),
        &config,
    );

    Fixture {
        core,
        store,
        bus,
        catalog,
        codes,
        clock,
    }
}

impl Fixture {
    fn buyer(&self, code: &str) -> Buyer {
        self.core
            .registration
            .register_buyer(BuyerProfile {
                code: code.to_string(),
                first_name: "Ama".to_string(),
                last_name: "Mensah".to_string(),
                organization: "Harbour Logistics".to_string(),
            })
            .unwrap()
    }

    fn vendor(&self) -> Vendor {
        self.core
            .registration
            .register_vendor("V-001", "Mama's Kitchen")
            .unwrap()
    }

    fn item(&self, vendor_id: VendorId, unit_price: u64) -> CatalogItem {
        let item_id = ItemId::new(AggregateId::new());
        let item = CatalogItem {
            item_id,
            vendor_id,
            unit_price,
            image_ref: Some(format!("meals/{item_id}.jpg")),
        };
        self.catalog.upsert(item.clone());
        item
    }

    /// Place an order declaring the correct totals.
    fn place(&self, buyer_id: BuyerId, items: &[(&CatalogItem, u32)]) -> Result<Order, ServiceError> {
        let lines = items
            .iter()
            .map(|(item, quantity)| CartLine {
                item_id: item.item_id,
                quantity: *quantity,
            })
            .collect();
        let price = items.iter().map(|(i, q)| i.unit_price * u64::from(*q)).sum();
        let quantity = items.iter().map(|(_, q)| u64::from(*q)).sum();

        self.core.placement.place_order(PlaceOrderRequest {
            buyer_id,
            lines,
            declared_total_price: price,
            declared_total_quantity: quantity,
        })
    }

    /// Buyer with one completed order, holding an active pack.
    fn buyer_with_pack(&self, code: &str) -> Buyer {
        let buyer = self.buyer(code);
        let vendor = self.vendor();
        let meal = self.item(vendor.id_typed(), 800);
        let order = self.place(buyer.id_typed(), &[(&meal, 1)]).unwrap();
        self.core.fulfillment.complete(order.id_typed()).unwrap();
        self.core.buyer(buyer.id_typed()).unwrap()
    }

    fn event_count(&self, aggregate_id: AggregateId, event_type: &str) -> usize {
        self.store
            .load_stream(aggregate_id)
            .unwrap()
            .iter()
            .filter(|e| e.event_type == event_type)
            .count()
    }
}

fn published_types(sub: &Subscription<EventEnvelope<JsonValue>>) -> Vec<String> {
    sub.drain().iter().map(|e| e.event_type().to_string()).collect()
}

#[test]
fn completed_order_updates_vendor_pack_and_buyer() {
    let fx = setup();
    let sub = fx.bus.subscribe();
    let buyer = fx.buyer("AMA-204");
    let vendor = fx.vendor();
    let jollof = fx.item(vendor.id_typed(), 500);
    let banku = fx.item(vendor.id_typed(), 1000);

    let order = fx
        .place(buyer.id_typed(), &[(&jollof, 1), (&banku, 1)])
        .unwrap();
    assert_eq!(order.status(), OrderStatus::Placed);
    assert_eq!(order.total_price(), 1500);
    assert_eq!(order.total_quantity(), 2);
    assert_eq!(order.vendor_id(), Some(vendor.id_typed()));
    assert_eq!(order.cover_image(), jollof.image_ref.as_deref());
    let code: &OrderCode = order.code().unwrap();
    assert_eq!(fx.codes.lookup(code), Some(order.id_typed()));

    let outcome = fx.core.fulfillment.complete(order.id_typed()).unwrap();

    assert_eq!(outcome.order.status(), OrderStatus::Completed);
    assert_eq!(outcome.vendor_stats.completed_orders, 1);
    assert_eq!(outcome.vendor_stats.total_sales, 1500);
    assert_eq!(outcome.vendor_stats.total_amount, 1500);
    assert_eq!(outcome.pack.display_id(), "AMA-204-2026-10-18");
    assert_eq!(outcome.pack.status(), PackStatus::Active);
    assert_eq!(outcome.pack.buyer_name(), "Ama Mensah");
    assert_eq!(outcome.pack.organization(), "Harbour Logistics");

    let buyer = fx.core.buyer(buyer.id_typed()).unwrap();
    assert_eq!(buyer.active_pack_count(), 1);
    assert_eq!(buyer.current_pack(), Some(outcome.pack.id_typed().0));
    assert_eq!(buyer.orders(), &[order.id_typed().0]);

    let vendor = fx.core.vendor(vendor.id_typed()).unwrap();
    assert_eq!(vendor.stats().completed_orders, 1);
    assert_eq!(vendor.orders(), &[order.id_typed().0]);

    let types = published_types(&sub);
    assert!(types.contains(&"orders.order.placed".to_string()));
    assert!(types.contains(&"orders.order.completed".to_string()));
    assert!(types.contains(&"packs.pack.issued".to_string()));
}

#[test]
fn packs_carry_the_current_buyer_profile() {
    let fx = setup();
    let buyer = fx.buyer("AMA-204");
    let updated = fx
        .core
        .registration
        .update_buyer_profile(buyer.id_typed(), "Ama", "Owusu", "Tema Port Works")
        .unwrap();
    assert_eq!(updated.code(), Some("AMA-204"));

    let vendor = fx.vendor();
    let meal = fx.item(vendor.id_typed(), 700);
    let order = fx.place(buyer.id_typed(), &[(&meal, 1)]).unwrap();
    let pack = fx.core.fulfillment.complete(order.id_typed()).unwrap().pack;

    assert_eq!(pack.buyer_name(), "Ama Owusu");
    assert_eq!(pack.organization(), "Tema Port Works");
    assert_eq!(pack.buyer_code(), "AMA-204");

    // Packs snapshot the profile at issue time.
    fx.core
        .registration
        .update_buyer_profile(buyer.id_typed(), "Ama", "Boateng", "Accra Freight")
        .unwrap();
    let issued = fx.core.pack(pack.id_typed()).unwrap();
    assert_eq!(issued.buyer_name(), "Ama Owusu");
    assert_eq!(issued.organization(), "Tema Port Works");

    let err = fx
        .core
        .registration
        .update_buyer_profile(BuyerId::new(AggregateId::new()), "A", "B", "C")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn completing_twice_counts_once() {
    let fx = setup();
    let buyer = fx.buyer("AMA-204");
    let vendor = fx.vendor();
    let meal = fx.item(vendor.id_typed(), 750);
    let order = fx.place(buyer.id_typed(), &[(&meal, 2)]).unwrap();

    fx.core.fulfillment.complete(order.id_typed()).unwrap();
    let err = fx.core.fulfillment.complete(order.id_typed()).unwrap_err();

    assert_eq!(err.code(), "invalid_state_transition");
    assert_eq!(err.kind(), ErrorKind::StateConflict);
    let stats = fx.core.vendor(vendor.id_typed()).unwrap().stats();
    assert_eq!(stats.completed_orders, 1);
    assert_eq!(stats.total_sales, 1500);
}

#[test]
fn terminal_orders_reject_every_transition() {
    let fx = setup();
    let buyer = fx.buyer("AMA-204");
    let vendor = fx.vendor();
    let meal = fx.item(vendor.id_typed(), 300);
    let order = fx.place(buyer.id_typed(), &[(&meal, 1)]).unwrap();

    let cancelled = fx.core.fulfillment.cancel(order.id_typed()).unwrap();
    assert_eq!(cancelled.status(), OrderStatus::Cancelled);

    let again = fx.core.fulfillment.cancel(order.id_typed()).unwrap_err();
    assert!(matches!(again, ServiceError::InvalidStateTransition(_)));
    let complete = fx.core.fulfillment.complete(order.id_typed()).unwrap_err();
    assert!(matches!(complete, ServiceError::InvalidStateTransition(_)));

    let stats = fx.core.vendor(vendor.id_typed()).unwrap().stats();
    assert_eq!(stats.canceled_orders, 1);
    assert_eq!(stats.completed_orders, 0);
    assert_eq!(stats.total_sales, 0);

    // Cancellation has no pack effects.
    let buyer = fx.core.buyer(buyer.id_typed()).unwrap();
    assert_eq!(buyer.active_pack_count(), 0);
    assert!(buyer.current_pack().is_none());
}

#[test]
fn transitions_on_unknown_orders_are_not_found() {
    let fx = setup();
    let unknown = OrderId::new(AggregateId::new());

    let err = fx.core.fulfillment.complete(unknown).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = fx.core.fulfillment.cancel(unknown).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = fx.core.fulfillment.reconcile(unknown).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn cross_vendor_cart_is_rejected_before_anything_is_written() {
    let fx = setup();
    let buyer = fx.buyer("AMA-204");
    let first = fx.vendor();
    let second = fx.vendor();
    let a = fx.item(first.id_typed(), 500);
    let b = fx.item(second.id_typed(), 500);
    let streams_before = fx.store.inner.stream_count();

    let err = fx.place(buyer.id_typed(), &[(&a, 1), (&b, 1)]).unwrap_err();

    match &err {
        ServiceError::CrossVendorCart { expected, found } => {
            assert_eq!(*expected, first.id_typed());
            assert_eq!(*found, second.id_typed());
        }
        other => panic!("Expected CrossVendorCart, got {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::ConsistencyViolation);
    assert_eq!(fx.store.inner.stream_count(), streams_before);
    assert!(fx.codes.is_empty());
}

#[test]
fn declared_totals_must_match_catalog_prices() {
    let fx = setup();
    let buyer = fx.buyer("AMA-204");
    let vendor = fx.vendor();
    let meal = fx.item(vendor.id_typed(), 500);

    let err = fx
        .core
        .placement
        .place_order(PlaceOrderRequest {
            buyer_id: buyer.id_typed(),
            lines: vec![CartLine {
                item_id: meal.item_id,
                quantity: 3,
            }],
            declared_total_price: 1400,
            declared_total_quantity: 3,
        })
        .unwrap_err();

    match err {
        ServiceError::PriceMismatch {
            declared_price,
            computed_price,
            ..
        } => {
            assert_eq!(declared_price, 1400);
            assert_eq!(computed_price, 1500);
        }
        other => panic!("Expected PriceMismatch, got {other:?}"),
    }
}

#[test]
fn placement_input_errors() {
    let fx = setup();
    let buyer = fx.buyer("AMA-204");
    let vendor = fx.vendor();
    let meal = fx.item(vendor.id_typed(), 500);
    let unknown_item = CatalogItem {
        item_id: ItemId::new(AggregateId::new()),
        vendor_id: vendor.id_typed(),
        unit_price: 500,
        image_ref: None,
    };

    let err = fx.place(buyer.id_typed(), &[]).unwrap_err();
    assert_eq!(err.code(), "no_items");

    let err = fx.place(buyer.id_typed(), &[(&meal, 0)]).unwrap_err();
    assert_eq!(err.code(), "validation");

    let err = fx.place(buyer.id_typed(), &[(&meal, 1), (&unknown_item, 1)]).unwrap_err();
    assert!(matches!(err, ServiceError::ItemNotFound { item_id } if item_id == unknown_item.item_id));

    let err = fx.place(BuyerId::new(AggregateId::new()), &[(&meal, 1)]).unwrap_err();
    assert!(matches!(err, ServiceError::NotFound("buyer")));
}

#[test]
fn unregistered_vendor_is_not_found() {
    let fx = setup();
    let buyer = fx.buyer("AMA-204");
    let ghost = fx.item(VendorId::new(AggregateId::new()), 500);

    let err = fx.place(buyer.id_typed(), &[(&ghost, 1)]).unwrap_err();
    assert!(matches!(err, ServiceError::NotFound("vendor")));
    assert!(fx.codes.is_empty());
}

#[test]
fn order_codes_are_unique() {
    let fx = setup();
    fx.core.placement.seed_codes(42);
    let buyer = fx.buyer("AMA-204");
    let vendor = fx.vendor();
    let meal = fx.item(vendor.id_typed(), 100);

    let codes: HashSet<String> = (0..50)
        .map(|_| {
            let order = fx.place(buyer.id_typed(), &[(&meal, 1)]).unwrap();
            order.code().unwrap().as_str().to_string()
        })
        .collect();

    assert_eq!(codes.len(), 50);
    assert_eq!(fx.codes.len(), 50);
    assert_eq!(fx.core.buyer(buyer.id_typed()).unwrap().orders().len(), 50);
}

/// Index where every code is already taken.
struct FullIndex;

impl OrderCodeIndex for FullIndex {
    fn reserve(&self, _code: &OrderCode, _order_id: OrderId) -> bool {
        false
    }

    fn release(&self, _code: &OrderCode, _order_id: OrderId) {}

    fn lookup(&self, _code: &OrderCode) -> Option<OrderId> {
        None
    }
}

#[test]
fn order_code_space_exhaustion_fails_placement() {
    packloop_observability::init_for_tests();
    let store = Arc::new(InMemoryEventStore::new());
    let catalog = Arc::new(InMemoryCatalog::new());
    let config = PackloopConfig {
        order_code_max_attempts: 3,
        ..PackloopConfig::default()
    };
    let core = Packloop::new(
        store.clone(),
        Arc::new(InMemoryEventBus::<EventEnvelope<JsonValue>>::new()),
        catalog.clone(),
        Arc::new(FullIndex),
        Arc::new(FixedClock(test_time())),
        &config,
    );

    let buyer = core
        .registration
        .register_buyer(BuyerProfile {
            code: "AMA-204".to_string(),
            first_name: "Ama".to_string(),
            last_name: "Mensah".to_string(),
            organization: "Harbour Logistics".to_string(),
        })
        .unwrap();
    let vendor = core.registration.register_vendor("V-001", "Mama's Kitchen").unwrap();
    let item_id = ItemId::new(AggregateId::new());
    catalog.upsert(CatalogItem {
        item_id,
        vendor_id: vendor.id_typed(),
        unit_price: 500,
        image_ref: None,
    });

    let err = core
        .placement
        .place_order(PlaceOrderRequest {
            buyer_id: buyer.id_typed(),
            lines: vec![CartLine { item_id, quantity: 1 }],
            declared_total_price: 500,
            declared_total_quantity: 1,
        })
        .unwrap_err();

    assert!(matches!(err, ServiceError::OrderCodeExhausted { attempts: 3 }));
    // Only the buyer and vendor streams exist.
    assert_eq!(store.stream_count(), 2);
}

#[test]
fn concurrent_same_day_completions_yield_one_pack() {
    let fx = setup();
    let buyer = fx.buyer("AMA-204");
    let vendor = fx.vendor();
    let meal = fx.item(vendor.id_typed(), 400);
    let orders: Vec<Order> = (0..4)
        .map(|_| fx.place(buyer.id_typed(), &[(&meal, 1)]).unwrap())
        .collect();

    let outcomes: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = orders
            .iter()
            .map(|order| {
                let core = &fx.core;
                let order_id = order.id_typed();
                s.spawn(move || core.fulfillment.complete(order_id))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let pack_ids: HashSet<_> = outcomes
        .iter()
        .map(|r| r.as_ref().unwrap().pack.id_typed())
        .collect();
    assert_eq!(pack_ids.len(), 1);

    let pack_id = *pack_ids.iter().next().unwrap();
    assert_eq!(fx.event_count(pack_id.0, "packs.pack.issued"), 1);
    assert_eq!(fx.core.pack(pack_id).unwrap().status(), PackStatus::Active);

    let buyer = fx.core.buyer(buyer.id_typed()).unwrap();
    assert_eq!(buyer.active_pack_count(), 1);

    let stats = fx.core.vendor(vendor.id_typed()).unwrap().stats();
    assert_eq!(stats.completed_orders, 4);
    assert_eq!(stats.total_sales, 1600);
}

#[test]
fn concurrent_completions_of_one_order_have_one_winner() {
    let fx = setup();
    let buyer = fx.buyer("AMA-204");
    let vendor = fx.vendor();
    let meal = fx.item(vendor.id_typed(), 650);
    let order_id = fx.place(buyer.id_typed(), &[(&meal, 1)]).unwrap().id_typed();

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let core = &fx.core;
                s.spawn(move || core.fulfillment.complete(order_id))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1);
    for loser in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_eq!(loser.kind(), ErrorKind::StateConflict);
    }
    let stats = fx.core.vendor(vendor.id_typed()).unwrap().stats();
    assert_eq!(stats.completed_orders, 1);
    assert_eq!(stats.total_sales, 650);
}

#[test]
fn per_day_keying_issues_a_new_pack_each_day() {
    let fx = setup();
    let buyer = fx.buyer("AMA-204");
    let vendor = fx.vendor();
    let meal = fx.item(vendor.id_typed(), 400);

    let first = fx.place(buyer.id_typed(), &[(&meal, 1)]).unwrap();
    let day_one = fx.core.fulfillment.complete(first.id_typed()).unwrap().pack;

    fx.clock.advance(Duration::days(1));
    let second = fx.place(buyer.id_typed(), &[(&meal, 1)]).unwrap();
    let day_two = fx.core.fulfillment.complete(second.id_typed()).unwrap().pack;

    assert_ne!(day_one.id_typed(), day_two.id_typed());
    assert_eq!(day_two.display_id(), "AMA-204-2026-10-19");
    let buyer = fx.core.buyer(buyer.id_typed()).unwrap();
    assert_eq!(buyer.current_pack(), Some(day_two.id_typed().0));
    // Preserved rule: the count only ever moves from 0 to 1.
    assert_eq!(buyer.active_pack_count(), 1);
}

#[test]
fn per_buyer_keying_reactivates_the_same_pack() {
    let fx = setup_with(PackloopConfig {
        pack_keying: PackKeying::PerBuyer,
        ..PackloopConfig::default()
    });
    let buyer = fx.buyer_with_pack("AMA-204");
    let first_pack = buyer.current_pack().unwrap();

    // Return it, then order again the next day.
    let request = fx.core.returns.submit(buyer.id_typed(), "AMA-204").unwrap();
    fx.core
        .returns
        .resolve(request.id_typed(), "approve", test_staff())
        .unwrap();
    let key = fx.core.packs.key_for("AMA-204", test_time().date_naive());
    assert_eq!(fx.core.packs.find(&key).unwrap().unwrap().status(), PackStatus::Returned);

    fx.clock.advance(Duration::days(1));
    let vendor = fx.vendor();
    let meal = fx.item(vendor.id_typed(), 400);
    let order = fx.place(buyer.id_typed(), &[(&meal, 1)]).unwrap();
    let pack = fx.core.fulfillment.complete(order.id_typed()).unwrap().pack;

    assert_eq!(pack.id_typed().0, first_pack);
    assert_eq!(pack.status(), PackStatus::Active);
    assert_eq!(fx.event_count(first_pack, "packs.pack.issued"), 1);
    assert_eq!(fx.event_count(first_pack, "packs.pack.reactivated"), 1);
}

#[test]
fn approving_a_return_rewards_the_buyer_and_retires_the_pack() {
    let fx = setup();
    let buyer = fx.buyer_with_pack("AMA-204");
    let pack_id = buyer.current_pack().unwrap();
    let staff = test_staff();

    let request = fx.core.returns.submit(buyer.id_typed(), "AMA-204").unwrap();
    assert_eq!(request.status(), PackRequestStatus::Pending);
    assert_eq!(
        fx.core.buyer(buyer.id_typed()).unwrap().pending_request(),
        Some(request.id_typed().0)
    );

    let resolved = fx
        .core
        .returns
        .resolve(request.id_typed(), "approve", staff)
        .unwrap();
    assert_eq!(resolved.status(), PackRequestStatus::Approved);
    assert_eq!(resolved.resolved_by(), Some(staff));
    assert_eq!(resolved.resolved_at(), Some(test_time()));

    let buyer = fx.core.buyer(buyer.id_typed()).unwrap();
    assert_eq!(buyer.returned_pack_count(), 1);
    assert_eq!(buyer.points(), 2);
    assert_eq!(buyer.money_balance(), 100);
    assert!(buyer.pending_request().is_none());
    assert!(buyer.current_pack().is_none());

    let pack = fx.core.pack(packloop_packs::PackId::new(pack_id)).unwrap();
    assert_eq!(pack.status(), PackStatus::Returned);
}

#[test]
fn resolving_a_resolved_request_changes_nothing() {
    let fx = setup();
    let buyer = fx.buyer_with_pack("AMA-204");
    let request = fx.core.returns.submit(buyer.id_typed(), "AMA-204").unwrap();
    fx.core
        .returns
        .resolve(request.id_typed(), "approve", test_staff())
        .unwrap();

    for action in ["approve", "reject"] {
        let err = fx
            .core
            .returns
            .resolve(request.id_typed(), action, test_staff())
            .unwrap_err();
        assert_eq!(err.code(), "invalid_or_already_processed");
    }

    let buyer = fx.core.buyer(buyer.id_typed()).unwrap();
    assert_eq!(buyer.returned_pack_count(), 1);
    assert_eq!(buyer.points(), 2);
    assert_eq!(
        fx.core.request(request.id_typed()).unwrap().status(),
        PackRequestStatus::Approved
    );
}

#[test]
fn rejecting_a_return_gives_no_reward_and_frees_the_slot() {
    let fx = setup();
    let buyer = fx.buyer_with_pack("AMA-204");
    let request = fx.core.returns.submit(buyer.id_typed(), "AMA-204").unwrap();

    let resolved = fx
        .core
        .returns
        .resolve(request.id_typed(), "reject", test_staff())
        .unwrap();
    assert_eq!(resolved.status(), PackRequestStatus::Rejected);

    let after = fx.core.buyer(buyer.id_typed()).unwrap();
    assert_eq!(after.returned_pack_count(), 0);
    assert_eq!(after.points(), 0);
    assert!(after.pending_request().is_none());
    assert_eq!(after.current_pack(), buyer.current_pack());

    // A new request may be opened once the previous one is closed.
    assert!(fx.core.returns.submit(buyer.id_typed(), "AMA-204").is_ok());
}

#[test]
fn rewards_accumulate_per_approved_return() {
    let fx = setup();
    let buyer = fx.buyer_with_pack("AMA-204");

    for _ in 0..2 {
        let request = fx.core.returns.submit(buyer.id_typed(), "AMA-204").unwrap();
        fx.core
            .returns
            .resolve(request.id_typed(), "approve", test_staff())
            .unwrap();
    }

    let buyer = fx.core.buyer(buyer.id_typed()).unwrap();
    assert_eq!(buyer.returned_pack_count(), 2);
    assert_eq!(buyer.points(), 4);
    assert_eq!(buyer.money_balance(), 200);
}

#[test]
fn wrong_code_creates_no_request() {
    let fx = setup();
    let buyer = fx.buyer("AMA-204");
    let sub = fx.bus.subscribe();
    let streams_before = fx.store.inner.stream_count();

    let err = fx.core.returns.submit(buyer.id_typed(), "AMA-205").unwrap_err();

    assert!(matches!(err, ServiceError::InvalidCode));
    assert_eq!(err.kind(), ErrorKind::ConsistencyViolation);

    for near_miss in [" AMA-204 ", "\tAMA-204\n", "ama-204", "AMA-204 "] {
        let err = fx.core.returns.submit(buyer.id_typed(), near_miss).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidCode), "{near_miss:?} was accepted");
    }
    assert_eq!(fx.store.inner.stream_count(), streams_before);
    assert!(sub.drain().is_empty());
    assert!(fx.core.buyer(buyer.id_typed()).unwrap().pending_request().is_none());
}

#[test]
fn submit_for_unknown_buyer_is_not_found() {
    let fx = setup();
    let err = fx
        .core
        .returns
        .submit(BuyerId::new(AggregateId::new()), "AMA-204")
        .unwrap_err();
    assert!(matches!(err, ServiceError::NotFound("buyer")));
}

#[test]
fn second_pending_request_is_rejected() {
    let fx = setup();
    let buyer = fx.buyer("AMA-204");
    fx.core.returns.submit(buyer.id_typed(), "AMA-204").unwrap();

    let err = fx.core.returns.submit(buyer.id_typed(), "AMA-204").unwrap_err();
    assert!(matches!(err, ServiceError::DuplicatePendingRequest));
}

#[test]
fn unknown_action_leaves_request_pending() {
    let fx = setup();
    let buyer = fx.buyer("AMA-204");
    let request = fx.core.returns.submit(buyer.id_typed(), "AMA-204").unwrap();

    let err = fx
        .core
        .returns
        .resolve(request.id_typed(), "archive", test_staff())
        .unwrap_err();

    assert!(matches!(err, ServiceError::InvalidAction(ref a) if a == "archive"));

    for near_miss in ["APPROVE", "Reject", " approve"] {
        let err = fx
            .core
            .returns
            .resolve(request.id_typed(), near_miss, test_staff())
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidAction(_)), "{near_miss:?} was accepted");
    }
    assert_eq!(
        fx.core.request(request.id_typed()).unwrap().status(),
        PackRequestStatus::Pending
    );
}

#[test]
fn resolving_an_unknown_request_is_invalid_or_already_processed() {
    let fx = setup();
    let err = fx
        .core
        .returns
        .resolve(PackRequestId::new(AggregateId::new()), "approve", test_staff())
        .unwrap_err();
    assert!(matches!(err, ServiceError::InvalidOrAlreadyProcessed));
}

#[test]
fn reconcile_repairs_a_partial_fulfillment() {
    let fx = setup();
    let buyer = fx.buyer("AMA-204");
    let vendor = fx.vendor();
    let meal = fx.item(vendor.id_typed(), 900);
    let order = fx.place(buyer.id_typed(), &[(&meal, 1)]).unwrap();

    fx.store.fail_appends_to(Some("packs.pack"));
    let err = fx.core.fulfillment.complete(order.id_typed()).unwrap_err();
    match &err {
        ServiceError::PartialFulfillment { order_id, step, .. } => {
            assert_eq!(*order_id, order.id_typed());
            assert_eq!(*step, FulfillmentStep::Pack);
        }
        other => panic!("Expected PartialFulfillment, got {other:?}"),
    }
    assert_eq!(err.kind(), ErrorKind::PartialFailure);

    // The transition itself stuck; the vendor step ran once.
    assert_eq!(fx.core.order(order.id_typed()).unwrap().status(), OrderStatus::Completed);
    assert_eq!(fx.core.vendor(vendor.id_typed()).unwrap().stats().completed_orders, 1);
    assert_eq!(fx.core.buyer(buyer.id_typed()).unwrap().active_pack_count(), 0);

    fx.store.fail_appends_to(None);
    fx.core.fulfillment.reconcile(order.id_typed()).unwrap();
    fx.core.fulfillment.reconcile(order.id_typed()).unwrap();

    let stats = fx.core.vendor(vendor.id_typed()).unwrap().stats();
    assert_eq!(stats.completed_orders, 1);
    assert_eq!(stats.total_sales, 900);
    let buyer = fx.core.buyer(buyer.id_typed()).unwrap();
    assert_eq!(buyer.active_pack_count(), 1);
    let pack_id = buyer.current_pack().unwrap();
    assert_eq!(fx.event_count(pack_id, "packs.pack.issued"), 1);
    assert_eq!(fx.event_count(pack_id, "packs.pack.reactivated"), 0);
}

#[test]
fn reconcile_of_a_placed_order_is_rejected() {
    let fx = setup();
    let buyer = fx.buyer("AMA-204");
    let vendor = fx.vendor();
    let meal = fx.item(vendor.id_typed(), 900);
    let order = fx.place(buyer.id_typed(), &[(&meal, 1)]).unwrap();

    let err = fx.core.fulfillment.reconcile(order.id_typed()).unwrap_err();
    assert!(matches!(err, ServiceError::InvalidStateTransition(_)));
}

#[test]
fn approval_follow_up_failure_is_partial() {
    let fx = setup();
    let buyer = fx.buyer_with_pack("AMA-204");
    let pack_id = buyer.current_pack().unwrap();
    let request = fx.core.returns.submit(buyer.id_typed(), "AMA-204").unwrap();

    fx.store.fail_appends_to(Some("packs.pack"));
    let err = fx
        .core
        .returns
        .resolve(request.id_typed(), "approve", test_staff())
        .unwrap_err();

    assert!(matches!(
        err,
        ServiceError::PartialFailure {
            step: ReturnStep::PackStatus,
            ..
        }
    ));
    assert_eq!(
        fx.core.request(request.id_typed()).unwrap().status(),
        PackRequestStatus::Approved
    );
    assert_eq!(fx.core.buyer(buyer.id_typed()).unwrap().returned_pack_count(), 1);
    assert_eq!(
        fx.core.pack(packloop_packs::PackId::new(pack_id)).unwrap().status(),
        PackStatus::Active
    );

    fx.store.fail_appends_to(None);
    fx.core.returns.reconcile(request.id_typed()).unwrap();

    assert_eq!(
        fx.core.pack(packloop_packs::PackId::new(pack_id)).unwrap().status(),
        PackStatus::Returned
    );
    assert_eq!(fx.core.buyer(buyer.id_typed()).unwrap().returned_pack_count(), 1);
}

#[test]
fn failed_reward_is_finished_by_reconcile() {
    let fx = setup();
    let buyer = fx.buyer_with_pack("AMA-204");
    let pack_id = buyer.current_pack().unwrap();
    let request = fx.core.returns.submit(buyer.id_typed(), "AMA-204").unwrap();

    fx.store.fail_appends_to(Some("parties.buyer"));
    let err = fx
        .core
        .returns
        .resolve(request.id_typed(), "approve", test_staff())
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::PartialFailure {
            step: ReturnStep::BuyerReward,
            ..
        }
    ));
    fx.store.fail_appends_to(None);

    // The decision stands; resolving again is refused.
    let again = fx
        .core
        .returns
        .resolve(request.id_typed(), "approve", test_staff())
        .unwrap_err();
    assert!(matches!(again, ServiceError::InvalidOrAlreadyProcessed));

    let reconciled = fx.core.returns.reconcile(request.id_typed()).unwrap();
    assert_eq!(reconciled.status(), PackRequestStatus::Approved);
    fx.core.returns.reconcile(request.id_typed()).unwrap();

    let after = fx.core.buyer(buyer.id_typed()).unwrap();
    assert_eq!(after.returned_pack_count(), 1);
    assert_eq!(after.points(), 2);
    assert!(after.pending_request().is_none());
    assert_eq!(
        fx.core.pack(packloop_packs::PackId::new(pack_id)).unwrap().status(),
        PackStatus::Returned
    );
    assert_eq!(fx.event_count(buyer.id_typed().0, "parties.buyer.pack_return_credited"), 1);
    assert_eq!(fx.event_count(pack_id, "packs.pack.returned"), 1);

    assert!(fx.core.returns.submit(buyer.id_typed(), "AMA-204").is_ok());
}

#[test]
fn failed_rejection_close_is_finished_by_reconcile() {
    let fx = setup();
    let buyer = fx.buyer_with_pack("AMA-204");
    let request = fx.core.returns.submit(buyer.id_typed(), "AMA-204").unwrap();

    fx.store.fail_appends_to(Some("parties.buyer"));
    let err = fx
        .core
        .returns
        .resolve(request.id_typed(), "reject", test_staff())
        .unwrap_err();
    assert!(matches!(
        err,
        ServiceError::PartialFailure {
            step: ReturnStep::BuyerPendingMarker,
            ..
        }
    ));
    fx.store.fail_appends_to(None);

    fx.core.returns.reconcile(request.id_typed()).unwrap();

    let after = fx.core.buyer(buyer.id_typed()).unwrap();
    assert!(after.pending_request().is_none());
    assert_eq!(after.returned_pack_count(), 0);
    assert_eq!(after.current_pack(), buyer.current_pack());
    assert!(fx.core.returns.submit(buyer.id_typed(), "AMA-204").is_ok());
}

#[test]
fn reconcile_of_a_pending_request_is_rejected() {
    let fx = setup();
    let buyer = fx.buyer("AMA-204");
    let request = fx.core.returns.submit(buyer.id_typed(), "AMA-204").unwrap();

    let err = fx.core.returns.reconcile(request.id_typed()).unwrap_err();
    assert!(matches!(err, ServiceError::InvalidStateTransition(_)));

    let err = fx
        .core
        .returns
        .reconcile(PackRequestId::new(AggregateId::new()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn concurrent_approvals_credit_once() {
    let fx = setup();
    let buyer = fx.buyer_with_pack("AMA-204");
    let request_id = fx
        .core
        .returns
        .submit(buyer.id_typed(), "AMA-204")
        .unwrap()
        .id_typed();

    let results: Vec<_> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..6)
            .map(|_| {
                let core = &fx.core;
                s.spawn(move || core.returns.resolve(request_id, "approve", test_staff()))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for loser in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(loser, ServiceError::InvalidOrAlreadyProcessed), "{loser:?}");
    }

    let after = fx.core.buyer(buyer.id_typed()).unwrap();
    assert_eq!(after.returned_pack_count(), 1);
    assert_eq!(after.points(), 2);
    assert_eq!(fx.event_count(request_id.0, "packs.request.approved"), 1);
}

#[test]
fn lost_race_on_the_buyer_stream_is_retried_on_submit() {
    let fx = setup();
    let buyer = fx.buyer("AMA-204");

    fx.store.lose_next_race_on("parties.buyer");
    let request = fx.core.returns.submit(buyer.id_typed(), "AMA-204").unwrap();

    assert_eq!(
        fx.core.buyer(buyer.id_typed()).unwrap().pending_request(),
        Some(request.id_typed().0)
    );
    assert!(fx.store.lose_race.lock().unwrap().is_none());
}

/// Bus whose every publish fails.
struct BrokenBus;

impl EventBus<EventEnvelope<JsonValue>> for BrokenBus {
    type Error = &'static str;

    fn publish(&self, _message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        Err("broker down")
    }

    fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
        let (_tx, rx) = mpsc::channel();
        Subscription::new(rx)
    }
}

#[test]
fn publication_failures_never_fail_the_operation() {
    packloop_observability::init_for_tests();
    let catalog = Arc::new(InMemoryCatalog::new());
    let core = Packloop::new(
        InMemoryEventStore::new(),
        BrokenBus,
        catalog.clone(),
        Arc::new(InMemoryOrderCodeIndex::new()),
        Arc::new(FixedClock(test_time())),
        &PackloopConfig::default(),
    );

    let buyer = core
        .registration
        .register_buyer(BuyerProfile {
            code: "AMA-204".to_string(),
            first_name: "Ama".to_string(),
            last_name: "Mensah".to_string(),
            organization: "Harbour Logistics".to_string(),
        })
        .unwrap();
    let vendor = core.registration.register_vendor("V-001", "Mama's Kitchen").unwrap();
    let item_id = ItemId::new(AggregateId::new());
    catalog.upsert(CatalogItem {
        item_id,
        vendor_id: vendor.id_typed(),
        unit_price: 500,
        image_ref: None,
    });

    let order = core
        .placement
        .place_order(PlaceOrderRequest {
            buyer_id: buyer.id_typed(),
            lines: vec![CartLine { item_id, quantity: 2 }],
            declared_total_price: 1000,
            declared_total_quantity: 2,
        })
        .unwrap();
    let outcome = core.fulfillment.complete(order.id_typed()).unwrap();

    assert_eq!(outcome.vendor_stats.total_sales, 1000);
    assert_eq!(core.order(order.id_typed()).unwrap().status(), OrderStatus::Completed);
}
