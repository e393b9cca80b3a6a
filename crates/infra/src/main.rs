//! Walks one buyer through order, completion and pack return against the
//! in-memory ledger, logging each step.

use std::sync::Arc;

use anyhow::Context;
use serde_json::Value as JsonValue;

use packloop_core::{ActorId, AggregateId};
use packloop_events::{EventBus, EventEnvelope, InMemoryEventBus};
use packloop_infra::{
    InMemoryCatalog, InMemoryEventStore, InMemoryOrderCodeIndex, Packloop, PackloopConfig,
    PlaceOrderRequest, SystemClock,
};
use packloop_orders::{CartLine, CatalogItem, ItemId};
use packloop_parties::BuyerProfile;

fn main() -> anyhow::Result<()> {
    packloop_observability::init();

    let config = PackloopConfig::from_env().context("reading packloop configuration")?;

    let bus = Arc::new(InMemoryEventBus::<EventEnvelope<JsonValue>>::new());
    let feed = bus.subscribe();
    let catalog = Arc::new(InMemoryCatalog::new());
    let core = Packloop::new(
        InMemoryEventStore::new(),
        bus,
        catalog.clone(),
        Arc::new(InMemoryOrderCodeIndex::new()),
        Arc::new(SystemClock),
        &config,
    );

    let vendor = core
        .registration
        .register_vendor("V-001", "Mama's Kitchen")
        .context("registering vendor")?;
    let buyer = core
        .registration
        .register_buyer(BuyerProfile {
            code: "AMA-204".to_string(),
            first_name: "Ama".to_string(),
            last_name: "Mensah".to_string(),
            organization: "Harbour Logistics".to_string(),
        })
        .context("registering buyer")?;

    let menu = [(500, "jollof.jpg"), (1000, "banku.jpg")].map(|(price, image)| CatalogItem {
        item_id: ItemId::new(AggregateId::new()),
        vendor_id: vendor.id_typed(),
        unit_price: price,
        image_ref: Some(image.to_string()),
    });
    for item in &menu {
        catalog.upsert(item.clone());
    }

    let order = core
        .placement
        .place_order(PlaceOrderRequest {
            buyer_id: buyer.id_typed(),
            lines: menu
                .iter()
                .map(|item| CartLine {
                    item_id: item.item_id,
                    quantity: 1,
                })
                .collect(),
            declared_total_price: menu.iter().map(|i| i.unit_price).sum(),
            declared_total_quantity: menu.len() as u64,
        })
        .context("placing order")?;

    let outcome = core
        .fulfillment
        .complete(order.id_typed())
        .context("completing order")?;

    let request = core
        .returns
        .submit(buyer.id_typed(), "AMA-204")
        .context("submitting pack return")?;
    core.returns
        .resolve(request.id_typed(), "approve", ActorId::new())
        .context("approving pack return")?;

    let buyer = core.buyer(buyer.id_typed())?;
    let stats = core.vendor(vendor.id_typed())?.stats();
    tracing::info!(
        pack = %outcome.pack.display_id(),
        completed_orders = stats.completed_orders,
        total_sales = stats.total_sales,
        returned_packs = buyer.returned_pack_count(),
        points = buyer.points(),
        money_balance = buyer.money_balance(),
        published_events = feed.drain().len(),
        "walkthrough finished"
    );

    Ok(())
}
