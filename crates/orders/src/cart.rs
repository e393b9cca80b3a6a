//! Cart validation.
//!
//! A `Cart` can only be built from catalog data that was resolved server-side,
//! and only if every line belongs to the same vendor. Holding a `Cart` is proof
//! that the single-vendor invariant holds, before anything is persisted.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use packloop_core::{AggregateId, ValueObject};
use packloop_parties::VendorId;

/// Catalog item identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub AggregateId);

impl ItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A line as submitted by the buyer: only a reference and a quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub item_id: ItemId,
    pub quantity: u32,
}

/// Catalog data for an item, as resolved by the catalog service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub item_id: ItemId,
    pub vendor_id: VendorId,
    /// Price in smallest currency unit.
    pub unit_price: u64,
    pub image_ref: Option<String>,
}

/// Order line: item, quantity and unit price copied at order time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub line_no: u32,
    pub item_id: ItemId,
    pub quantity: u32,
    /// Price in smallest currency unit.
    pub unit_price: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CartError {
    #[error("cart has no items")]
    Empty,

    #[error("quantity for item {item_id} must be positive")]
    InvalidQuantity { item_id: ItemId },

    #[error("item {item_id} not found in catalog")]
    ItemNotFound { item_id: ItemId },

    #[error("item {item_id} belongs to vendor {found}, cart vendor is {expected}")]
    CrossVendor {
        expected: VendorId,
        found: VendorId,
        item_id: ItemId,
    },

    #[error(
        "declared totals ({declared_price}, {declared_quantity}) do not match computed totals ({computed_price}, {computed_quantity})"
    )]
    PriceMismatch {
        declared_price: u64,
        computed_price: u64,
        declared_quantity: u64,
        computed_quantity: u64,
    },

    #[error("cart totals overflow")]
    Overflow,
}

/// Validated single-vendor cart with server-computed totals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cart {
    vendor_id: VendorId,
    lines: Vec<OrderLine>,
    total_price: u64,
    total_quantity: u64,
    cover_image: Option<String>,
}

impl ValueObject for Cart {}

impl Cart {
    /// Build a cart from the submitted lines and the freshly resolved catalog
    /// items. The vendor is taken from the first line's item.
    pub fn new(lines: &[CartLine], resolved: &[CatalogItem]) -> Result<Self, CartError> {
        let first = lines.first().ok_or(CartError::Empty)?;

        let by_id: HashMap<ItemId, &CatalogItem> =
            resolved.iter().map(|item| (item.item_id, item)).collect();

        let first_item = lookup(&by_id, first.item_id)?;
        let vendor_id = first_item.vendor_id;
        let cover_image = first_item.image_ref.clone();

        let mut order_lines = Vec::with_capacity(lines.len());
        let mut total_price: u64 = 0;
        let mut total_quantity: u64 = 0;

        for (idx, line) in lines.iter().enumerate() {
            if line.quantity == 0 {
                return Err(CartError::InvalidQuantity {
                    item_id: line.item_id,
                });
            }

            let item = lookup(&by_id, line.item_id)?;
            if item.vendor_id != vendor_id {
                return Err(CartError::CrossVendor {
                    expected: vendor_id,
                    found: item.vendor_id,
                    item_id: item.item_id,
                });
            }

            let line_total = item
                .unit_price
                .checked_mul(u64::from(line.quantity))
                .ok_or(CartError::Overflow)?;
            total_price = total_price.checked_add(line_total).ok_or(CartError::Overflow)?;
            total_quantity += u64::from(line.quantity);

            order_lines.push(OrderLine {
                line_no: (idx as u32) + 1,
                item_id: item.item_id,
                quantity: line.quantity,
                unit_price: item.unit_price,
            });
        }

        Ok(Self {
            vendor_id,
            lines: order_lines,
            total_price,
            total_quantity,
            cover_image,
        })
    }

    /// Compare client-declared totals with the computed ones (exact match).
    pub fn check_declared_totals(
        &self,
        declared_price: u64,
        declared_quantity: u64,
    ) -> Result<(), CartError> {
        if declared_price != self.total_price || declared_quantity != self.total_quantity {
            return Err(CartError::PriceMismatch {
                declared_price,
                computed_price: self.total_price,
                declared_quantity,
                computed_quantity: self.total_quantity,
            });
        }
        Ok(())
    }

    pub fn vendor_id(&self) -> VendorId {
        self.vendor_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn total_price(&self) -> u64 {
        self.total_price
    }

    pub fn total_quantity(&self) -> u64 {
        self.total_quantity
    }

    pub fn cover_image(&self) -> Option<&str> {
        self.cover_image.as_deref()
    }
}

fn lookup<'a>(
    by_id: &HashMap<ItemId, &'a CatalogItem>,
    item_id: ItemId,
) -> Result<&'a CatalogItem, CartError> {
    by_id
        .get(&item_id)
        .copied()
        .ok_or(CartError::ItemNotFound { item_id })
}
