use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use thiserror::Error;

use packloop_orders::{CatalogItem, ItemId};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

/// Resolves item references to vendor, price and image.
///
/// One batch call per cart. Unknown ids are simply absent from the result;
/// the caller decides how to report them.
pub trait Catalog: Send + Sync {
    fn resolve(&self, item_ids: &[ItemId]) -> Result<Vec<CatalogItem>, CatalogError>;
}

impl<C> Catalog for Arc<C>
where
    C: Catalog + ?Sized,
{
    fn resolve(&self, item_ids: &[ItemId]) -> Result<Vec<CatalogItem>, CatalogError> {
        (**self).resolve(item_ids)
    }
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    items: RwLock<HashMap<ItemId, CatalogItem>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, item: CatalogItem) {
        if let Ok(mut items) = self.items.write() {
            items.insert(item.item_id, item);
        }
    }
}

impl Catalog for InMemoryCatalog {
    fn resolve(&self, item_ids: &[ItemId]) -> Result<Vec<CatalogItem>, CatalogError> {
        let items = self
            .items
            .read()
            .map_err(|_| CatalogError::Unavailable("lock poisoned".to_string()))?;

        Ok(item_ids.iter().filter_map(|id| items.get(id).cloned()).collect())
    }
}
