use std::collections::HashMap;
use std::sync::RwLock;

use packloop_orders::{OrderCode, OrderId};
use std::sync::Arc;

/// Unique index of order codes.
///
/// `reserve` is the uniqueness check: it must atomically insert the code only
/// if it is not taken yet.
pub trait OrderCodeIndex: Send + Sync {
    /// Returns `false` when the code already belongs to another order.
    fn reserve(&self, code: &OrderCode, order_id: OrderId) -> bool;
    /// Undo a reservation whose order was never persisted.
    fn release(&self, code: &OrderCode, order_id: OrderId);
    fn lookup(&self, code: &OrderCode) -> Option<OrderId>;
}

impl<S> OrderCodeIndex for Arc<S>
where
    S: OrderCodeIndex + ?Sized,
{
    fn reserve(&self, code: &OrderCode, order_id: OrderId) -> bool {
        (**self).reserve(code, order_id)
    }

    fn release(&self, code: &OrderCode, order_id: OrderId) {
        (**self).release(code, order_id)
    }

    fn lookup(&self, code: &OrderCode) -> Option<OrderId> {
        (**self).lookup(code)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryOrderCodeIndex {
    inner: RwLock<HashMap<OrderCode, OrderId>>,
}

impl InMemoryOrderCodeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl OrderCodeIndex for InMemoryOrderCodeIndex {
    fn reserve(&self, code: &OrderCode, order_id: OrderId) -> bool {
        let Ok(mut map) = self.inner.write() else {
            return false;
        };
        if map.contains_key(code) {
            return false;
        }
        map.insert(code.clone(), order_id);
        true
    }

    fn release(&self, code: &OrderCode, order_id: OrderId) {
        if let Ok(mut map) = self.inner.write() {
            if map.get(code) == Some(&order_id) {
                map.remove(code);
            }
        }
    }

    fn lookup(&self, code: &OrderCode) -> Option<OrderId> {
        let map = self.inner.read().ok()?;
        map.get(code).copied()
    }
}
