//! Pack-return reward arithmetic.

use serde::{Deserialize, Serialize};

use packloop_core::ValueObject;

/// Points credited for every approved pack return.
pub const POINTS_PER_RETURNED_PACK: u64 = 2;

/// Money credited per point, in minor currency units (0.50 per point).
pub const MINOR_UNITS_PER_POINT: u64 = 50;

/// A buyer's reward balance.
///
/// Always derived from the returned-pack counter alone; no other history is
/// consulted, so recomputing it is exact and never drifts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltyBalance {
    pub returned_packs: u64,
    pub points: u64,
    /// Money balance in minor currency units.
    pub money_balance: u64,
}

impl ValueObject for LoyaltyBalance {}

impl LoyaltyBalance {
    pub fn for_returned_packs(returned_packs: u64) -> Self {
        let points = returned_packs * POINTS_PER_RETURNED_PACK;
        Self {
            returned_packs,
            points,
            money_balance: points * MINOR_UNITS_PER_POINT,
        }
    }
}
