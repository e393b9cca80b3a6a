//! Human-readable order codes (`ORD-` + 5 digits).

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use packloop_core::{DomainError, ValueObject};

const PREFIX: &str = "ORD-";
const MIN: u32 = 10_000;
const MAX: u32 = 99_999;

/// Display identifier of an order, distinct from its storage id.
///
/// The 5-digit space is small; uniqueness is enforced by reserving codes in
/// an index at placement time, not by the generator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OrderCode(String);

impl ValueObject for OrderCode {}

impl OrderCode {
    /// Draw a random code from the given generator.
    pub fn random(rng: &mut fastrand::Rng) -> Self {
        Self::from_number(rng.u32(MIN..=MAX))
    }

    fn from_number(n: u32) -> Self {
        Self(format!("{PREFIX}{n}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for OrderCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OrderCode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .strip_prefix(PREFIX)
            .ok_or_else(|| DomainError::invalid_id(format!("OrderCode: missing prefix in {s:?}")))?;
        if digits.len() != 5 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::invalid_id(format!(
                "OrderCode: expected 5 digits in {s:?}"
            )));
        }
        let n: u32 = digits
            .parse()
            .map_err(|e| DomainError::invalid_id(format!("OrderCode: {e}")))?;
        if !(MIN..=MAX).contains(&n) {
            return Err(DomainError::invalid_id(format!("OrderCode: {n} out of range")));
        }
        Ok(Self::from_number(n))
    }
}

impl TryFrom<String> for OrderCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OrderCode> for String {
    fn from(value: OrderCode) -> Self {
        value.0
    }
}
