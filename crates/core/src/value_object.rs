//! Value object trait: equality by value, not identity.

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**: an order code,
/// a cart line or a reward balance has no identity of its own. To "modify" one,
/// build a new one.
///
/// ```ignore
/// #[derive(Debug, Clone, PartialEq, Eq)]
/// struct OrderCode(String);
///
/// impl ValueObject for OrderCode {}
/// ```
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}
