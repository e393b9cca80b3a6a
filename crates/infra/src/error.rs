//! Service-level error model.
//!
//! Every failure carries a stable machine-readable `code()` and a coarse
//! `kind()` used for routing (HTTP status, retry policy, alerting).

use thiserror::Error;

use packloop_orders::{CartError, ItemId, OrderId};
use packloop_packs::PackRequestId;
use packloop_parties::VendorId;

use crate::command_dispatcher::DispatchError;
use crate::external::CatalogError;

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    /// The entity is not in a state that allows the operation.
    StateConflict,
    /// Client input contradicts server-side truth (prices, vendors, codes).
    ConsistencyViolation,
    /// The primary write succeeded, a follow-up write did not.
    PartialFailure,
    Infrastructure,
}

/// Downstream step of an order transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfillmentStep {
    VendorStats,
    Pack,
    BuyerPacks,
}

/// Follow-up step of a pack request resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnStep {
    BuyerReward,
    PackStatus,
    BuyerPendingMarker,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("cart has no items")]
    NoItems,

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("item {item_id} not found in catalog")]
    ItemNotFound { item_id: ItemId },

    #[error("cart mixes vendors: {expected} and {found}")]
    CrossVendorCart { expected: VendorId, found: VendorId },

    #[error(
        "declared totals ({declared_price}, {declared_quantity}) do not match computed totals ({computed_price}, {computed_quantity})"
    )]
    PriceMismatch {
        declared_price: u64,
        computed_price: u64,
        declared_quantity: u64,
        computed_quantity: u64,
    },

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("no free order code after {attempts} attempts")]
    OrderCodeExhausted { attempts: u32 },

    #[error("invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("code does not match the buyer's code")]
    InvalidCode,

    #[error("buyer already has a pending return request")]
    DuplicatePendingRequest,

    #[error("request does not exist or was already processed")]
    InvalidOrAlreadyProcessed,

    #[error("invalid action {0:?}")]
    InvalidAction(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("order {order_id} transitioned but {step:?} failed: {reason}")]
    PartialFulfillment {
        order_id: OrderId,
        step: FulfillmentStep,
        reason: String,
    },

    #[error("request {request_id} resolved but {step:?} failed: {reason}")]
    PartialFailure {
        request_id: PackRequestId,
        step: ReturnStep,
        reason: String,
    },

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("ledger failure: {0}")]
    Ledger(DispatchError),
}

impl ServiceError {
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::NoItems => "no_items",
            ServiceError::Validation(_) => "validation",
            ServiceError::ItemNotFound { .. } => "item_not_found",
            ServiceError::CrossVendorCart { .. } => "cross_vendor_cart",
            ServiceError::PriceMismatch { .. } => "price_mismatch",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::OrderCodeExhausted { .. } => "order_code_exhausted",
            ServiceError::InvalidStateTransition(_) => "invalid_state_transition",
            ServiceError::InvalidCode => "invalid_code",
            ServiceError::DuplicatePendingRequest => "duplicate_pending_request",
            ServiceError::InvalidOrAlreadyProcessed => "invalid_or_already_processed",
            ServiceError::InvalidAction(_) => "invalid_action",
            ServiceError::Conflict(_) => "conflict",
            ServiceError::PartialFulfillment { .. } => "partial_fulfillment",
            ServiceError::PartialFailure { .. } => "partial_failure",
            ServiceError::Catalog(_) => "catalog_unavailable",
            ServiceError::Ledger(_) => "ledger_failure",
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::NoItems
            | ServiceError::Validation(_)
            | ServiceError::ItemNotFound { .. }
            | ServiceError::InvalidAction(_) => ErrorKind::Validation,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::OrderCodeExhausted { .. }
            | ServiceError::InvalidStateTransition(_)
            | ServiceError::DuplicatePendingRequest
            | ServiceError::InvalidOrAlreadyProcessed
            | ServiceError::Conflict(_) => ErrorKind::StateConflict,
            ServiceError::CrossVendorCart { .. }
            | ServiceError::PriceMismatch { .. }
            | ServiceError::InvalidCode => ErrorKind::ConsistencyViolation,
            ServiceError::PartialFulfillment { .. } | ServiceError::PartialFailure { .. } => {
                ErrorKind::PartialFailure
            }
            ServiceError::Catalog(_) | ServiceError::Ledger(_) => ErrorKind::Infrastructure,
        }
    }

    /// Map a ledger failure for an operation on one entity.
    ///
    /// `entity` names the entity in `NotFound`; a lost compare-and-swap is
    /// reported as a state conflict since the entity moved underneath us.
    pub(crate) fn from_dispatch(entity: &'static str, err: DispatchError) -> Self {
        match err {
            DispatchError::NotFound => ServiceError::NotFound(entity),
            DispatchError::Validation(msg) | DispatchError::InvariantViolation(msg) => {
                ServiceError::Validation(msg)
            }
            DispatchError::InvalidTransition(msg) => ServiceError::InvalidStateTransition(msg),
            DispatchError::Concurrency(msg) => {
                ServiceError::InvalidStateTransition(format!("{entity} changed concurrently: {msg}"))
            }
            DispatchError::Conflict(msg) => ServiceError::Conflict(msg),
            other => ServiceError::Ledger(other),
        }
    }
}

impl From<CartError> for ServiceError {
    fn from(value: CartError) -> Self {
        match value {
            CartError::Empty => ServiceError::NoItems,
            CartError::InvalidQuantity { item_id } => {
                ServiceError::Validation(format!("quantity for item {item_id} must be positive"))
            }
            CartError::ItemNotFound { item_id } => ServiceError::ItemNotFound { item_id },
            CartError::CrossVendor {
                expected, found, ..
            } => ServiceError::CrossVendorCart { expected, found },
            CartError::PriceMismatch {
                declared_price,
                computed_price,
                declared_quantity,
                computed_quantity,
            } => ServiceError::PriceMismatch {
                declared_price,
                computed_price,
                declared_quantity,
                computed_quantity,
            },
            CartError::Overflow => ServiceError::Validation("cart totals overflow".to_string()),
        }
    }
}
