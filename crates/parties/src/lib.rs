//! Parties domain module: buyers and vendors (event-sourced).
//!
//! Buyers carry the loyalty fields (returned packs, points, money balance,
//! active packs); vendors carry the running order counters. Both are pure
//! deterministic domain logic (no IO, no storage).

pub mod buyer;
pub mod loyalty;
pub mod vendor;

pub use buyer::{
    Buyer, BuyerCommand, BuyerEvent, BuyerId, BuyerOrderLinked, BuyerProfile, BuyerProfileUpdated, BuyerRegistered,
    CloseReturnRequest, CreditReturnedPack, LinkBuyerOrder, OpenReturnRequest, PackActivated,
    PackReturnCredited, RecordPackActivation, RegisterBuyer, ReturnRequestClosed,
    ReturnRequestOpened, UpdateBuyerProfile,
};
pub use loyalty::{LoyaltyBalance, MINOR_UNITS_PER_POINT, POINTS_PER_RETURNED_PACK};
pub use vendor::{
    CanceledOrderRecorded, CompletedOrderRecorded, LinkVendorOrder, RecordCanceledOrder,
    RecordCompletedOrder, RegisterVendor, Vendor, VendorCommand, VendorEvent, VendorId,
    VendorOrderLinked, VendorRegistered, VendorStats,
};
