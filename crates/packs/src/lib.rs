//! Packs domain module (event-sourced).
//!
//! A pack is a buyer's reusable-container allotment, issued when an order is
//! completed. A pack request is the buyer's claim that the pack was handed
//! back, approved or rejected by staff.

pub mod pack;
pub mod request;

pub use pack::{
    IssuePack, MarkPackReturned, Pack, PackCommand, PackEvent, PackId, PackIssued, PackKey,
    PackKeying, PackReactivated, PackReturned, PackStatus, ReactivatePack,
};
pub use request::{
    ApprovePackRequest, PackRequest, PackRequestApproved, PackRequestCommand, PackRequestEvent,
    PackRequestId, PackRequestRejected, PackRequestStatus, PackRequestSubmitted,
    RejectPackRequest, ResolveAction, SubmitPackRequest,
};
