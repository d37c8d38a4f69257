//! Core entitlement types and rules for GATMONEY.
//!
//! This crate holds the pure bookkeeping behind scans, image credits and video
//! seconds. It performs no I/O; persistence and serialization of concurrent
//! access live in `gatmoney-store` and `gatmoney-service`.
//!
//! - **Identifiers**: `UserId`, `PurchaseId`, `EntryId`
//! - **Tiers**: `Tier`, `TierLimits`, `TierPolicy`
//! - **Entitlements**: `UserEntitlement`, period rollover, quota enforcement
//! - **Purchases**: `CreditPurchase` and its Pending → Completed/Failed lifecycle
//! - **Ledger**: `LedgerEntry`, one per entitlement change
//! - **Pricing**: `PricingConfig`
//!
//! # Units
//!
//! - Image credits are whole numbers.
//! - Video is metered in seconds with millisecond resolution (`VideoSeconds`).
//! - Money is integer cents.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod entitlement;
pub mod entry;
pub mod error;
pub mod ids;
pub mod period;
pub mod pricing;
pub mod purchase;
pub mod quota;
pub mod tier;
pub mod video;

pub use entitlement::UserEntitlement;
pub use entry::{EntryKind, LedgerEntry};
pub use error::{EntitlementError, Result, UpsellPrompt};
pub use ids::{EntryId, IdError, PurchaseId, UserId};
pub use period::{maybe_reset_period, ClosedPeriod, PeriodLength};
pub use pricing::PricingConfig;
pub use purchase::{
    CreditPurchase, PaymentOutcome, PurchaseQuantity, PurchaseStatus, ResourceType, Settlement,
};
pub use quota::{Charge, Consumption, Resource};
pub use tier::{PolicyError, Tier, TierLimits, TierPolicy};
pub use video::{NegativeVideoSeconds, VideoSeconds};
