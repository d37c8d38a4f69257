//! Error types for GATMONEY entitlements.

use serde::{Deserialize, Serialize};

use crate::{PurchaseId, Resource, ResourceType, Tier};

/// Result type for entitlement operations.
pub type Result<T> = std::result::Result<T, EntitlementError>;

/// What the user can do after running out of a resource.
///
/// Exhaustion is never a dead end: every [`EntitlementError::QuotaExceeded`]
/// carries one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum UpsellPrompt {
    /// Move to a higher tier with a larger allowance.
    Upgrade {
        /// The suggested tier.
        tier: Tier,
    },
    /// Buy more credits of this kind.
    Purchase {
        /// The resource to buy.
        resource: ResourceType,
    },
    /// Already on the highest tier: the allowance comes back next period.
    WaitForReset,
}

/// Errors that can occur in entitlement operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EntitlementError {
    /// A consume attempt found insufficient allowance or balance.
    #[error("quota exceeded for {resource}: remaining={remaining}, requested={requested}")]
    QuotaExceeded {
        /// The exhausted resource.
        resource: Resource,
        /// What is left, in the resource's unit (count, or milliseconds for video).
        remaining: i64,
        /// What was asked for, in the same unit.
        requested: i64,
        /// The follow-up offered to the user.
        prompt: UpsellPrompt,
    },

    /// The generation collaborator failed or timed out. Nothing was charged.
    #[error("external call failed: {reason}")]
    ExternalCallFailed {
        /// Why the call failed.
        reason: String,
        /// Whether the failure was a timeout.
        timed_out: bool,
    },

    /// A completed purchase could not be credited to the user.
    #[error("credit grant failed for completed purchase {purchase_id}: {reason}")]
    CreditGrantFailure {
        /// The paid-but-uncredited purchase.
        purchase_id: PurchaseId,
        /// Underlying cause.
        reason: String,
    },

    /// A quantity was zero, negative, of the wrong kind or out of range.
    #[error("invalid quantity: {0}")]
    InvalidQuantity(String),

    /// A purchase amount fell outside the allowed range.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),
}
