//! Request and response types for the GATMONEY client.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use gatmoney_core::{PurchaseId, Resource, Tier, UserId};

/// A consumption to charge or check.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRequest {
    /// User being charged.
    pub user_id: UserId,
    /// Resource consumed.
    pub resource: Resource,
    /// Seconds consumed (video only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_seconds: Option<f64>,
}

impl UsageRequest {
    /// One scan.
    #[must_use]
    pub const fn scan(user_id: UserId) -> Self {
        Self {
            user_id,
            resource: Resource::Scan,
            video_seconds: None,
        }
    }

    /// One report.
    #[must_use]
    pub const fn report(user_id: UserId) -> Self {
        Self {
            user_id,
            resource: Resource::Report,
            video_seconds: None,
        }
    }

    /// One image.
    #[must_use]
    pub const fn image(user_id: UserId) -> Self {
        Self {
            user_id,
            resource: Resource::Image,
            video_seconds: None,
        }
    }

    /// `seconds` of video.
    #[must_use]
    pub const fn video(user_id: UserId, seconds: f64) -> Self {
        Self {
            user_id,
            resource: Resource::Video,
            video_seconds: Some(seconds),
        }
    }
}

/// What a consumption drew down.
#[derive(Debug, Clone, Deserialize)]
pub struct Charge {
    /// The resource consumed.
    pub resource: Resource,
    /// Taken from the tier allowance.
    pub from_allowance: i64,
    /// Taken from the purchased balance.
    pub from_balance: i64,
    /// `count`, or `milliseconds` for video.
    pub unit: String,
}

/// A per-period counter.
#[derive(Debug, Clone, Deserialize)]
pub struct Counter {
    /// Used this period.
    pub used: u32,
    /// Allowed per period.
    pub limit: u32,
    /// Left this period.
    pub remaining: u32,
}

/// Image allowance and balance.
#[derive(Debug, Clone, Deserialize)]
pub struct ImageBalance {
    /// Tier-included images used this period.
    pub included_used: u32,
    /// Tier-included images per period.
    pub included_limit: u32,
    /// Tier-included images left this period.
    pub included_remaining: u32,
    /// Purchased image credits.
    pub purchased_credits: i64,
}

/// Video allowance and balance, in seconds.
#[derive(Debug, Clone, Deserialize)]
pub struct VideoBalance {
    /// Tier-included seconds used this period.
    pub included_used_seconds: f64,
    /// Tier-included seconds per period.
    pub included_limit_seconds: f64,
    /// Tier-included seconds left this period.
    pub included_remaining_seconds: f64,
    /// Purchased seconds.
    pub purchased_seconds: f64,
}

/// A user's entitlement.
#[derive(Debug, Clone, Deserialize)]
pub struct Entitlement {
    /// User ID.
    pub user_id: UserId,
    /// Current tier.
    pub tier: Tier,
    /// First day of the current period.
    pub period_anchor_date: NaiveDate,
    /// Scans.
    pub scans: Counter,
    /// Reports.
    pub reports: Counter,
    /// Images.
    pub images: ImageBalance,
    /// Video.
    pub video: VideoBalance,
    /// Record version.
    pub version: u64,
    /// Last write (RFC 3339).
    pub updated_at: String,
}

/// Response to a charged consumption.
#[derive(Debug, Clone, Deserialize)]
pub struct UsageResponse {
    /// What was charged.
    pub charged: Charge,
    /// Entitlement after the charge.
    pub entitlement: Entitlement,
}

/// Response to a check.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckResponse {
    /// Whether the consumption would be allowed.
    pub allowed: bool,
    /// What it would draw down.
    pub would_charge: Charge,
}

/// Tier change request.
#[derive(Debug, Clone, Serialize)]
pub struct SetTierRequest {
    /// The new tier.
    pub tier: Tier,
}

/// Tier change response.
#[derive(Debug, Clone, Deserialize)]
pub struct SetTierResponse {
    /// Tier before the change.
    pub previous_tier: Tier,
    /// Entitlement after the change.
    pub entitlement: Entitlement,
}

/// Reconciliation request.
#[derive(Debug, Clone, Serialize)]
pub struct ReconcileRequest {
    /// Most purchases to examine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

/// Result of a reconciliation run.
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileReport {
    /// Completed but uncredited purchases found.
    pub examined: usize,
    /// Purchases credited by this run.
    pub granted: usize,
    /// Purchases that still could not be credited.
    pub failed: Vec<PurchaseId>,
}

/// API error response.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    /// Error details.
    pub error: ApiErrorBody,
}

/// API error body.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    /// Error code.
    pub code: String,
    /// Error message.
    pub message: String,
    /// Additional details.
    pub details: Option<serde_json::Value>,
}
