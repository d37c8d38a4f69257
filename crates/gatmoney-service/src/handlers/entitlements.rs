//! Entitlement and ledger handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::NaiveDate;
use serde::Serialize;

use gatmoney_core::{Charge, LedgerEntry, Resource, Tier, TierPolicy, UserEntitlement};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::handlers::ListQuery;
use crate::state::AppState;

/// A per-period counter.
#[derive(Debug, Serialize)]
pub struct CounterResponse {
    /// Used this period.
    pub used: u32,
    /// Allowed per period.
    pub limit: u32,
    /// Left this period.
    pub remaining: u32,
}

/// Image allowance and balance.
#[derive(Debug, Serialize)]
pub struct ImageResponse {
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
#[derive(Debug, Serialize)]
pub struct VideoResponse {
    /// Tier-included seconds used this period.
    pub included_used_seconds: f64,
    /// Tier-included seconds per period.
    pub included_limit_seconds: f64,
    /// Tier-included seconds left this period.
    pub included_remaining_seconds: f64,
    /// Purchased seconds.
    pub purchased_seconds: f64,
}

/// Entitlement response.
#[derive(Debug, Serialize)]
pub struct EntitlementResponse {
    /// User ID.
    pub user_id: String,
    /// Current tier.
    pub tier: Tier,
    /// First day of the current period.
    pub period_anchor_date: NaiveDate,
    /// Scans.
    pub scans: CounterResponse,
    /// Reports.
    pub reports: CounterResponse,
    /// Images.
    pub images: ImageResponse,
    /// Video.
    pub video: VideoResponse,
    /// Record version.
    pub version: u64,
    /// Last write.
    pub updated_at: String,
}

impl EntitlementResponse {
    /// Build the response for `entitlement` under `policy`.
    #[must_use]
    pub fn build(entitlement: &UserEntitlement, policy: &TierPolicy) -> Self {
        let limits = policy.limits_for(entitlement.tier);
        Self {
            user_id: entitlement.user_id.to_string(),
            tier: entitlement.tier,
            period_anchor_date: entitlement.period_anchor_date,
            scans: CounterResponse {
                used: entitlement.scans_used_this_period,
                limit: limits.max_scans_per_period,
                remaining: entitlement.scans_remaining(policy),
            },
            reports: CounterResponse {
                used: entitlement.reports_used_this_period,
                limit: limits.max_reports_per_period,
                remaining: entitlement.reports_remaining(policy),
            },
            images: ImageResponse {
                included_used: entitlement.included_images_used,
                included_limit: limits.included_image_credits_per_period,
                included_remaining: entitlement.included_images_remaining(policy),
                purchased_credits: entitlement.image_credits,
            },
            video: VideoResponse {
                included_used_seconds: entitlement.included_video_used.as_secs_f64(),
                included_limit_seconds: limits.included_video_seconds_per_period.as_secs_f64(),
                included_remaining_seconds: entitlement
                    .included_video_remaining(policy)
                    .as_secs_f64(),
                purchased_seconds: entitlement.video_seconds_credits.as_secs_f64(),
            },
            version: entitlement.version,
            updated_at: entitlement.updated_at.to_rfc3339(),
        }
    }
}

/// What a successful consumption drew down.
#[derive(Debug, Serialize)]
pub struct ChargeResponse {
    /// The resource consumed.
    pub resource: Resource,
    /// Taken from the tier allowance.
    pub from_allowance: i64,
    /// Taken from purchased balance.
    pub from_balance: i64,
    /// `count`, or `milliseconds` for video.
    pub unit: &'static str,
}

impl From<&Charge> for ChargeResponse {
    fn from(charge: &Charge) -> Self {
        Self {
            resource: charge.resource,
            from_allowance: charge.from_allowance,
            from_balance: charge.from_balance,
            unit: if charge.resource == Resource::Video {
                "milliseconds"
            } else {
                "count"
            },
        }
    }
}

/// Get the caller's entitlement.
pub async fn get_entitlement(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
) -> Result<Json<EntitlementResponse>, ApiError> {
    let entitlement = state.ledger.current(&auth.user_id).await?;
    Ok(Json(EntitlementResponse::build(
        &entitlement,
        state.ledger.policy(),
    )))
}

/// Ledger entry response.
#[derive(Debug, Serialize)]
pub struct EntryResponse {
    /// Entry ID.
    pub id: String,
    /// Entry kind.
    pub kind: String,
    /// Change to purchased image credits.
    pub image_delta: i64,
    /// Change to purchased video balance, in seconds.
    pub video_delta_seconds: f64,
    /// Description.
    pub description: String,
    /// Metadata.
    pub metadata: serde_json::Value,
    /// Timestamp.
    pub created_at: String,
}

impl From<&LedgerEntry> for EntryResponse {
    #[allow(clippy::cast_precision_loss)]
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            id: entry.id.to_string(),
            kind: entry.kind.as_str().to_string(),
            image_delta: entry.image_delta,
            video_delta_seconds: entry.video_delta_millis as f64 / 1000.0,
            description: entry.description.clone(),
            metadata: entry.metadata.clone(),
            created_at: entry.created_at.to_rfc3339(),
        }
    }
}

/// List entries response.
#[derive(Debug, Serialize)]
pub struct ListEntriesResponse {
    /// Entries (newest first).
    pub entries: Vec<EntryResponse>,
    /// Whether there are more entries.
    pub has_more: bool,
}

/// List the caller's ledger entries.
pub async fn list_entries(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListEntriesResponse>, ApiError> {
    // Fetch one more than requested to determine has_more
    let limit = query.capped_limit();
    let entries = state
        .store
        .list_entries_by_user(&auth.user_id, limit + 1, query.offset)
        .await?;

    let has_more = entries.len() > limit;
    let entries = entries
        .iter()
        .take(limit)
        .map(EntryResponse::from)
        .collect();

    Ok(Json(ListEntriesResponse { entries, has_more }))
}
