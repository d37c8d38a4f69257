//! Ledger entries.
//!
//! Every change to an entitlement is recorded as a [`LedgerEntry`], written in
//! the same atomic step as the entitlement itself.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::period::ClosedPeriod;
use crate::{Charge, CreditPurchase, EntryId, PurchaseQuantity, Resource, Tier, UserId};

/// A record of one entitlement change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Unique entry ID (ULID for time-ordering).
    pub id: EntryId,

    /// The user whose entitlement changed.
    pub user_id: UserId,

    /// What kind of change it was.
    pub kind: EntryKind,

    /// Change to purchased image credits. Negative = spent.
    pub image_delta: i64,

    /// Change to purchased video balance, in milliseconds. Negative = spent.
    pub video_delta_millis: i64,

    /// Human-readable description.
    pub description: String,

    /// Additional metadata (allowance draw, purchase id, tiers, ...).
    pub metadata: serde_json::Value,

    /// When the change happened.
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry {
    fn new(user_id: UserId, kind: EntryKind, description: String) -> Self {
        Self {
            id: EntryId::generate(),
            user_id,
            kind,
            image_delta: 0,
            video_delta_millis: 0,
            description,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    /// Entry for a successful consumption.
    #[must_use]
    pub fn consumption(user_id: UserId, charge: &Charge) -> Self {
        let kind = match charge.resource {
            Resource::Scan => EntryKind::ScanConsumed,
            Resource::Report => EntryKind::ReportConsumed,
            Resource::Image => EntryKind::ImageConsumed,
            Resource::Video => EntryKind::VideoConsumed,
        };
        let mut entry = Self::new(user_id, kind, format!("Consumed {}", charge.resource));
        match charge.resource {
            Resource::Image => entry.image_delta = -charge.from_balance,
            Resource::Video => entry.video_delta_millis = -charge.from_balance,
            Resource::Scan | Resource::Report => {}
        }
        entry.metadata = serde_json::json!({
            "from_allowance": charge.from_allowance,
            "from_balance": charge.from_balance,
        });
        entry
    }

    /// Entry for credits granted from a completed purchase.
    #[must_use]
    pub fn purchase_granted(purchase: &CreditPurchase) -> Self {
        let mut entry = Self::new(
            purchase.user_id,
            EntryKind::PurchaseGranted,
            format!("Purchased {}", purchase.quantity),
        );
        match purchase.quantity {
            PurchaseQuantity::Images(count) => entry.image_delta = count,
            PurchaseQuantity::VideoSeconds(seconds) => {
                entry.video_delta_millis = seconds.as_millis();
            }
        }
        entry.metadata = serde_json::json!({
            "purchase_id": purchase.id.to_string(),
            "amount_charged_cents": purchase.amount_charged_cents,
            "external_payment_ref": purchase.external_payment_ref,
        });
        entry
    }

    /// Entry for an explicit tier change.
    #[must_use]
    pub fn tier_changed(user_id: UserId, from: Tier, to: Tier, actor: &str) -> Self {
        let mut entry = Self::new(
            user_id,
            EntryKind::TierChanged,
            format!("Tier changed from {from} to {to}"),
        );
        entry.metadata = serde_json::json!({ "from": from, "to": to, "actor": actor });
        entry
    }

    /// Entry for a period rollover.
    #[must_use]
    pub fn period_reset(user_id: UserId, closed: &ClosedPeriod) -> Self {
        let mut entry = Self::new(
            user_id,
            EntryKind::PeriodReset,
            format!("Period starting {} closed", closed.anchor),
        );
        entry.metadata = serde_json::json!({
            "anchor": closed.anchor.to_string(),
            "scans_used": closed.scans_used,
            "reports_used": closed.reports_used,
        });
        entry
    }
}

/// Kind of ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// A scan was charged.
    ScanConsumed,
    /// A report was charged.
    ReportConsumed,
    /// An image was charged.
    ImageConsumed,
    /// Video seconds were charged.
    VideoConsumed,
    /// Purchased credits were added.
    PurchaseGranted,
    /// The tier was changed.
    TierChanged,
    /// The counting period rolled over.
    PeriodReset,
}

impl EntryKind {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ScanConsumed => "scan_consumed",
            Self::ReportConsumed => "report_consumed",
            Self::ImageConsumed => "image_consumed",
            Self::VideoConsumed => "video_consumed",
            Self::PurchaseGranted => "purchase_granted",
            Self::TierChanged => "tier_changed",
            Self::PeriodReset => "period_reset",
        }
    }
}

impl std::str::FromStr for EntryKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "scan_consumed" => Ok(Self::ScanConsumed),
            "report_consumed" => Ok(Self::ReportConsumed),
            "image_consumed" => Ok(Self::ImageConsumed),
            "video_consumed" => Ok(Self::VideoConsumed),
            "purchase_granted" => Ok(Self::PurchaseGranted),
            "tier_changed" => Ok(Self::TierChanged),
            "period_reset" => Ok(Self::PeriodReset),
            other => Err(format!("unknown entry kind: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PaymentOutcome, VideoSeconds};

    #[test]
    fn image_consumption_from_balance_is_negative() {
        let charge = Charge {
            resource: Resource::Image,
            from_allowance: 0,
            from_balance: 1,
        };
        let entry = LedgerEntry::consumption(UserId::generate(), &charge);
        assert_eq!(entry.kind, EntryKind::ImageConsumed);
        assert_eq!(entry.image_delta, -1);
        assert_eq!(entry.video_delta_millis, 0);
    }

    #[test]
    fn allowance_draw_does_not_touch_balance_delta() {
        let charge = Charge {
            resource: Resource::Video,
            from_allowance: 2000,
            from_balance: 0,
        };
        let entry = LedgerEntry::consumption(UserId::generate(), &charge);
        assert_eq!(entry.video_delta_millis, 0);
        assert_eq!(entry.metadata["from_allowance"], 2000);
    }

    #[test]
    fn purchase_grant_records_positive_delta() {
        let purchase = CreditPurchase::initiate(
            UserId::generate(),
            PurchaseQuantity::VideoSeconds(VideoSeconds::from_secs(12)),
            300,
            "pm",
        )
        .unwrap()
        .settle(&PaymentOutcome::Succeeded, "pay_9", Utc::now())
        .into_purchase();

        let entry = LedgerEntry::purchase_granted(&purchase);
        assert_eq!(entry.kind, EntryKind::PurchaseGranted);
        assert_eq!(entry.video_delta_millis, 12_000);
        assert_eq!(entry.metadata["external_payment_ref"], "pay_9");
    }

    #[test]
    fn entry_kind_names_round_trip() {
        for kind in [
            EntryKind::ScanConsumed,
            EntryKind::ReportConsumed,
            EntryKind::ImageConsumed,
            EntryKind::VideoConsumed,
            EntryKind::PurchaseGranted,
            EntryKind::TierChanged,
            EntryKind::PeriodReset,
        ] {
            assert_eq!(kind.as_str().parse::<EntryKind>(), Ok(kind));
        }
    }
}
