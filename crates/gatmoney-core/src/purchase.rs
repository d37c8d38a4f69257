//! Credit purchases and their lifecycle.
//!
//! ```text
//!            settle(Succeeded)
//!   Pending ───────────────────▶ Completed ──(grant, once)──▶ credited
//!      │
//!      │     settle(Failed)
//!      └───────────────────────▶ Failed
//! ```
//!
//! Only a Pending record can be settled. Settling a terminal record is a
//! no-op, so a payment callback delivered twice never credits twice.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EntitlementError, Result};
use crate::{PurchaseId, UserEntitlement, UserId, VideoSeconds};

/// The kind of credit being bought.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Image credits.
    Image,
    /// Video seconds.
    Video,
}

impl ResourceType {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How much of a resource a purchase grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "unit", content = "amount", rename_all = "snake_case")]
pub enum PurchaseQuantity {
    /// A number of image credits.
    Images(i64),
    /// A duration of video.
    VideoSeconds(VideoSeconds),
}

impl PurchaseQuantity {
    /// The resource the quantity is measured in.
    #[must_use]
    pub const fn resource(&self) -> ResourceType {
        match self {
            Self::Images(_) => ResourceType::Image,
            Self::VideoSeconds(_) => ResourceType::Video,
        }
    }

    /// Raw amount: image count, or milliseconds of video.
    #[must_use]
    pub const fn raw_amount(&self) -> i64 {
        match self {
            Self::Images(count) => *count,
            Self::VideoSeconds(seconds) => seconds.as_millis(),
        }
    }

    /// Rebuild a quantity from its resource and raw amount.
    #[must_use]
    pub const fn from_raw(resource: ResourceType, amount: i64) -> Self {
        match resource {
            ResourceType::Image => Self::Images(amount),
            ResourceType::Video => Self::VideoSeconds(VideoSeconds::from_millis(amount)),
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Images(count) if *count <= 0 => Err(EntitlementError::InvalidQuantity(format!(
                "image purchase must be positive, got {count}"
            ))),
            Self::VideoSeconds(seconds) if seconds.is_zero() => Err(
                EntitlementError::InvalidQuantity("video purchase must be positive".into()),
            ),
            _ => Ok(()),
        }
    }
}

impl fmt::Display for PurchaseQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Images(count) => write!(f, "{count} images"),
            Self::VideoSeconds(seconds) => write!(f, "{seconds} of video"),
        }
    }
}

/// Lifecycle state of a purchase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    /// Recorded, waiting for the payment provider.
    Pending,
    /// Payment confirmed. Terminal.
    Completed,
    /// Payment declined or errored. Terminal.
    Failed,
}

impl PurchaseStatus {
    /// Whether the status is final.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PurchaseStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown purchase status: {other}")),
        }
    }
}

/// The result reported by the payment provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// The charge went through.
    Succeeded,
    /// The charge was declined or errored.
    Failed {
        /// Provider-supplied reason.
        #[serde(default)]
        reason: Option<String>,
    },
}

/// What happened when a settlement was applied to a purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
    /// The record moved out of Pending.
    Applied(CreditPurchase),
    /// The record was already terminal and was left unchanged.
    AlreadySettled(CreditPurchase),
}

impl Settlement {
    /// Consume the settlement, returning the purchase.
    #[must_use]
    pub fn into_purchase(self) -> CreditPurchase {
        match self {
            Self::Applied(p) | Self::AlreadySettled(p) => p,
        }
    }
}

/// A request to buy image credits or video seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditPurchase {
    /// Unique purchase ID (ULID).
    pub id: PurchaseId,

    /// The buyer.
    pub user_id: UserId,

    /// What is bought and how much.
    pub quantity: PurchaseQuantity,

    /// Price charged, in cents.
    pub amount_charged_cents: i64,

    /// Opaque payment method reference supplied by the client.
    pub payment_method: String,

    /// Lifecycle state.
    pub status: PurchaseStatus,

    /// Provider reference, set when the purchase leaves Pending.
    pub external_payment_ref: Option<String>,

    /// Why the payment failed, for Failed purchases.
    pub failure_reason: Option<String>,

    /// When the credits were added to the user's entitlement.
    pub credited_at: Option<DateTime<Utc>>,

    /// When the purchase was initiated.
    pub created_at: DateTime<Utc>,

    /// When the purchase reached a terminal state.
    pub settled_at: Option<DateTime<Utc>>,
}

impl CreditPurchase {
    /// Record a new Pending purchase.
    ///
    /// # Errors
    ///
    /// Returns [`EntitlementError::InvalidQuantity`] for a non-positive quantity
    /// and [`EntitlementError::InvalidAmount`] for a negative price.
    pub fn initiate(
        user_id: UserId,
        quantity: PurchaseQuantity,
        amount_charged_cents: i64,
        payment_method: impl Into<String>,
    ) -> Result<Self> {
        quantity.validate()?;
        if amount_charged_cents < 0 {
            return Err(EntitlementError::InvalidAmount(format!(
                "amount must not be negative, got {amount_charged_cents}"
            )));
        }
        Ok(Self {
            id: PurchaseId::generate(),
            user_id,
            quantity,
            amount_charged_cents,
            payment_method: payment_method.into(),
            status: PurchaseStatus::Pending,
            external_payment_ref: None,
            failure_reason: None,
            credited_at: None,
            created_at: Utc::now(),
            settled_at: None,
        })
    }

    /// The kind of credit bought.
    #[must_use]
    pub const fn resource(&self) -> ResourceType {
        self.quantity.resource()
    }

    /// Apply a payment outcome.
    ///
    /// Only a Pending purchase changes; a terminal one is returned untouched as
    /// [`Settlement::AlreadySettled`].
    #[must_use]
    pub fn settle(
        mut self,
        outcome: &PaymentOutcome,
        payment_ref: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Settlement {
        if self.status.is_terminal() {
            return Settlement::AlreadySettled(self);
        }
        match outcome {
            PaymentOutcome::Succeeded => self.status = PurchaseStatus::Completed,
            PaymentOutcome::Failed { reason } => {
                self.status = PurchaseStatus::Failed;
                self.failure_reason.clone_from(reason);
            }
        }
        self.external_payment_ref = Some(payment_ref.into());
        self.settled_at = Some(now);
        Settlement::Applied(self)
    }

    /// Whether the purchase is paid but its credits have not been granted yet.
    #[must_use]
    pub fn needs_grant(&self) -> bool {
        self.status == PurchaseStatus::Completed && self.credited_at.is_none()
    }

    /// Add the purchased quantity to an entitlement.
    ///
    /// # Errors
    ///
    /// Returns [`EntitlementError::CreditGrantFailure`] if the purchase is not
    /// awaiting a grant, belongs to another user, or the balance overflows.
    pub fn grant_to(&self, entitlement: &mut UserEntitlement) -> Result<()> {
        let failure = |reason: String| EntitlementError::CreditGrantFailure {
            purchase_id: self.id,
            reason,
        };
        if !self.needs_grant() {
            return Err(failure(format!(
                "purchase is {} and credited_at={:?}",
                self.status, self.credited_at
            )));
        }
        if entitlement.user_id != self.user_id {
            return Err(failure("entitlement belongs to another user".into()));
        }
        let applied = match self.quantity {
            PurchaseQuantity::Images(count) => entitlement.credit_images(count),
            PurchaseQuantity::VideoSeconds(seconds) => entitlement.credit_video(seconds),
        };
        applied.map_err(|e| failure(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn pending(quantity: PurchaseQuantity) -> CreditPurchase {
        CreditPurchase::initiate(UserId::generate(), quantity, 100, "pm_card").unwrap()
    }

    #[test]
    fn initiate_creates_pending_record() {
        let purchase = pending(PurchaseQuantity::Images(10));
        assert_eq!(purchase.status, PurchaseStatus::Pending);
        assert_eq!(purchase.resource(), ResourceType::Image);
        assert!(purchase.external_payment_ref.is_none());
        assert!(!purchase.needs_grant());
    }

    #[test]
    fn initiate_rejects_empty_quantities() {
        let user = UserId::generate();
        assert!(CreditPurchase::initiate(user, PurchaseQuantity::Images(0), 0, "pm").is_err());
        assert!(CreditPurchase::initiate(
            user,
            PurchaseQuantity::VideoSeconds(VideoSeconds::ZERO),
            0,
            "pm"
        )
        .is_err());
        assert!(matches!(
            CreditPurchase::initiate(user, PurchaseQuantity::Images(1), -5, "pm"),
            Err(EntitlementError::InvalidAmount(_))
        ));
    }

    #[test]
    fn success_completes_and_awaits_grant() {
        let purchase = pending(PurchaseQuantity::Images(10));
        let settlement = purchase.settle(&PaymentOutcome::Succeeded, "pay_1", Utc::now());

        let Settlement::Applied(completed) = settlement else {
            panic!("expected applied settlement");
        };
        assert_eq!(completed.status, PurchaseStatus::Completed);
        assert_eq!(completed.external_payment_ref.as_deref(), Some("pay_1"));
        assert!(completed.needs_grant());
    }

    #[test]
    fn failure_is_terminal_without_grant() {
        let purchase = pending(PurchaseQuantity::Images(10));
        let failed = purchase
            .settle(
                &PaymentOutcome::Failed {
                    reason: Some("card_declined".into()),
                },
                "pay_2",
                Utc::now(),
            )
            .into_purchase();

        assert_eq!(failed.status, PurchaseStatus::Failed);
        assert_eq!(failed.failure_reason.as_deref(), Some("card_declined"));
        assert!(!failed.needs_grant());
    }

    #[test]
    fn settling_twice_is_a_no_op() {
        let purchase = pending(PurchaseQuantity::Images(10));
        let completed = purchase
            .settle(&PaymentOutcome::Succeeded, "pay_1", Utc::now())
            .into_purchase();

        let again = completed.clone().settle(
            &PaymentOutcome::Failed { reason: None },
            "pay_other",
            Utc::now(),
        );

        assert_eq!(again, Settlement::AlreadySettled(completed));
    }

    #[test]
    fn grant_adds_quantity_to_matching_balance() {
        let mut purchase = pending(PurchaseQuantity::VideoSeconds(VideoSeconds::from_millis(7500)));
        let mut ent = UserEntitlement::new(
            purchase.user_id,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        );
        purchase = purchase
            .settle(&PaymentOutcome::Succeeded, "pay", Utc::now())
            .into_purchase();

        purchase.grant_to(&mut ent).unwrap();

        assert_eq!(ent.video_seconds_credits.as_millis(), 7500);
        assert_eq!(ent.image_credits, 0);
    }

    #[test]
    fn grant_refuses_pending_or_credited_purchases() {
        let purchase = pending(PurchaseQuantity::Images(3));
        let mut ent = UserEntitlement::new(
            purchase.user_id,
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        );
        assert!(purchase.grant_to(&mut ent).is_err());

        let mut completed = purchase
            .settle(&PaymentOutcome::Succeeded, "pay", Utc::now())
            .into_purchase();
        completed.credited_at = Some(Utc::now());
        assert!(matches!(
            completed.grant_to(&mut ent),
            Err(EntitlementError::CreditGrantFailure { .. })
        ));
        assert_eq!(ent.image_credits, 0);
    }

    #[test]
    fn grant_refuses_another_users_entitlement() {
        let completed = pending(PurchaseQuantity::Images(3))
            .settle(&PaymentOutcome::Succeeded, "pay", Utc::now())
            .into_purchase();
        let mut other = UserEntitlement::new(
            UserId::generate(),
            NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
        );
        assert!(completed.grant_to(&mut other).is_err());
    }

    #[test]
    fn quantity_raw_amount_round_trips() {
        let video = PurchaseQuantity::VideoSeconds(VideoSeconds::from_millis(1500));
        assert_eq!(
            PurchaseQuantity::from_raw(video.resource(), video.raw_amount()),
            video
        );
    }
}
