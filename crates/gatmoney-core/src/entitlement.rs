//! The per-user entitlement record.
//!
//! A [`UserEntitlement`] holds a user's tier, the counters for the current
//! period, and purchased media balances. It is only ever mutated through the
//! quota operations (consumption), the purchase grant (top-up), the period
//! reset, and [`UserEntitlement::change_tier`].

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EntitlementError, Result};
use crate::{PeriodLength, Tier, TierPolicy, UserId, VideoSeconds};

/// The mutable per-user record of tier and remaining consumable balances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserEntitlement {
    /// The owning user.
    pub user_id: UserId,

    /// Current subscription tier.
    pub tier: Tier,

    /// Scans used since `period_anchor_date`.
    pub scans_used_this_period: u32,

    /// Reports used since `period_anchor_date`.
    pub reports_used_this_period: u32,

    /// Tier-included image generations used this period.
    pub included_images_used: u32,

    /// Tier-included video seconds used this period.
    pub included_video_used: VideoSeconds,

    /// The calendar date the current counting period started.
    pub period_anchor_date: NaiveDate,

    /// Purchased image credits. Never reset by period rollover.
    pub image_credits: i64,

    /// Purchased video seconds. Never reset by period rollover.
    pub video_seconds_credits: VideoSeconds,

    /// Row version for compare-and-swap writes. Bumped by the store on every write.
    pub version: u64,

    /// When the record was created.
    pub created_at: DateTime<Utc>,

    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

impl UserEntitlement {
    /// Create a fresh Free-tier entitlement with every counter at zero.
    #[must_use]
    pub fn new(user_id: UserId, today: NaiveDate) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            tier: Tier::Free,
            scans_used_this_period: 0,
            reports_used_this_period: 0,
            included_images_used: 0,
            included_video_used: VideoSeconds::ZERO,
            period_anchor_date: today,
            image_credits: 0,
            video_seconds_credits: VideoSeconds::ZERO,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the counters belong to the period containing `today`.
    ///
    /// Quota checks must only run on a current record.
    #[must_use]
    pub fn is_current(&self, today: NaiveDate, period: PeriodLength) -> bool {
        today < self.period_anchor_date || period.same_period(self.period_anchor_date, today)
    }

    /// Scans left in the current period.
    #[must_use]
    pub fn scans_remaining(&self, policy: &TierPolicy) -> u32 {
        policy
            .limits_for(self.tier)
            .max_scans_per_period
            .saturating_sub(self.scans_used_this_period)
    }

    /// Reports left in the current period.
    #[must_use]
    pub fn reports_remaining(&self, policy: &TierPolicy) -> u32 {
        policy
            .limits_for(self.tier)
            .max_reports_per_period
            .saturating_sub(self.reports_used_this_period)
    }

    /// Tier-included image generations left in the current period.
    #[must_use]
    pub fn included_images_remaining(&self, policy: &TierPolicy) -> u32 {
        policy
            .limits_for(self.tier)
            .included_image_credits_per_period
            .saturating_sub(self.included_images_used)
    }

    /// Tier-included video seconds left in the current period.
    #[must_use]
    pub fn included_video_remaining(&self, policy: &TierPolicy) -> VideoSeconds {
        policy
            .limits_for(self.tier)
            .included_video_seconds_per_period
            .saturating_sub(self.included_video_used)
    }

    /// Move the user to another tier.
    ///
    /// Period counters are kept: a mid-period upgrade immediately widens the
    /// allowance, a downgrade may leave the user at or over the new limit.
    /// Returns the previous tier.
    pub fn change_tier(&mut self, tier: Tier) -> Tier {
        std::mem::replace(&mut self.tier, tier)
    }

    /// Add purchased image credits.
    ///
    /// # Errors
    ///
    /// Returns [`EntitlementError::InvalidQuantity`] for a non-positive count or
    /// if the balance would overflow.
    pub fn credit_images(&mut self, count: i64) -> Result<()> {
        if count <= 0 {
            return Err(EntitlementError::InvalidQuantity(format!(
                "image credit grant must be positive, got {count}"
            )));
        }
        self.image_credits = self
            .image_credits
            .checked_add(count)
            .ok_or_else(|| EntitlementError::InvalidQuantity("image balance overflow".into()))?;
        Ok(())
    }

    /// Add purchased video seconds.
    ///
    /// # Errors
    ///
    /// Returns [`EntitlementError::InvalidQuantity`] for a zero quantity or if
    /// the balance would overflow.
    pub fn credit_video(&mut self, seconds: VideoSeconds) -> Result<()> {
        if seconds.is_zero() {
            return Err(EntitlementError::InvalidQuantity(
                "video grant must be positive".into(),
            ));
        }
        self.video_seconds_credits = self
            .video_seconds_credits
            .checked_add(seconds)
            .ok_or_else(|| EntitlementError::InvalidQuantity("video balance overflow".into()))?;
        Ok(())
    }
}
