//! Quota enforcement.
//!
//! Each `try_consume_*` operation checks the allowance and applies the
//! mutation as one step: on success the entitlement is updated, on failure it
//! is left exactly as it was. Callers are expected to invoke these only after
//! the paid action has succeeded, and only on a record whose period is
//! current (see [`crate::maybe_reset_period`]).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{EntitlementError, Result, UpsellPrompt};
use crate::{ResourceType, TierPolicy, UserEntitlement, VideoSeconds};

/// A metered resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    /// Market/gig generation.
    Scan,
    /// Report generation.
    Report,
    /// Image generation or edit.
    Image,
    /// Video generation, metered in seconds.
    Video,
}

impl Resource {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Report => "report",
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a successful consumption drew down.
///
/// Amounts are in the resource's unit: a count, or milliseconds for video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Charge {
    /// The resource consumed.
    pub resource: Resource,
    /// Taken from the tier's per-period allowance.
    pub from_allowance: i64,
    /// Taken from purchased balance.
    pub from_balance: i64,
}

impl Charge {
    /// Total amount consumed.
    #[must_use]
    pub const fn total(&self) -> i64 {
        self.from_allowance + self.from_balance
    }
}

/// A request to consume one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Consumption {
    /// One scan.
    Scan,
    /// One report.
    Report,
    /// One image.
    Image,
    /// Some seconds of video.
    Video {
        /// Seconds to consume.
        seconds: VideoSeconds,
    },
}

impl Consumption {
    /// The resource this consumption draws on.
    #[must_use]
    pub const fn resource(&self) -> Resource {
        match self {
            Self::Scan => Resource::Scan,
            Self::Report => Resource::Report,
            Self::Image => Resource::Image,
            Self::Video { .. } => Resource::Video,
        }
    }

    /// Apply the consumption to an entitlement.
    ///
    /// # Errors
    ///
    /// Returns [`EntitlementError::QuotaExceeded`] with the entitlement
    /// unchanged when the allowance is insufficient.
    pub fn apply(&self, entitlement: &mut UserEntitlement, policy: &TierPolicy) -> Result<Charge> {
        match *self {
            Self::Scan => entitlement.try_consume_scan(policy),
            Self::Report => entitlement.try_consume_report(policy),
            Self::Image => entitlement.try_consume_image_credit(policy),
            Self::Video { seconds } => entitlement.try_consume_video_seconds(policy, seconds),
        }
    }
}

impl UserEntitlement {
    fn period_prompt(&self) -> UpsellPrompt {
        self.tier
            .next()
            .map_or(UpsellPrompt::WaitForReset, |tier| UpsellPrompt::Upgrade { tier })
    }

    /// Consume one scan. Allowed iff `scans_used_this_period < max_scans`.
    ///
    /// # Errors
    ///
    /// Returns [`EntitlementError::QuotaExceeded`] when the period's scans are used up.
    pub fn try_consume_scan(&mut self, policy: &TierPolicy) -> Result<Charge> {
        let max = policy.limits_for(self.tier).max_scans_per_period;
        if self.scans_used_this_period >= max {
            return Err(EntitlementError::QuotaExceeded {
                resource: Resource::Scan,
                remaining: 0,
                requested: 1,
                prompt: self.period_prompt(),
            });
        }
        self.scans_used_this_period += 1;
        Ok(Charge {
            resource: Resource::Scan,
            from_allowance: 1,
            from_balance: 0,
        })
    }

    /// Consume one report. Allowed iff `reports_used_this_period < max_reports`.
    ///
    /// # Errors
    ///
    /// Returns [`EntitlementError::QuotaExceeded`] when the period's reports are used up.
    pub fn try_consume_report(&mut self, policy: &TierPolicy) -> Result<Charge> {
        let max = policy.limits_for(self.tier).max_reports_per_period;
        if self.reports_used_this_period >= max {
            return Err(EntitlementError::QuotaExceeded {
                resource: Resource::Report,
                remaining: 0,
                requested: 1,
                prompt: self.period_prompt(),
            });
        }
        self.reports_used_this_period += 1;
        Ok(Charge {
            resource: Resource::Report,
            from_allowance: 1,
            from_balance: 0,
        })
    }

    /// Consume one image credit.
    ///
    /// The tier's included images are used first, then purchased
    /// `image_credits`, which are decremented by exactly one.
    ///
    /// # Errors
    ///
    /// Returns [`EntitlementError::QuotaExceeded`] when neither is available.
    pub fn try_consume_image_credit(&mut self, policy: &TierPolicy) -> Result<Charge> {
        if self.included_images_remaining(policy) > 0 {
            self.included_images_used += 1;
            return Ok(Charge {
                resource: Resource::Image,
                from_allowance: 1,
                from_balance: 0,
            });
        }
        if self.image_credits <= 0 {
            return Err(EntitlementError::QuotaExceeded {
                resource: Resource::Image,
                remaining: 0,
                requested: 1,
                prompt: UpsellPrompt::Purchase {
                    resource: ResourceType::Image,
                },
            });
        }
        self.image_credits -= 1;
        Ok(Charge {
            resource: Resource::Image,
            from_allowance: 0,
            from_balance: 1,
        })
    }

    /// Consume `seconds` of video.
    ///
    /// Allowed iff included seconds left plus `video_seconds_credits` cover the
    /// request. The included allowance is drawn first.
    ///
    /// # Errors
    ///
    /// Returns [`EntitlementError::InvalidQuantity`] for a zero request and
    /// [`EntitlementError::QuotaExceeded`] when the balance is short.
    pub fn try_consume_video_seconds(
        &mut self,
        policy: &TierPolicy,
        seconds: VideoSeconds,
    ) -> Result<Charge> {
        if seconds.is_zero() {
            return Err(EntitlementError::InvalidQuantity(
                "video consumption must be positive".into(),
            ));
        }

        let included = self.included_video_remaining(policy);
        let available = included
            .checked_add(self.video_seconds_credits)
            .unwrap_or(VideoSeconds::from_millis(i64::MAX));
        if available < seconds {
            return Err(EntitlementError::QuotaExceeded {
                resource: Resource::Video,
                remaining: available.as_millis(),
                requested: seconds.as_millis(),
                prompt: UpsellPrompt::Purchase {
                    resource: ResourceType::Video,
                },
            });
        }

        let from_allowance = included.min(seconds);
        let from_balance = seconds.saturating_sub(from_allowance);

        // Both subtractions are covered by the `available` check above.
        self.included_video_used = self
            .included_video_used
            .checked_add(from_allowance)
            .unwrap_or(self.included_video_used);
        self.video_seconds_credits = self.video_seconds_credits.saturating_sub(from_balance);

        Ok(Charge {
            resource: Resource::Video,
            from_allowance: from_allowance.as_millis(),
            from_balance: from_balance.as_millis(),
        })
    }
}
