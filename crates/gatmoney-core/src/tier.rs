//! Subscription tiers and the tier policy table.
//!
//! A [`TierPolicy`] maps every [`Tier`] to the [`TierLimits`] it grants. The
//! policy is process-wide configuration, loaded once at startup and validated
//! for monotonicity before the service accepts traffic.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::VideoSeconds;

// ============================================================================
// Default limits
// ============================================================================

/// Free tier scans per period.
pub const FREE_MAX_SCANS: u32 = 10;

/// Individual tier scans per period.
pub const INDIVIDUAL_MAX_SCANS: u32 = 50;

/// Pro tier scans per period.
pub const PRO_MAX_SCANS: u32 = 200;

/// Business tier scans per period.
pub const BUSINESS_MAX_SCANS: u32 = 1000;

/// Subscription levels, ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Default tier for every new user.
    Free,
    /// Single-seat paid plan.
    Individual,
    /// Power-user plan.
    Pro,
    /// Team plan.
    Business,
}

impl Tier {
    /// Every tier, lowest first.
    pub const ALL: [Self; 4] = [Self::Free, Self::Individual, Self::Pro, Self::Business];

    /// The tier a user would upgrade to from this one.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::Free => Some(Self::Individual),
            Self::Individual => Some(Self::Pro),
            Self::Pro => Some(Self::Business),
            Self::Business => None,
        }
    }

    /// Stable lowercase name, as used in storage and the API.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Individual => "individual",
            Self::Pro => "pro",
            Self::Business => "business",
        }
    }

    /// Discount applied to one-time credit purchases, in percent.
    #[must_use]
    pub const fn purchase_discount_percent(self) -> u8 {
        match self {
            Self::Free | Self::Individual => 0,
            Self::Pro => 10,
            Self::Business => 20,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "individual" => Ok(Self::Individual),
            "pro" => Ok(Self::Pro),
            "business" => Ok(Self::Business),
            other => Err(PolicyError::UnknownTier(other.to_string())),
        }
    }
}

/// Resource limits granted by a tier for each counting period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierLimits {
    /// Scans (market/gig generations) allowed per period.
    pub max_scans_per_period: u32,

    /// Reports allowed per period.
    pub max_reports_per_period: u32,

    /// Image generations included with the tier each period, before purchased
    /// credits are drawn.
    pub included_image_credits_per_period: u32,

    /// Video seconds included with the tier each period, before purchased
    /// seconds are drawn.
    pub included_video_seconds_per_period: VideoSeconds,
}

impl TierLimits {
    /// Whether every limit in `self` is at least the matching limit in `other`.
    ///
    /// Returns the name of the first field that is lower, if any.
    #[must_use]
    pub fn first_field_below(&self, other: &Self) -> Option<&'static str> {
        if self.max_scans_per_period < other.max_scans_per_period {
            Some("max_scans_per_period")
        } else if self.max_reports_per_period < other.max_reports_per_period {
            Some("max_reports_per_period")
        } else if self.included_image_credits_per_period < other.included_image_credits_per_period
        {
            Some("included_image_credits_per_period")
        } else if self.included_video_seconds_per_period < other.included_video_seconds_per_period
        {
            Some("included_video_seconds_per_period")
        } else {
            None
        }
    }
}

/// The tier → limits table.
///
/// One field per tier makes the table total over [`Tier`]: a policy file that
/// omits a tier fails to deserialize instead of failing at lookup time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierPolicy {
    /// Limits for [`Tier::Free`].
    pub free: TierLimits,
    /// Limits for [`Tier::Individual`].
    pub individual: TierLimits,
    /// Limits for [`Tier::Pro`].
    pub pro: TierLimits,
    /// Limits for [`Tier::Business`].
    pub business: TierLimits,
}

impl TierPolicy {
    /// Look up the limits for a tier.
    #[must_use]
    pub const fn limits_for(&self, tier: Tier) -> &TierLimits {
        match tier {
            Tier::Free => &self.free,
            Tier::Individual => &self.individual,
            Tier::Pro => &self.pro,
            Tier::Business => &self.business,
        }
    }

    /// Check that each higher tier's limits dominate the tier below it.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::NotMonotonic`] naming the first offending pair.
    pub fn validate(&self) -> Result<(), PolicyError> {
        for pair in Tier::ALL.windows(2) {
            let (lower, higher) = (pair[0], pair[1]);
            if let Some(field) = self
                .limits_for(higher)
                .first_field_below(self.limits_for(lower))
            {
                return Err(PolicyError::NotMonotonic {
                    lower,
                    higher,
                    field,
                });
            }
        }
        Ok(())
    }

    /// Parse and validate a policy from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Invalid`] if the JSON does not describe every tier,
    /// or [`PolicyError::NotMonotonic`] if validation fails.
    pub fn from_json(json: &str) -> Result<Self, PolicyError> {
        let policy: Self =
            serde_json::from_str(json).map_err(|e| PolicyError::Invalid(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self {
            free: TierLimits {
                max_scans_per_period: FREE_MAX_SCANS,
                max_reports_per_period: 3,
                included_image_credits_per_period: 0,
                included_video_seconds_per_period: VideoSeconds::ZERO,
            },
            individual: TierLimits {
                max_scans_per_period: INDIVIDUAL_MAX_SCANS,
                max_reports_per_period: 10,
                included_image_credits_per_period: 5,
                included_video_seconds_per_period: VideoSeconds::ZERO,
            },
            pro: TierLimits {
                max_scans_per_period: PRO_MAX_SCANS,
                max_reports_per_period: 50,
                included_image_credits_per_period: 20,
                included_video_seconds_per_period: VideoSeconds::from_secs(30),
            },
            business: TierLimits {
                max_scans_per_period: BUSINESS_MAX_SCANS,
                max_reports_per_period: 250,
                included_image_credits_per_period: 100,
                included_video_seconds_per_period: VideoSeconds::from_secs(120),
            },
        }
    }
}

/// Tier policy configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    /// A higher tier grants less of some resource than the tier below it.
    #[error("tier {higher} has a lower {field} than tier {lower}")]
    NotMonotonic {
        /// The lower tier.
        lower: Tier,
        /// The higher tier with the smaller limit.
        higher: Tier,
        /// The offending field.
        field: &'static str,
    },

    /// The policy document could not be parsed.
    #[error("invalid tier policy: {0}")]
    Invalid(String),

    /// A tier name did not match any known tier.
    #[error("unknown tier: {0}")]
    UnknownTier(String),
}
