//! Counting-period rollover.
//!
//! A period boundary is a change of calendar date (or month), not a fixed
//! duration since last use: a scan at 23:59 and another at 00:01 fall in
//! different daily periods.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::{UserEntitlement, VideoSeconds};

/// How long a counting period lasts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodLength {
    /// A new period starts every calendar day.
    #[default]
    Daily,
    /// A new period starts every calendar month.
    Monthly,
}

impl PeriodLength {
    /// Whether two dates fall in the same period.
    #[must_use]
    pub fn same_period(self, anchor: NaiveDate, today: NaiveDate) -> bool {
        match self {
            Self::Daily => anchor == today,
            Self::Monthly => anchor.year() == today.year() && anchor.month() == today.month(),
        }
    }
}

impl fmt::Display for PeriodLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => f.write_str("daily"),
            Self::Monthly => f.write_str("monthly"),
        }
    }
}

impl FromStr for PeriodLength {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "monthly" => Ok(Self::Monthly),
            other => Err(format!("unknown period length: {other}")),
        }
    }
}

/// Counters as they stood when a period was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClosedPeriod {
    /// First day of the closed period.
    pub anchor: NaiveDate,
    /// Scans used in it.
    pub scans_used: u32,
    /// Reports used in it.
    pub reports_used: u32,
}

/// Roll the entitlement into the period containing `today`, if needed.
///
/// Zeroes the period-scoped counters and moves the anchor to `today`.
/// Purchased image and video balances are left alone. A `today` earlier than
/// the anchor (clock skew between writers) never triggers a reset.
///
/// Returns the closed period when a reset happened. Calling it again on the
/// same day is a no-op.
pub fn maybe_reset_period(
    entitlement: &mut UserEntitlement,
    today: NaiveDate,
    period: PeriodLength,
) -> Option<ClosedPeriod> {
    if entitlement.is_current(today, period) {
        return None;
    }

    let closed = ClosedPeriod {
        anchor: entitlement.period_anchor_date,
        scans_used: entitlement.scans_used_this_period,
        reports_used: entitlement.reports_used_this_period,
    };

    entitlement.scans_used_this_period = 0;
    entitlement.reports_used_this_period = 0;
    entitlement.included_images_used = 0;
    entitlement.included_video_used = VideoSeconds::ZERO;
    entitlement.period_anchor_date = today;

    Some(closed)
}
