//! Fractional video-second balances.
//!
//! Video generation is metered in seconds, and a request may consume a partial
//! second. Balances are stored as an integer number of milliseconds so that
//! additions and subtractions are exact.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Milliseconds in one second.
pub const MILLIS_PER_SECOND: i64 = 1000;

/// A non-negative quantity of video seconds with millisecond resolution.
///
/// Serialized as a millisecond count; a negative count fails to deserialize.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct VideoSeconds(i64);

impl VideoSeconds {
    /// Zero seconds.
    pub const ZERO: Self = Self(0);

    /// Create a quantity from milliseconds. Negative input is clamped to zero.
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        if millis < 0 {
            Self(0)
        } else {
            Self(millis)
        }
    }

    /// Create a quantity from whole seconds.
    #[must_use]
    pub const fn from_secs(secs: i64) -> Self {
        Self::from_millis(secs.saturating_mul(MILLIS_PER_SECOND))
    }

    /// Create a quantity from fractional seconds, rounded to the nearest millisecond.
    ///
    /// Returns `None` for NaN, infinite, negative or out-of-range input.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    pub fn from_secs_f64(secs: f64) -> Option<Self> {
        if !secs.is_finite() || secs < 0.0 {
            return None;
        }
        let millis = (secs * 1000.0).round();
        // i64::MAX as f64 rounds up, so compare with >= to stay in range.
        if millis >= i64::MAX as f64 {
            return None;
        }
        Some(Self(millis as i64))
    }

    /// The quantity in milliseconds.
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// The quantity in (fractional) seconds.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// Whether the quantity is zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Add two quantities, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Subtract `other`, returning `None` if the result would be negative.
    #[must_use]
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        if other.0 > self.0 {
            None
        } else {
            Some(Self(self.0 - other.0))
        }
    }

    /// Subtract `other`, stopping at zero.
    #[must_use]
    pub fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0).max(0))
    }
}

/// A negative millisecond count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("video seconds must not be negative, got {0} ms")]
pub struct NegativeVideoSeconds(pub i64);

impl TryFrom<i64> for VideoSeconds {
    type Error = NegativeVideoSeconds;

    fn try_from(millis: i64) -> Result<Self, Self::Error> {
        if millis < 0 {
            return Err(NegativeVideoSeconds(millis));
        }
        Ok(Self(millis))
    }
}

impl From<VideoSeconds> for i64 {
    fn from(seconds: VideoSeconds) -> Self {
        seconds.0
    }
}

impl fmt::Display for VideoSeconds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / MILLIS_PER_SECOND;
        let frac = self.0 % MILLIS_PER_SECOND;
        if frac == 0 {
            write!(f, "{whole}s")
        } else {
            let frac = format!("{frac:03}");
            write!(f, "{whole}.{}s", frac.trim_end_matches('0'))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fractional_seconds_round_to_millis() {
        let secs = VideoSeconds::from_secs_f64(4.5).unwrap();
        assert_eq!(secs.as_millis(), 4500);
        assert_eq!(VideoSeconds::from_secs_f64(0.0004).unwrap(), VideoSeconds::ZERO);
        assert_eq!(VideoSeconds::from_secs_f64(0.0006).unwrap().as_millis(), 1);
    }

    #[test]
    fn invalid_seconds_are_rejected() {
        assert!(VideoSeconds::from_secs_f64(-1.0).is_none());
        assert!(VideoSeconds::from_secs_f64(f64::NAN).is_none());
        assert!(VideoSeconds::from_secs_f64(f64::INFINITY).is_none());
    }

    #[test]
    fn checked_sub_never_goes_negative() {
        let balance = VideoSeconds::from_millis(4500);
        assert!(balance.checked_sub(VideoSeconds::from_secs(5)).is_none());
        assert_eq!(
            balance.checked_sub(VideoSeconds::from_millis(4500)),
            Some(VideoSeconds::ZERO)
        );
    }

    #[test]
    fn negative_millis_fail_to_deserialize() {
        assert_eq!(
            serde_json::from_str::<VideoSeconds>("4500").unwrap(),
            VideoSeconds::from_millis(4500)
        );
        let err = serde_json::from_str::<VideoSeconds>("-5000").unwrap_err();
        assert!(err.to_string().contains("must not be negative"));
        assert_eq!(serde_json::to_string(&VideoSeconds::from_secs(2)).unwrap(), "2000");
    }

    #[test]
    fn display_trims_trailing_zeros() {
        assert_eq!(VideoSeconds::from_millis(4500).to_string(), "4.5s");
        assert_eq!(VideoSeconds::from_millis(4050).to_string(), "4.05s");
        assert_eq!(VideoSeconds::from_secs(30).to_string(), "30s");
    }
}
