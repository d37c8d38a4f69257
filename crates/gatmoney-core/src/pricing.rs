//! Pricing for one-time credit purchases.
//!
//! Prices are integer cents. Paid tiers get a percentage discount on top-ups,
//! and partial cents are always rounded up.

use serde::{Deserialize, Serialize};

use crate::error::{EntitlementError, Result};
use crate::{PurchaseQuantity, Tier};

/// Default price of one image credit, in cents.
pub const DEFAULT_IMAGE_CREDIT_PRICE_CENTS: i64 = 10;

/// Default price of one second of video, in cents.
pub const DEFAULT_VIDEO_SECOND_PRICE_CENTS: i64 = 25;

/// Default minimum purchase, in cents ($1).
pub const DEFAULT_MIN_PURCHASE_CENTS: i64 = 100;

/// Default maximum purchase, in cents ($500).
pub const DEFAULT_MAX_PURCHASE_CENTS: i64 = 50_000;

/// Price list for credit purchases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PricingConfig {
    /// Price of one image credit, in cents.
    pub image_credit_price_cents: i64,

    /// Price of one second of video, in cents.
    pub video_second_price_cents: i64,

    /// Smallest accepted charge after discount, in cents.
    pub min_purchase_cents: i64,

    /// Largest accepted charge after discount, in cents.
    pub max_purchase_cents: i64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            image_credit_price_cents: DEFAULT_IMAGE_CREDIT_PRICE_CENTS,
            video_second_price_cents: DEFAULT_VIDEO_SECOND_PRICE_CENTS,
            min_purchase_cents: DEFAULT_MIN_PURCHASE_CENTS,
            max_purchase_cents: DEFAULT_MAX_PURCHASE_CENTS,
        }
    }
}

impl PricingConfig {
    /// Price a purchase for a user on `tier`, in cents.
    ///
    /// # Errors
    ///
    /// Returns [`EntitlementError::InvalidQuantity`] for a non-positive or
    /// overflowing quantity and [`EntitlementError::InvalidAmount`] when the
    /// price falls outside `[min_purchase_cents, max_purchase_cents]`.
    pub fn quote(&self, quantity: &PurchaseQuantity, tier: Tier) -> Result<i64> {
        let list_price = match quantity {
            PurchaseQuantity::Images(count) if *count > 0 => {
                count.checked_mul(self.image_credit_price_cents)
            }
            // Price per second, billed per millisecond: price * millis / 1000, rounded up.
            PurchaseQuantity::VideoSeconds(seconds) if !seconds.is_zero() => seconds
                .as_millis()
                .checked_mul(self.video_second_price_cents)
                .map(|milli_cents| div_ceil(milli_cents, 1000)),
            _ => {
                return Err(EntitlementError::InvalidQuantity(format!(
                    "cannot price {quantity}"
                )))
            }
        }
        .ok_or_else(|| EntitlementError::InvalidQuantity("purchase too large".into()))?;

        let discount = i64::from(tier.purchase_discount_percent());
        let amount = list_price
            .checked_mul(100 - discount)
            .map(|v| div_ceil(v, 100))
            .ok_or_else(|| EntitlementError::InvalidQuantity("purchase too large".into()))?;

        if amount < self.min_purchase_cents {
            return Err(EntitlementError::InvalidAmount(format!(
                "minimum purchase is {} cents, got {amount}",
                self.min_purchase_cents
            )));
        }
        if amount > self.max_purchase_cents {
            return Err(EntitlementError::InvalidAmount(format!(
                "maximum purchase is {} cents, got {amount}",
                self.max_purchase_cents
            )));
        }
        Ok(amount)
    }
}

/// Ceiling division for non-negative values.
const fn div_ceil(value: i64, divisor: i64) -> i64 {
    value / divisor + (value % divisor != 0) as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::VideoSeconds;

    #[test]
    fn image_price_is_count_times_unit_price() {
        let pricing = PricingConfig::default();
        let quote = pricing.quote(&PurchaseQuantity::Images(10), Tier::Free).unwrap();
        assert_eq!(quote, 100);
    }

    #[test]
    fn partial_video_seconds_round_up() {
        let pricing = PricingConfig::default();
        // 4.5s * 25c = 112.5c -> 113c
        let quote = pricing
            .quote(
                &PurchaseQuantity::VideoSeconds(VideoSeconds::from_millis(4500)),
                Tier::Free,
            )
            .unwrap();
        assert_eq!(quote, 113);
    }

    #[test]
    fn paid_tiers_get_a_discount() {
        let pricing = PricingConfig::default();
        let quantity = PurchaseQuantity::Images(100);
        assert_eq!(pricing.quote(&quantity, Tier::Individual).unwrap(), 1000);
        assert_eq!(pricing.quote(&quantity, Tier::Pro).unwrap(), 900);
        assert_eq!(pricing.quote(&quantity, Tier::Business).unwrap(), 800);
    }

    #[test]
    fn out_of_range_purchases_are_rejected() {
        let pricing = PricingConfig::default();
        assert!(matches!(
            pricing.quote(&PurchaseQuantity::Images(1), Tier::Free),
            Err(EntitlementError::InvalidAmount(_))
        ));
        assert!(matches!(
            pricing.quote(&PurchaseQuantity::Images(1_000_000), Tier::Free),
            Err(EntitlementError::InvalidAmount(_))
        ));
        assert!(matches!(
            pricing.quote(&PurchaseQuantity::Images(0), Tier::Free),
            Err(EntitlementError::InvalidQuantity(_))
        ));
        assert!(matches!(
            pricing.quote(&PurchaseQuantity::Images(i64::MAX), Tier::Free),
            Err(EntitlementError::InvalidQuantity(_))
        ));
    }
}
