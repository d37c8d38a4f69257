//! End-to-end bookkeeping walkthroughs over the pure core types.

use chrono::{NaiveDate, Utc};
use gatmoney_core::{
    maybe_reset_period, Consumption, CreditPurchase, EntitlementError, PaymentOutcome,
    PeriodLength, PricingConfig, PurchaseQuantity, PurchaseStatus, Resource, Settlement, Tier,
    TierPolicy, UpsellPrompt, UserEntitlement, UserId, VideoSeconds,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn free_user_reaches_scan_limit_then_is_refused() {
    let policy = TierPolicy::default();
    let mut ent = UserEntitlement::new(UserId::generate(), date(2026, 3, 1));
    ent.scans_used_this_period = 9;

    let charge = Consumption::Scan.apply(&mut ent, &policy).unwrap();
    assert_eq!(charge.resource, Resource::Scan);
    assert_eq!(ent.scans_used_this_period, 10);

    let before = ent.clone();
    let err = Consumption::Scan.apply(&mut ent, &policy).unwrap_err();
    assert_eq!(
        err,
        EntitlementError::QuotaExceeded {
            resource: Resource::Scan,
            remaining: 0,
            requested: 1,
            prompt: UpsellPrompt::Upgrade {
                tier: Tier::Individual
            },
        }
    );
    assert_eq!(ent, before);
}

#[test]
fn completed_purchase_is_credited_once() {
    let pricing = PricingConfig::default();
    let mut ent = UserEntitlement::new(UserId::generate(), date(2026, 3, 1));
    let quantity = PurchaseQuantity::Images(10);
    let amount = pricing.quote(&quantity, ent.tier).unwrap();

    let purchase = CreditPurchase::initiate(ent.user_id, quantity, amount, "pm_card").unwrap();
    assert_eq!(purchase.status, PurchaseStatus::Pending);

    let Settlement::Applied(mut completed) =
        purchase.settle(&PaymentOutcome::Succeeded, "pay_1", Utc::now())
    else {
        panic!("pending purchase should settle");
    };
    assert!(completed.needs_grant());

    completed.grant_to(&mut ent).unwrap();
    completed.credited_at = Some(Utc::now());
    assert_eq!(ent.image_credits, 10);

    // A duplicate confirmation finds the purchase terminal and credits nothing.
    let duplicate = completed.settle(&PaymentOutcome::Succeeded, "pay_1", Utc::now());
    let Settlement::AlreadySettled(same) = duplicate else {
        panic!("completed purchase should not settle twice");
    };
    assert!(!same.needs_grant());
    assert!(same.grant_to(&mut ent).is_err());
    assert_eq!(ent.image_credits, 10);
}

#[test]
fn failed_purchase_is_never_credited() {
    let ent = UserEntitlement::new(UserId::generate(), date(2026, 3, 1));
    let purchase =
        CreditPurchase::initiate(ent.user_id, PurchaseQuantity::Images(10), 100, "pm").unwrap();

    let settled = purchase.settle(
        &PaymentOutcome::Failed {
            reason: Some("card_declined".into()),
        },
        "pay_2",
        Utc::now(),
    );
    let Settlement::Applied(failed) = settled else {
        panic!("pending purchase should settle");
    };

    assert_eq!(failed.status, PurchaseStatus::Failed);
    assert!(!failed.needs_grant());
}

#[test]
fn new_day_resets_counters_before_consuming() {
    let policy = TierPolicy::default();
    let mut ent = UserEntitlement::new(UserId::generate(), date(2026, 3, 1));
    ent.scans_used_this_period = 7;
    ent.image_credits = 3;

    let closed = maybe_reset_period(&mut ent, date(2026, 3, 2), PeriodLength::Daily).unwrap();
    assert_eq!(closed.scans_used, 7);
    assert_eq!(ent.scans_used_this_period, 0);
    assert_eq!(ent.period_anchor_date, date(2026, 3, 2));
    assert_eq!(ent.image_credits, 3);

    Consumption::Scan.apply(&mut ent, &policy).unwrap();
    assert_eq!(ent.scans_used_this_period, 1);
}

#[test]
fn monthly_period_spans_the_calendar_month() {
    let mut ent = UserEntitlement::new(UserId::generate(), date(2026, 3, 1));
    ent.scans_used_this_period = 4;

    assert!(maybe_reset_period(&mut ent, date(2026, 3, 31), PeriodLength::Monthly).is_none());
    assert_eq!(ent.scans_used_this_period, 4);

    assert!(maybe_reset_period(&mut ent, date(2026, 4, 1), PeriodLength::Monthly).is_some());
    assert_eq!(ent.scans_used_this_period, 0);
}

#[test]
fn video_longer_than_balance_is_refused_without_change() {
    let policy = TierPolicy::default();
    let mut ent = UserEntitlement::new(UserId::generate(), date(2026, 3, 1));
    ent.video_seconds_credits = VideoSeconds::from_millis(4500);
    let before = ent.clone();

    let err = Consumption::Video {
        seconds: VideoSeconds::from_secs(5),
    }
    .apply(&mut ent, &policy)
    .unwrap_err();

    assert!(matches!(
        err,
        EntitlementError::QuotaExceeded {
            resource: Resource::Video,
            prompt: UpsellPrompt::Purchase { .. },
            ..
        }
    ));
    assert_eq!(ent, before);
}

#[test]
fn included_allowance_is_spent_before_purchased_balance() {
    let policy = TierPolicy::default();
    let mut ent = UserEntitlement::new(UserId::generate(), date(2026, 3, 1));
    ent.change_tier(Tier::Individual);
    ent.image_credits = 2;

    for _ in 0..5 {
        let charge = Consumption::Image.apply(&mut ent, &policy).unwrap();
        assert_eq!((charge.from_allowance, charge.from_balance), (1, 0));
    }
    let charge = Consumption::Image.apply(&mut ent, &policy).unwrap();
    assert_eq!((charge.from_allowance, charge.from_balance), (0, 1));
    assert_eq!(ent.image_credits, 1);
}

#[test]
fn downgrade_keeps_usage_and_clamps_remaining() {
    let policy = TierPolicy::default();
    let mut ent = UserEntitlement::new(UserId::generate(), date(2026, 3, 1));
    ent.change_tier(Tier::Pro);
    ent.scans_used_this_period = 30;

    let previous = ent.change_tier(Tier::Free);

    assert_eq!(previous, Tier::Pro);
    assert_eq!(ent.scans_used_this_period, 30);
    assert_eq!(ent.scans_remaining(&policy), 0);
    assert!(Consumption::Scan.apply(&mut ent, &policy).is_err());
}
