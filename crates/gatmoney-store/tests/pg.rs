//! PostgreSQL backend tests.
//!
//! These run only when `TEST_DATABASE_URL` points at a disposable database;
//! otherwise each test returns early.

use chrono::{NaiveDate, Utc};
use gatmoney_core::{
    Charge, CreditPurchase, LedgerEntry, PaymentOutcome, PurchaseQuantity, Resource, Settlement,
    UserEntitlement, UserId, VideoSeconds,
};
use gatmoney_store::{GrantOutcome, PgStore, Store, StoreError};

async fn store() -> Option<PgStore> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let store = PgStore::connect(&url, 4).await.unwrap();
    store.migrate().await.unwrap();
    Some(store)
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 3, 1).unwrap()
}

#[tokio::test]
async fn entitlement_round_trips_through_cas() {
    let Some(store) = store().await else { return };
    let mut ent = UserEntitlement::new(UserId::generate(), today());
    ent.video_seconds_credits = VideoSeconds::from_millis(4500);
    store.insert_entitlement(&ent).await.unwrap();

    assert!(matches!(
        store.insert_entitlement(&ent).await,
        Err(StoreError::AlreadyExists { .. })
    ));

    ent.scans_used_this_period = 1;
    let charge = Charge {
        resource: Resource::Scan,
        from_allowance: 1,
        from_balance: 0,
    };
    let entry = LedgerEntry::consumption(ent.user_id, &charge);
    let stored = store
        .compare_and_swap_entitlement(&ent, 0, &[entry.clone()])
        .await
        .unwrap();
    assert_eq!(stored.version, 1);

    let loaded = store.get_entitlement(&ent.user_id).await.unwrap().unwrap();
    assert_eq!(loaded.scans_used_this_period, 1);
    assert_eq!(loaded.video_seconds_credits.as_millis(), 4500);
    assert_eq!(loaded.version, 1);

    let stale = store.compare_and_swap_entitlement(&ent, 0, &[]).await;
    assert!(matches!(stale, Err(StoreError::VersionConflict { .. })));

    let entries = store.list_entries_by_user(&ent.user_id, 10, 0).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, entry.id);
    assert_eq!(entries[0].metadata["from_allowance"], 1);
}

#[tokio::test]
async fn purchase_settles_and_grants_once() {
    let Some(store) = store().await else { return };
    let ent = UserEntitlement::new(UserId::generate(), today());
    store.insert_entitlement(&ent).await.unwrap();

    let purchase =
        CreditPurchase::initiate(ent.user_id, PurchaseQuantity::Images(10), 100, "pm").unwrap();
    store.insert_purchase(&purchase).await.unwrap();

    let completed = match store
        .settle_purchase(&purchase.id, &PaymentOutcome::Succeeded, "pay_1", Utc::now())
        .await
        .unwrap()
    {
        Settlement::Applied(p) => p,
        Settlement::AlreadySettled(_) => panic!("expected applied"),
    };
    let again = store
        .settle_purchase(&purchase.id, &PaymentOutcome::Succeeded, "pay_1", Utc::now())
        .await
        .unwrap();
    assert!(matches!(again, Settlement::AlreadySettled(_)));

    let mut credited = ent.clone();
    completed.grant_to(&mut credited).unwrap();
    let entry = LedgerEntry::purchase_granted(&completed);
    let first = store
        .grant_purchase(&purchase.id, &credited, 0, &[entry.clone()], Utc::now())
        .await
        .unwrap();
    assert!(matches!(first, GrantOutcome::Granted(ref e) if e.image_credits == 10));

    let second = store
        .grant_purchase(&purchase.id, &credited, 1, &[entry], Utc::now())
        .await
        .unwrap();
    assert_eq!(second, GrantOutcome::AlreadyCredited);

    let listed = store.list_purchases_by_user(&ent.user_id, 10, 0).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].credited_at.is_some());
}
