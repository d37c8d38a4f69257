//! Credit purchase and payment webhook integration tests.

mod common;

use axum::http::StatusCode;
use common::{TestHarness, WEBHOOK_SECRET};
use serde_json::json;

async fn create_image_purchase(harness: &TestHarness, quantity: i64) -> serde_json::Value {
    let response = harness
        .server
        .post("/v1/purchases")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({
            "resource": "image",
            "quantity": quantity,
            "payment_method": "pm_card_visa",
        }))
        .await;
    response.assert_status_ok();
    response.json()
}

fn webhook_body(purchase: &serde_json::Value, outcome: &serde_json::Value) -> String {
    let mut body = json!({
        "event_id": format!("evt_{}", purchase["purchase"]["id"].as_str().unwrap()),
        "purchase_id": purchase["purchase"]["id"],
        "payment_ref": purchase["payment_ref"],
    });
    for (key, value) in outcome.as_object().unwrap() {
        body[key] = value.clone();
    }
    body.to_string()
}

async fn deliver(harness: &TestHarness, body: &str) -> axum_test::TestResponse {
    harness
        .server
        .post("/webhooks/payments")
        .add_header("x-payment-signature", TestHarness::sign_webhook(body))
        .add_header("content-type", "application/json")
        .text(body)
        .await
}

async fn image_credits(harness: &TestHarness) -> i64 {
    let body: serde_json::Value = harness
        .server
        .get("/v1/entitlements/me")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    body["images"]["purchased_credits"].as_i64().unwrap()
}

#[tokio::test]
async fn purchase_starts_pending_with_quoted_amount() {
    let harness = TestHarness::new();

    let body = create_image_purchase(&harness, 10).await;

    assert_eq!(body["purchase"]["status"], "pending");
    assert_eq!(body["purchase"]["resource"], "image");
    assert_eq!(body["purchase"]["images"], 10);
    assert_eq!(body["purchase"]["amount_charged_cents"], 100);
    assert_eq!(body["purchase"]["amount_formatted"], "$1.00");
    assert_eq!(body["purchase"]["credited"], false);
    assert!(body["payment_ref"].as_str().unwrap().starts_with("pay_"));
    assert_eq!(image_credits(&harness).await, 0);
}

#[tokio::test]
async fn purchase_below_minimum_is_rejected() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/purchases")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({
            "resource": "image",
            "quantity": 1,
            "payment_method": "pm_card_visa",
        }))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn zero_quantity_is_rejected() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/purchases")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({
            "resource": "video",
            "seconds": 0,
            "payment_method": "pm_card_visa",
        }))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn successful_payment_credits_balance() {
    let harness = TestHarness::new();
    let purchase = create_image_purchase(&harness, 10).await;

    let body = webhook_body(&purchase, &json!({ "outcome": "succeeded" }));
    let response = deliver(&harness, &body).await;

    response.assert_status_ok();
    let result: serde_json::Value = response.json();
    assert_eq!(result["status"], "completed");
    assert_eq!(result["credited"], true);
    assert_eq!(image_credits(&harness).await, 10);
}

#[tokio::test]
async fn duplicate_confirmation_grants_once() {
    let harness = TestHarness::new();
    let purchase = create_image_purchase(&harness, 10).await;
    let body = webhook_body(&purchase, &json!({ "outcome": "succeeded" }));

    deliver(&harness, &body).await.assert_status_ok();
    deliver(&harness, &body).await.assert_status_ok();

    assert_eq!(image_credits(&harness).await, 10);

    let entries: serde_json::Value = harness
        .server
        .get("/v1/entitlements/me/entries")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    let grants = entries["entries"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["kind"] == "purchase_granted")
        .count();
    assert_eq!(grants, 1);
}

#[tokio::test]
async fn grant_failure_returns_500_and_redelivery_credits_once() {
    let harness = TestHarness::new();
    let purchase = create_image_purchase(&harness, 10).await;
    let body = webhook_body(&purchase, &json!({ "outcome": "succeeded" }));

    harness.fail_next_grants(1);
    let response = deliver(&harness, &body).await;

    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    let error: serde_json::Value = response.json();
    assert_eq!(error["error"]["code"], "credit_grant_failure");
    assert_eq!(error["error"]["details"]["purchase_id"], purchase["purchase"]["id"]);
    assert_eq!(image_credits(&harness).await, 0);

    // The provider redelivers until it sees a 2xx.
    for _ in 0..2 {
        let response = deliver(&harness, &body).await;
        response.assert_status_ok();
        let result: serde_json::Value = response.json();
        assert_eq!(result["status"], "completed");
        assert_eq!(result["credited"], true);
    }

    assert_eq!(image_credits(&harness).await, 10);
    let entries: serde_json::Value = harness
        .server
        .get("/v1/entitlements/me/entries")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    let grants = entries["entries"]
        .as_array()
        .unwrap()
        .iter()
        .filter(|e| e["kind"] == "purchase_granted")
        .count();
    assert_eq!(grants, 1);
}

#[tokio::test]
async fn failed_payment_credits_nothing() {
    let harness = TestHarness::new();
    let purchase = create_image_purchase(&harness, 10).await;

    let body = webhook_body(
        &purchase,
        &json!({ "outcome": "failed", "reason": "card_declined" }),
    );
    let response = deliver(&harness, &body).await;

    response.assert_status_ok();
    let result: serde_json::Value = response.json();
    assert_eq!(result["status"], "failed");
    assert_eq!(result["credited"], false);
    assert_eq!(image_credits(&harness).await, 0);

    let id = purchase["purchase"]["id"].as_str().unwrap();
    let stored: serde_json::Value = harness
        .server
        .get(&format!("/v1/purchases/{id}"))
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();
    assert_eq!(stored["failure_reason"], "card_declined");
}

#[tokio::test]
async fn success_after_failure_is_ignored() {
    let harness = TestHarness::new();
    let purchase = create_image_purchase(&harness, 10).await;

    let failed = webhook_body(&purchase, &json!({ "outcome": "failed" }));
    deliver(&harness, &failed).await.assert_status_ok();

    let succeeded = webhook_body(&purchase, &json!({ "outcome": "succeeded" }));
    let response = deliver(&harness, &succeeded).await;

    response.assert_status_ok();
    let result: serde_json::Value = response.json();
    assert_eq!(result["status"], "failed");
    assert_eq!(image_credits(&harness).await, 0);
}

#[tokio::test]
async fn webhook_without_signature_is_rejected() {
    let harness = TestHarness::new();
    let purchase = create_image_purchase(&harness, 10).await;
    let body = webhook_body(&purchase, &json!({ "outcome": "succeeded" }));

    harness
        .server
        .post("/webhooks/payments")
        .add_header("content-type", "application/json")
        .text(body)
        .await
        .assert_status_bad_request();

    assert_eq!(image_credits(&harness).await, 0);
}

#[tokio::test]
async fn webhook_with_wrong_secret_is_rejected() {
    let harness = TestHarness::new();
    let purchase = create_image_purchase(&harness, 10).await;
    let body = webhook_body(&purchase, &json!({ "outcome": "succeeded" }));
    let forged = gatmoney_service::crypto::sign_payload(
        &format!("{WEBHOOK_SECRET}_wrong"),
        chrono::Utc::now().timestamp(),
        &body,
    );

    harness
        .server
        .post("/webhooks/payments")
        .add_header("x-payment-signature", forged)
        .add_header("content-type", "application/json")
        .text(body)
        .await
        .assert_status_bad_request();

    assert_eq!(image_credits(&harness).await, 0);
}

#[tokio::test]
async fn webhook_for_unknown_purchase_is_not_found() {
    let harness = TestHarness::new();
    let body = json!({
        "event_id": "evt_1",
        "purchase_id": gatmoney_core::PurchaseId::generate().to_string(),
        "payment_ref": "pay_x",
        "outcome": "succeeded",
    })
    .to_string();

    deliver(&harness, &body)
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn purchases_are_private_to_each_user() {
    let harness = TestHarness::new();
    let purchase = create_image_purchase(&harness, 10).await;
    let id = purchase["purchase"]["id"].as_str().unwrap();

    harness
        .server
        .get(&format!("/v1/purchases/{id}"))
        .add_header("authorization", TestHarness::other_user_auth_header())
        .await
        .assert_status_not_found();

    harness
        .server
        .get(&format!("/v1/purchases/{id}"))
        .add_header("authorization", harness.user_auth_header())
        .await
        .assert_status_ok();
}

#[tokio::test]
async fn list_purchases_returns_callers_purchases() {
    let harness = TestHarness::new();
    create_image_purchase(&harness, 10).await;
    create_image_purchase(&harness, 20).await;

    let body: serde_json::Value = harness
        .server
        .get("/v1/purchases")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json();

    assert_eq!(body["purchases"].as_array().unwrap().len(), 2);
    assert_eq!(body["has_more"], false);
}

#[tokio::test]
async fn purchased_video_seconds_are_usable() {
    let harness = TestHarness::new();
    let response = harness
        .server
        .post("/v1/purchases")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({
            "resource": "video",
            "seconds": 4.5,
            "payment_method": "pm_card_visa",
        }))
        .await;
    response.assert_status_ok();
    let purchase: serde_json::Value = response.json();
    // 4.5s at 25 cents per second, rounded up.
    assert_eq!(purchase["purchase"]["amount_charged_cents"], 113);

    let body = webhook_body(&purchase, &json!({ "outcome": "succeeded" }));
    deliver(&harness, &body).await.assert_status_ok();

    harness
        .server
        .post("/v1/generate/video")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "p", "duration_seconds": 5 }))
        .await
        .assert_status(StatusCode::PAYMENT_REQUIRED);

    harness
        .server
        .post("/v1/generate/video")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "p", "duration_seconds": 4.5 }))
        .await
        .assert_status_ok();
}
