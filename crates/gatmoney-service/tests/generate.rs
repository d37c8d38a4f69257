//! Generation integration tests: charge on success only.

mod common;

use axum::http::StatusCode;
use common::{GenerationMode, TestHarness};
use gatmoney_core::{Tier, VideoSeconds};
use serde_json::json;

async fn entitlement(harness: &TestHarness) -> serde_json::Value {
    harness
        .server
        .get("/v1/entitlements/me")
        .add_header("authorization", harness.user_auth_header())
        .await
        .json()
}

#[tokio::test]
async fn successful_scan_is_charged() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/generate/scan")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "gigs for a welder in Lagos" }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["asset"]["id"], "asset_0");
    assert_eq!(body["charged"]["resource"], "scan");
    assert_eq!(body["charged"]["from_allowance"], 1);
    assert_eq!(body["entitlement"]["scans"]["used"], 1);
}

#[tokio::test]
async fn tenth_scan_allowed_eleventh_refused_with_upgrade_prompt() {
    let harness = TestHarness::new();

    for _ in 0..10 {
        harness
            .server
            .post("/v1/generate/scan")
            .add_header("authorization", harness.user_auth_header())
            .json(&json!({ "prompt": "p" }))
            .await
            .assert_status_ok();
    }

    let response = harness
        .server
        .post("/v1/generate/scan")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "p" }))
        .await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "quota_exceeded");
    assert_eq!(body["error"]["details"]["prompt"]["action"], "upgrade");
    assert_eq!(body["error"]["details"]["prompt"]["tier"], "individual");

    assert_eq!(entitlement(&harness).await["scans"]["used"], 10);
    assert_eq!(harness.generation.calls(), 10);
}

#[tokio::test]
async fn business_tier_exhaustion_says_wait_for_reset() {
    let harness = TestHarness::new();
    harness
        .seed_balances(Tier::Business, 0, VideoSeconds::ZERO)
        .await;

    // Use up every report in the period.
    for _ in 0..250 {
        harness
            .server
            .post("/v1/usage/consume")
            .add_header("x-api-key", common::SERVICE_API_KEY)
            .json(&json!({ "user_id": harness.test_user_id.to_string(), "resource": "report" }))
            .await
            .assert_status_ok();
    }

    let response = harness
        .server
        .post("/v1/generate/report")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "p" }))
        .await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["details"]["prompt"]["action"], "wait_for_reset");
}

#[tokio::test]
async fn failed_generation_charges_nothing() {
    let harness = TestHarness::new();
    harness.generation.set_mode(GenerationMode::Fail);

    let response = harness
        .server
        .post("/v1/generate/scan")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "p" }))
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["code"], "external_call_failed");
    assert_eq!(body["error"]["details"]["retryable"], true);
    assert_eq!(body["error"]["details"]["timed_out"], false);

    assert_eq!(entitlement(&harness).await["scans"]["used"], 0);
}

#[tokio::test]
async fn timed_out_generation_charges_nothing() {
    let harness = TestHarness::new();
    harness.seed_balances(Tier::Free, 3, VideoSeconds::ZERO).await;
    harness.generation.set_mode(GenerationMode::Hang);

    let response = harness
        .server
        .post("/v1/generate/image")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "p" }))
        .await;

    response.assert_status(StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["details"]["timed_out"], true);

    assert_eq!(entitlement(&harness).await["images"]["purchased_credits"], 3);
}

#[tokio::test]
async fn image_without_credits_is_refused_before_calling_backend() {
    let harness = TestHarness::new();

    let response = harness
        .server
        .post("/v1/generate/image")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "p" }))
        .await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["details"]["prompt"]["action"], "purchase");
    assert_eq!(body["error"]["details"]["prompt"]["resource"], "image");
    assert_eq!(harness.generation.calls(), 0);
}

#[tokio::test]
async fn image_spends_one_purchased_credit() {
    let harness = TestHarness::new();
    harness.seed_balances(Tier::Free, 2, VideoSeconds::ZERO).await;

    let response = harness
        .server
        .post("/v1/generate/image")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "p" }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["charged"]["from_balance"], 1);
    assert_eq!(body["entitlement"]["images"]["purchased_credits"], 1);
}

#[tokio::test]
async fn video_longer_than_balance_is_refused_and_balance_kept() {
    let harness = TestHarness::new();
    harness
        .seed_balances(Tier::Free, 0, VideoSeconds::from_millis(4500))
        .await;

    let response = harness
        .server
        .post("/v1/generate/video")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "p", "duration_seconds": 5 }))
        .await;

    response.assert_status(StatusCode::PAYMENT_REQUIRED);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"]["details"]["remaining"], 4500);
    assert_eq!(body["error"]["details"]["unit"], "milliseconds");

    assert_eq!(entitlement(&harness).await["video"]["purchased_seconds"], 4.5);
}

#[tokio::test]
async fn fractional_video_seconds_are_charged_exactly() {
    let harness = TestHarness::new();
    harness
        .seed_balances(Tier::Free, 0, VideoSeconds::from_secs(10))
        .await;

    let response = harness
        .server
        .post("/v1/generate/video")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "p", "duration_seconds": 2.25 }))
        .await;

    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["charged"]["from_balance"], 2250);
    assert_eq!(body["entitlement"]["video"]["purchased_seconds"], 7.75);
}

#[tokio::test]
async fn video_without_duration_is_bad_request() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/generate/video")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "p" }))
        .await
        .assert_status_bad_request();
}

#[tokio::test]
async fn empty_prompt_is_bad_request() {
    let harness = TestHarness::new();

    harness
        .server
        .post("/v1/generate/scan")
        .add_header("authorization", harness.user_auth_header())
        .json(&json!({ "prompt": "  " }))
        .await
        .assert_status_bad_request();
    assert_eq!(harness.generation.calls(), 0);
}
