//! Payment webhook handler.

use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use gatmoney_core::{PaymentOutcome, PurchaseId, PurchaseStatus};

use crate::error::ApiError;
use crate::payments::verify_webhook_signature;
use crate::state::AppState;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "x-payment-signature";

/// Payment webhook payload.
#[derive(Debug, Deserialize)]
pub struct PaymentWebhook {
    /// Provider event ID, for logging.
    pub event_id: String,
    /// The purchase being settled.
    pub purchase_id: PurchaseId,
    /// Provider reference for the charge.
    pub payment_ref: String,
    /// The result.
    #[serde(flatten)]
    pub outcome: PaymentOutcome,
}

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    /// Whether the webhook was processed.
    pub received: bool,
    /// Purchase status after processing.
    pub status: PurchaseStatus,
    /// Whether the purchase's credits have been added.
    pub credited: bool,
}

/// Handle payment outcome webhooks.
///
/// Redelivery is safe: a settled purchase is not settled again and credits
/// are granted at most once. A failed grant answers 500 so the provider
/// redelivers.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookResponse>, ApiError> {
    if let Some(secret) = &state.config.payment_webhook_secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::BadRequest("Missing payment signature".into()))?;

        verify_webhook_signature(secret, &body, signature).map_err(|e| {
            tracing::warn!(error = %e, "Invalid payment webhook signature");
            ApiError::BadRequest("Invalid webhook signature".into())
        })?;
    } else {
        // No webhook secret configured - skip verification (development mode)
        tracing::warn!("Payment webhook secret not configured - skipping signature verification");
    }

    let webhook: PaymentWebhook =
        serde_json::from_str(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    tracing::info!(
        event_id = %webhook.event_id,
        purchase_id = %webhook.purchase_id,
        payment_ref = %webhook.payment_ref,
        outcome = ?webhook.outcome,
        "Received payment webhook"
    );

    let purchase = state
        .ledger
        .settle_purchase(&webhook.purchase_id, &webhook.outcome, &webhook.payment_ref)
        .await?;

    Ok(Json(WebhookResponse {
        received: true,
        status: purchase.status,
        credited: purchase.credited_at.is_some(),
    }))
}
