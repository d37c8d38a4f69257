//! Payment provider client and webhook verification.
//!
//! Starting a payment is the only outbound call. The outcome arrives later
//! on `POST /webhooks/payments`, signed with the shared webhook secret.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use gatmoney_core::CreditPurchase;

use crate::crypto;

/// A started payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSession {
    /// Provider reference for the charge.
    pub payment_ref: String,
    /// Where to send the user to complete payment, if the provider needs it.
    #[serde(default)]
    pub redirect_url: Option<String>,
}

/// Error type for payment operations.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with an error status.
    #[error("payment API error: HTTP {status} - {message}")]
    Api {
        /// HTTP status.
        status: u16,
        /// Error message from the body, if any.
        message: String,
    },

    /// Invalid webhook signature.
    #[error("invalid webhook signature")]
    InvalidSignature,
}

/// Something that can charge a user for a purchase.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Ask the provider to start charging for `purchase`.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider refuses or is unreachable.
    async fn start_payment(&self, purchase: &CreditPurchase)
        -> Result<PaymentSession, PaymentError>;
}

#[derive(Debug, Serialize)]
struct StartPaymentBody<'a> {
    purchase_id: String,
    user_id: String,
    amount_cents: i64,
    currency: &'static str,
    payment_method: &'a str,
    description: String,
}

/// Payment provider reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpPaymentProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpPaymentProvider {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, PaymentError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn start_payment(
        &self,
        purchase: &CreditPurchase,
    ) -> Result<PaymentSession, PaymentError> {
        let body = StartPaymentBody {
            purchase_id: purchase.id.to_string(),
            user_id: purchase.user_id.to_string(),
            amount_cents: purchase.amount_charged_cents,
            currency: "usd",
            payment_method: &purchase.payment_method,
            description: format!("GATMONEY {}", purchase.quantity),
        };

        tracing::debug!(
            purchase_id = %purchase.id,
            amount_cents = purchase.amount_charged_cents,
            "Starting payment"
        );

        let response = self
            .client
            .post(format!("{}/v1/payments", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let message = response.text().await.unwrap_or_default();
        Err(PaymentError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

/// Verify a payment webhook body against its `x-payment-signature` header.
///
/// # Errors
///
/// Returns [`PaymentError::InvalidSignature`] if no signature matches.
pub fn verify_webhook_signature(
    secret: &str,
    payload: &str,
    signature: &str,
) -> Result<(), PaymentError> {
    if crypto::verify_payload(secret, signature, payload) {
        Ok(())
    } else {
        Err(PaymentError::InvalidSignature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatmoney_core::{PurchaseQuantity, UserId};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn purchase() -> CreditPurchase {
        CreditPurchase::initiate(UserId::generate(), PurchaseQuantity::Images(20), 200, "pm_card")
            .unwrap()
    }

    #[tokio::test]
    async fn start_payment_returns_session() {
        let server = MockServer::start().await;
        let purchase = purchase();

        Mock::given(method("POST"))
            .and(path("/v1/payments"))
            .and(header("authorization", "Bearer pay-key"))
            .and(body_partial_json(serde_json::json!({
                "purchase_id": purchase.id.to_string(),
                "amount_cents": 200,
                "payment_method": "pm_card"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "payment_ref": "pay_123",
                "redirect_url": "https://pay.example/checkout/pay_123"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = HttpPaymentProvider::new(&server.uri(), "pay-key").unwrap();
        let session = provider.start_payment(&purchase).await.unwrap();
        assert_eq!(session.payment_ref, "pay_123");
        assert!(session.redirect_url.is_some());
    }

    #[tokio::test]
    async fn declined_start_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/payments"))
            .respond_with(ResponseTemplate::new(402).set_body_string("card declined"))
            .mount(&server)
            .await;

        let provider = HttpPaymentProvider::new(&server.uri(), "pay-key").unwrap();
        let err = provider.start_payment(&purchase()).await.unwrap_err();
        assert!(matches!(err, PaymentError::Api { status: 402, .. }));
    }

    #[test]
    fn webhook_signature_round_trip() {
        let body = r#"{"purchase_id":"x"}"#;
        let header = crypto::sign_payload("whsec_test", 1_760_000_000, body);
        assert!(verify_webhook_signature("whsec_test", body, &header).is_ok());
        assert!(matches!(
            verify_webhook_signature("whsec_test", "{}", &header),
            Err(PaymentError::InvalidSignature)
        ));
    }
}
