//! GATMONEY HTTP client implementation.

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::time::Duration;

use gatmoney_core::{Resource, Tier, UpsellPrompt, UserId};

use crate::error::ClientError;
use crate::types::{
    ApiErrorResponse, CheckResponse, Entitlement, ReconcileReport, ReconcileRequest,
    SetTierRequest, SetTierResponse, UsageRequest, UsageResponse,
};

/// GATMONEY API client.
///
/// Services use it to charge and check consumptions with their service API
/// key. Operators set `admin_key` in [`ClientOptions`] for the admin calls.
#[derive(Debug, Clone)]
pub struct GatmoneyClient {
    client: Client,
    base_url: String,
    api_key: String,
    service_name: String,
    admin_key: Option<String>,
}

impl GatmoneyClient {
    /// Create a new client.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Base URL of the service (e.g., `"http://gatmoney:8080"`)
    /// * `api_key` - Service API key for authentication
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] if the HTTP client cannot be built.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, ClientError> {
        Self::with_options(base_url, api_key, ClientOptions::default())
    }

    /// Create a new client with custom options.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] if the HTTP client cannot be built.
    pub fn with_options(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        options: ClientOptions,
    ) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(options.timeout_seconds))
            .build()
            .map_err(|e| ClientError::Configuration(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            service_name: options.service_name,
            admin_key: options.admin_key,
        })
    }

    /// Charge a consumption that already succeeded.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::QuotaExceeded`] if the user cannot afford it,
    /// or another error if the request fails.
    pub async fn consume(&self, request: &UsageRequest) -> Result<UsageResponse, ClientError> {
        let url = format!("{}/v1/usage/consume", self.base_url);
        self.send(self.service(self.client.post(&url)).json(request))
            .await
    }

    /// Ask whether a consumption would be allowed, without charging.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::QuotaExceeded`] if it would be refused, or
    /// another error if the request fails.
    pub async fn check(&self, request: &UsageRequest) -> Result<CheckResponse, ClientError> {
        let url = format!("{}/v1/usage/check", self.base_url);
        self.send(self.service(self.client.post(&url)).json(request))
            .await
    }

    /// Get the calling user's entitlement (requires user JWT, not service API key).
    ///
    /// This method is typically used by user-facing frontends, not by services.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the server returns an error.
    pub async fn get_entitlement(&self, user_jwt: &str) -> Result<Entitlement, ClientError> {
        let url = format!("{}/v1/entitlements/me", self.base_url);
        self.send(
            self.client
                .get(&url)
                .header("authorization", format!("Bearer {user_jwt}")),
        )
        .await
    }

    /// Get any user's entitlement (admin).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] without an admin key, or an
    /// error if the request fails.
    pub async fn admin_get_entitlement(&self, user_id: &UserId) -> Result<Entitlement, ClientError> {
        let url = format!("{}/v1/admin/entitlements/{user_id}", self.base_url);
        self.send(self.admin(self.client.get(&url))?).await
    }

    /// Move a user to `tier` (admin).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] without an admin key, or an
    /// error if the request fails.
    pub async fn set_tier(
        &self,
        user_id: &UserId,
        tier: Tier,
    ) -> Result<SetTierResponse, ClientError> {
        let url = format!("{}/v1/admin/entitlements/{user_id}/tier", self.base_url);
        self.send(self.admin(self.client.put(&url))?.json(&SetTierRequest { tier }))
            .await
    }

    /// Retry credit grants for paid but uncredited purchases (admin).
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Configuration`] without an admin key, or an
    /// error if the request fails.
    pub async fn reconcile_purchases(
        &self,
        limit: Option<usize>,
    ) -> Result<ReconcileReport, ClientError> {
        let url = format!("{}/v1/admin/purchases/reconcile", self.base_url);
        self.send(self.admin(self.client.post(&url))?.json(&ReconcileRequest { limit }))
            .await
    }

    fn service(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("x-api-key", &self.api_key)
            .header("x-service-name", &self.service_name)
    }

    fn admin(&self, builder: RequestBuilder) -> Result<RequestBuilder, ClientError> {
        let key = self
            .admin_key
            .as_ref()
            .ok_or_else(|| ClientError::Configuration("admin key not set".into()))?;
        Ok(builder
            .header("x-admin-key", key)
            .header("x-admin-id", &self.service_name))
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, ClientError> {
        let response = builder.send().await?;
        Self::handle_response(response).await
    }

    /// Handle API response and convert errors.
    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = response.status();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        // Try to parse error response
        let Ok(api_error) = response.json::<ApiErrorResponse>().await else {
            return Err(ClientError::Api {
                code: "unknown".to_string(),
                message: format!("HTTP {status}"),
                status: status.as_u16(),
            });
        };

        let body = api_error.error;
        let details = body.details.unwrap_or_default();

        // Map specific error codes to typed errors
        match body.code.as_str() {
            "quota_exceeded" => {
                let resource: Option<Resource> =
                    serde_json::from_value(details["resource"].clone()).ok();
                let Some(resource) = resource else {
                    return Err(ClientError::Api {
                        code: body.code,
                        message: body.message,
                        status: status.as_u16(),
                    });
                };
                let prompt: Option<UpsellPrompt> =
                    serde_json::from_value(details["prompt"].clone()).ok();

                tracing::debug!(%resource, ?prompt, "Quota exceeded");

                Err(ClientError::QuotaExceeded {
                    resource,
                    remaining: details["remaining"].as_i64().unwrap_or(0),
                    requested: details["requested"].as_i64().unwrap_or(0),
                    prompt,
                })
            }
            "not_found" => Err(ClientError::NotFound(body.message)),
            _ if details["retryable"].as_bool() == Some(true) => Err(ClientError::Retryable {
                status: status.as_u16(),
                message: body.message,
            }),
            _ => Err(ClientError::Api {
                code: body.code,
                message: body.message,
                status: status.as_u16(),
            }),
        }
    }
}

/// Client options for customization.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Request timeout in seconds (default: 30).
    pub timeout_seconds: u64,
    /// Service name to include in requests.
    pub service_name: String,
    /// Admin key for the admin endpoints.
    pub admin_key: Option<String>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            service_name: "unknown".to_string(),
            admin_key: None,
        }
    }
}

impl ClientOptions {
    /// Create options with a service name.
    #[must_use]
    pub fn with_service_name(name: impl Into<String>) -> Self {
        Self {
            service_name: name.into(),
            ..Self::default()
        }
    }

    /// Set the admin key.
    #[must_use]
    pub fn admin_key(mut self, key: impl Into<String>) -> Self {
        self.admin_key = Some(key.into());
        self
    }
}
