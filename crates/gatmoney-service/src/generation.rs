//! Client for the generative-AI backend.
//!
//! The entitlement service never interprets the generated output: it only
//! needs to know whether the call succeeded, so it can decide whether to charge.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use gatmoney_core::{Consumption, UserId, VideoSeconds};

/// What kind of asset to generate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationKind {
    /// Market/gig scan.
    Scan,
    /// Written report.
    Report,
    /// Image generation or edit.
    Image,
    /// Video clip.
    Video,
}

impl GenerationKind {
    /// Stable lowercase name, used in the backend URL.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Report => "report",
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    /// The consumption charged when a generation of this kind succeeds.
    ///
    /// Returns `None` for video without a duration.
    #[must_use]
    pub const fn consumption(self, duration: Option<VideoSeconds>) -> Option<Consumption> {
        match (self, duration) {
            (Self::Scan, _) => Some(Consumption::Scan),
            (Self::Report, _) => Some(Consumption::Report),
            (Self::Image, _) => Some(Consumption::Image),
            (Self::Video, Some(seconds)) => Some(Consumption::Video { seconds }),
            (Self::Video, None) => None,
        }
    }
}

/// A generation request forwarded to the backend.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    /// Requesting user.
    pub user_id: UserId,
    /// Asset kind.
    pub kind: GenerationKind,
    /// User prompt.
    pub prompt: String,
    /// Requested clip length, for video.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    /// Backend-specific options, passed through untouched.
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub options: serde_json::Value,
}

/// A generated asset as returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeneratedAsset {
    /// Backend identifier for the asset.
    pub id: String,
    /// Backend output (URLs, text, ...).
    #[serde(default)]
    pub output: serde_json::Value,
}

/// Error type for generation calls.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The backend answered with an error status.
    #[error("generation API error: HTTP {status} - {message}")]
    Api {
        /// HTTP status.
        status: u16,
        /// Error message from the body, if any.
        message: String,
    },
}

/// Something that turns prompts into assets.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Run one generation.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend fails; the caller charges nothing.
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedAsset, GenerationError>;
}

/// Generation backend reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpGenerationProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpGenerationProvider {
    /// Create a new client.
    ///
    /// There is no overall request timeout here; callers bound the call.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl GenerationProvider for HttpGenerationProvider {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedAsset, GenerationError> {
        let url = format!("{}/v1/generate/{}", self.base_url, request.kind.as_str());

        tracing::debug!(
            url = %url,
            user_id = %request.user_id,
            kind = request.kind.as_str(),
            "Calling generation backend"
        );

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let message = response.text().await.unwrap_or_default();
        Err(GenerationError::Api {
            status: status.as_u16(),
            message,
        })
    }
}
