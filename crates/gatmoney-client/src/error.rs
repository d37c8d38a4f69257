//! Client error types.

use gatmoney_core::{Resource, UpsellPrompt};

/// Errors that can occur when using the GATMONEY client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Server returned an error response.
    #[error("API error: {code} - {message}")]
    Api {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
        /// HTTP status code.
        status: u16,
    },

    /// The user's allowance and balance do not cover the request.
    #[error("quota exceeded for {resource}: remaining={remaining}, requested={requested}")]
    QuotaExceeded {
        /// The exhausted resource.
        resource: Resource,
        /// What is left (count, or milliseconds for video).
        remaining: i64,
        /// What was asked for, in the same unit.
        requested: i64,
        /// The follow-up to offer the user, if the server sent one.
        prompt: Option<UpsellPrompt>,
    },

    /// The entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The server is overloaded or an upstream call failed; the request can be retried.
    #[error("retryable error ({status}): {message}")]
    Retryable {
        /// HTTP status code.
        status: u16,
        /// Error message.
        message: String,
    },

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl ClientError {
    /// Whether retrying the same request may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Retryable { .. } => true,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}
