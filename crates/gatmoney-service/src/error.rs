//! API error types and responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use gatmoney_core::{EntitlementError, PurchaseId, Resource, UpsellPrompt};
use gatmoney_store::StoreError;

use crate::ledger::LedgerError;

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Unauthorized - missing or invalid credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Forbidden - valid credentials but insufficient permissions.
    #[error("forbidden")]
    Forbidden,

    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Bad request - invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict - invalid state transition or concurrent modification.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Allowance or purchased balance exhausted.
    #[error("quota exceeded for {resource}: remaining={remaining}, requested={requested}")]
    QuotaExceeded {
        /// The exhausted resource.
        resource: Resource,
        /// What is left (count, or milliseconds for video).
        remaining: i64,
        /// What was asked for.
        requested: i64,
        /// Follow-up offered to the user.
        prompt: UpsellPrompt,
    },

    /// The generation call failed or timed out; nothing was charged.
    #[error("external call failed: {reason}")]
    ExternalCallFailed {
        /// Why it failed.
        reason: String,
        /// Whether it was a timeout.
        timed_out: bool,
    },

    /// A paid purchase could not be credited.
    #[error("credit grant failed for purchase {purchase_id}")]
    CreditGrantFailure {
        /// The paid-but-uncredited purchase.
        purchase_id: PurchaseId,
    },

    /// Too many concurrent writers; try again.
    #[error("service busy: {0}")]
    Busy(String),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// External service error.
    #[error("external service error: {0}")]
    ExternalService(String),
}

/// JSON error response body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message, details) = match &self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
                None,
            ),
            Self::Forbidden => (StatusCode::FORBIDDEN, "forbidden", self.to_string(), None),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone(), None),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone(), None),
            Self::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg.clone(), None),
            Self::QuotaExceeded {
                resource,
                remaining,
                requested,
                prompt,
            } => (
                StatusCode::PAYMENT_REQUIRED,
                "quota_exceeded",
                self.to_string(),
                Some(serde_json::json!({
                    "resource": resource,
                    "remaining": remaining,
                    "requested": requested,
                    "unit": if *resource == Resource::Video { "milliseconds" } else { "count" },
                    "prompt": prompt,
                })),
            ),
            Self::ExternalCallFailed { reason, timed_out } => (
                StatusCode::BAD_GATEWAY,
                "external_call_failed",
                reason.clone(),
                Some(serde_json::json!({
                    "retryable": true,
                    "timed_out": timed_out,
                })),
            ),
            Self::CreditGrantFailure { purchase_id } => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "credit_grant_failure",
                self.to_string(),
                Some(serde_json::json!({ "purchase_id": purchase_id })),
            ),
            Self::Busy(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "busy",
                msg.clone(),
                Some(serde_json::json!({ "retryable": true })),
            ),
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "Internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal_error",
                    "An internal error occurred".to_string(),
                    None,
                )
            }
            Self::ExternalService(msg) => (
                StatusCode::BAD_GATEWAY,
                "external_service_error",
                msg.clone(),
                None,
            ),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: code.to_string(),
                message,
                details,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { entity, id } => Self::NotFound(format!("{entity} not found: {id}")),
            StoreError::AlreadyExists { entity, id } => {
                Self::Conflict(format!("{entity} already exists: {id}"))
            }
            StoreError::VersionConflict { user_id, .. } => {
                Self::Conflict(format!("entitlement for {user_id} was modified concurrently"))
            }
            StoreError::InvalidState(msg) => Self::Conflict(msg),
            StoreError::Database(msg) | StoreError::Serialization(msg) => Self::Internal(msg),
        }
    }
}

impl From<EntitlementError> for ApiError {
    fn from(err: EntitlementError) -> Self {
        match err {
            EntitlementError::QuotaExceeded {
                resource,
                remaining,
                requested,
                prompt,
            } => Self::QuotaExceeded {
                resource,
                remaining,
                requested,
                prompt,
            },
            EntitlementError::ExternalCallFailed { reason, timed_out } => {
                Self::ExternalCallFailed { reason, timed_out }
            }
            EntitlementError::CreditGrantFailure { purchase_id, .. } => {
                Self::CreditGrantFailure { purchase_id }
            }
            EntitlementError::InvalidQuantity(msg) | EntitlementError::InvalidAmount(msg) => {
                Self::BadRequest(msg)
            }
        }
    }
}

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Entitlement(e) => e.into(),
            LedgerError::Store(e) => e.into(),
            LedgerError::Contention { .. } => Self::Busy(err.to_string()),
            LedgerError::PurchaseNotFound(id) => Self::NotFound(format!("purchase not found: {id}")),
            LedgerError::PaymentsUnavailable => {
                Self::ExternalService("Payments not configured".into())
            }
            LedgerError::Payment(e) => Self::ExternalService(e.to_string()),
        }
    }
}
