//! Generation handlers.
//!
//! The user is charged only after the backend returns an asset.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use gatmoney_core::VideoSeconds;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::generation::{GeneratedAsset, GenerationKind, GenerationRequest};
use crate::handlers::entitlements::{ChargeResponse, EntitlementResponse};
use crate::state::AppState;

/// Generate request body.
#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// User prompt.
    pub prompt: String,
    /// Clip length in seconds (video only).
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    /// Backend-specific options.
    #[serde(default)]
    pub options: serde_json::Value,
}

/// Generate response.
#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    /// The generated asset.
    pub asset: GeneratedAsset,
    /// What was charged.
    pub charged: ChargeResponse,
    /// Entitlement after the charge.
    pub entitlement: EntitlementResponse,
}

/// Run a generation and charge for it on success.
pub async fn generate(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(kind): Path<GenerationKind>,
    Json(body): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, ApiError> {
    if body.prompt.trim().is_empty() {
        return Err(ApiError::BadRequest("prompt must not be empty".into()));
    }

    let duration = match (kind, body.duration_seconds) {
        (GenerationKind::Video, Some(secs)) => Some(
            VideoSeconds::from_secs_f64(secs)
                .ok_or_else(|| ApiError::BadRequest(format!("invalid duration: {secs}")))?,
        ),
        (GenerationKind::Video, None) => {
            return Err(ApiError::BadRequest(
                "duration_seconds is required for video".into(),
            ))
        }
        _ => None,
    };
    let consumption = kind
        .consumption(duration)
        .ok_or_else(|| ApiError::BadRequest("missing duration".into()))?;

    let generation = state
        .generation
        .clone()
        .ok_or_else(|| ApiError::ExternalService("Generation backend not configured".into()))?;

    let request = GenerationRequest {
        user_id: auth.user_id,
        kind,
        prompt: body.prompt,
        duration_seconds: duration.map(VideoSeconds::as_secs_f64),
        options: body.options,
    };

    tracing::info!(
        user_id = %auth.user_id,
        kind = kind.as_str(),
        "Generation requested"
    );

    let (asset, entitlement, charge) = state
        .ledger
        .charge_on_success(&auth.user_id, consumption, async move {
            generation.generate(&request).await
        })
        .await?;

    Ok(Json(GenerateResponse {
        asset,
        charged: ChargeResponse::from(&charge),
        entitlement: EntitlementResponse::build(&entitlement, state.ledger.policy()),
    }))
}
