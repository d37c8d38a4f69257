//! Usage handlers for other services.
//!
//! A service that runs a paid action on its own reports it here after the
//! action succeeded, or asks first whether it would be allowed.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use gatmoney_core::{Consumption, Resource, UserId, VideoSeconds};

use crate::auth::ServiceAuth;
use crate::error::ApiError;
use crate::handlers::entitlements::{ChargeResponse, EntitlementResponse};
use crate::state::AppState;

/// Usage request from services.
#[derive(Debug, Deserialize)]
pub struct UsageRequest {
    /// User being charged.
    pub user_id: String,
    /// Resource consumed.
    pub resource: Resource,
    /// Seconds consumed (video only).
    #[serde(default)]
    pub video_seconds: Option<f64>,
}

impl UsageRequest {
    fn parse(&self) -> Result<(UserId, Consumption), ApiError> {
        let user_id: UserId = self
            .user_id
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("invalid user_id: {}", self.user_id)))?;

        let consumption = match (self.resource, self.video_seconds) {
            (Resource::Scan, _) => Consumption::Scan,
            (Resource::Report, _) => Consumption::Report,
            (Resource::Image, _) => Consumption::Image,
            (Resource::Video, Some(secs)) => Consumption::Video {
                seconds: VideoSeconds::from_secs_f64(secs)
                    .ok_or_else(|| ApiError::BadRequest(format!("invalid video_seconds: {secs}")))?,
            },
            (Resource::Video, None) => {
                return Err(ApiError::BadRequest(
                    "video_seconds is required for video".into(),
                ))
            }
        };

        Ok((user_id, consumption))
    }
}

/// Usage response.
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    /// What was charged.
    pub charged: ChargeResponse,
    /// Entitlement after the charge.
    pub entitlement: EntitlementResponse,
}

/// Charge a consumption that already succeeded elsewhere.
pub async fn consume(
    State(state): State<Arc<AppState>>,
    service: ServiceAuth,
    Json(body): Json<UsageRequest>,
) -> Result<Json<UsageResponse>, ApiError> {
    let (user_id, consumption) = body.parse()?;

    tracing::debug!(
        service = %service.service_name,
        user_id = %user_id,
        resource = %consumption.resource(),
        "Usage reported"
    );

    let (entitlement, charge) = state.ledger.consume(&user_id, consumption).await?;

    Ok(Json(UsageResponse {
        charged: ChargeResponse::from(&charge),
        entitlement: EntitlementResponse::build(&entitlement, state.ledger.policy()),
    }))
}

/// Check response.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    /// Always true; a refused check is a 402.
    pub allowed: bool,
    /// What would be charged.
    pub would_charge: ChargeResponse,
}

/// Ask whether a consumption would be allowed, without charging.
pub async fn check(
    State(state): State<Arc<AppState>>,
    _service: ServiceAuth,
    Json(body): Json<UsageRequest>,
) -> Result<Json<CheckResponse>, ApiError> {
    let (user_id, consumption) = body.parse()?;
    let charge = state.ledger.check(&user_id, consumption).await?;

    Ok(Json(CheckResponse {
        allowed: true,
        would_charge: ChargeResponse::from(&charge),
    }))
}
