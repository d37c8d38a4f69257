//! Admin handlers.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use gatmoney_core::{Tier, UserId};

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::handlers::entitlements::EntitlementResponse;
use crate::ledger::ReconcileReport;
use crate::state::AppState;

/// Most purchases one reconciliation run looks at.
const MAX_RECONCILE_BATCH: usize = 500;

fn parse_user_id(raw: &str) -> Result<UserId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid user_id: {raw}")))
}

/// Get any user's entitlement.
pub async fn get_entitlement(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path(user_id): Path<String>,
) -> Result<Json<EntitlementResponse>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let entitlement = state.ledger.current(&user_id).await?;
    Ok(Json(EntitlementResponse::build(
        &entitlement,
        state.ledger.policy(),
    )))
}

/// Set tier request.
#[derive(Debug, Deserialize)]
pub struct SetTierRequest {
    /// The new tier.
    pub tier: Tier,
}

/// Set tier response.
#[derive(Debug, Serialize)]
pub struct SetTierResponse {
    /// Tier before the change.
    pub previous_tier: Tier,
    /// Entitlement after the change.
    pub entitlement: EntitlementResponse,
}

/// Change a user's tier.
pub async fn set_tier(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(user_id): Path<String>,
    Json(body): Json<SetTierRequest>,
) -> Result<Json<SetTierResponse>, ApiError> {
    let user_id = parse_user_id(&user_id)?;
    let (entitlement, previous_tier) = state
        .ledger
        .change_tier(&user_id, body.tier, &admin.admin_id)
        .await?;

    Ok(Json(SetTierResponse {
        previous_tier,
        entitlement: EntitlementResponse::build(&entitlement, state.ledger.policy()),
    }))
}

/// Reconcile request.
#[derive(Debug, Default, Deserialize)]
pub struct ReconcileRequest {
    /// Most purchases to examine (default and cap: 500).
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Retry grants for paid but uncredited purchases.
pub async fn reconcile_purchases(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    body: Option<Json<ReconcileRequest>>,
) -> Result<Json<ReconcileReport>, ApiError> {
    let limit = body
        .and_then(|Json(b)| b.limit)
        .unwrap_or(MAX_RECONCILE_BATCH)
        .min(MAX_RECONCILE_BATCH);

    tracing::info!(admin_id = %admin.admin_id, limit, "Reconciling purchase grants");

    let report = state.ledger.reconcile_grants(limit).await?;
    Ok(Json(report))
}
