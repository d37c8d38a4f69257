//! Credit purchase handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use gatmoney_core::{
    CreditPurchase, PurchaseId, PurchaseQuantity, PurchaseStatus, ResourceType, VideoSeconds,
};

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::handlers::ListQuery;
use crate::state::AppState;

/// What to buy.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "resource", rename_all = "snake_case")]
pub enum PurchaseItem {
    /// Image credits.
    Image {
        /// Number of credits.
        quantity: i64,
    },
    /// Video seconds.
    Video {
        /// Seconds, fractional allowed.
        seconds: f64,
    },
}

/// Create purchase request.
#[derive(Debug, Deserialize)]
pub struct CreatePurchaseRequest {
    /// What to buy.
    #[serde(flatten)]
    pub item: PurchaseItem,
    /// Opaque payment method reference.
    pub payment_method: String,
}

/// Purchase response.
#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    /// Purchase ID.
    pub id: String,
    /// What was bought.
    pub resource: ResourceType,
    /// Image credits bought.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<i64>,
    /// Video seconds bought.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub video_seconds: Option<f64>,
    /// Price in cents.
    pub amount_charged_cents: i64,
    /// Price formatted as dollars.
    pub amount_formatted: String,
    /// Lifecycle state.
    pub status: PurchaseStatus,
    /// Payment provider reference.
    pub external_payment_ref: Option<String>,
    /// Why the payment failed.
    pub failure_reason: Option<String>,
    /// Whether the credits have been added.
    pub credited: bool,
    /// Created.
    pub created_at: String,
    /// Settled.
    pub settled_at: Option<String>,
}

impl From<&CreditPurchase> for PurchaseResponse {
    fn from(purchase: &CreditPurchase) -> Self {
        let (images, video_seconds) = match purchase.quantity {
            PurchaseQuantity::Images(count) => (Some(count), None),
            PurchaseQuantity::VideoSeconds(seconds) => (None, Some(seconds.as_secs_f64())),
        };
        Self {
            id: purchase.id.to_string(),
            resource: purchase.resource(),
            images,
            video_seconds,
            amount_charged_cents: purchase.amount_charged_cents,
            amount_formatted: format!(
                "${}.{:02}",
                purchase.amount_charged_cents / 100,
                purchase.amount_charged_cents % 100
            ),
            status: purchase.status,
            external_payment_ref: purchase.external_payment_ref.clone(),
            failure_reason: purchase.failure_reason.clone(),
            credited: purchase.credited_at.is_some(),
            created_at: purchase.created_at.to_rfc3339(),
            settled_at: purchase.settled_at.map(|t| t.to_rfc3339()),
        }
    }
}

/// Create purchase response.
#[derive(Debug, Serialize)]
pub struct CreatePurchaseResponse {
    /// The Pending purchase.
    pub purchase: PurchaseResponse,
    /// Payment provider reference.
    pub payment_ref: String,
    /// Where to complete payment, if the provider needs it.
    pub redirect_url: Option<String>,
}

/// Initiate a credit purchase.
pub async fn create_purchase(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Json(body): Json<CreatePurchaseRequest>,
) -> Result<Json<CreatePurchaseResponse>, ApiError> {
    if body.payment_method.trim().is_empty() {
        return Err(ApiError::BadRequest("payment_method is required".into()));
    }

    let quantity = match body.item {
        PurchaseItem::Image { quantity } => PurchaseQuantity::Images(quantity),
        PurchaseItem::Video { seconds } => PurchaseQuantity::VideoSeconds(
            VideoSeconds::from_secs_f64(seconds)
                .ok_or_else(|| ApiError::BadRequest(format!("invalid seconds: {seconds}")))?,
        ),
    };

    let (purchase, session) = state
        .ledger
        .initiate_purchase(&auth.user_id, quantity, &body.payment_method)
        .await?;

    Ok(Json(CreatePurchaseResponse {
        purchase: PurchaseResponse::from(&purchase),
        payment_ref: session.payment_ref,
        redirect_url: session.redirect_url,
    }))
}

/// List purchases response.
#[derive(Debug, Serialize)]
pub struct ListPurchasesResponse {
    /// Purchases (newest first).
    pub purchases: Vec<PurchaseResponse>,
    /// Whether there are more purchases.
    pub has_more: bool,
}

/// List the caller's purchases.
pub async fn list_purchases(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListPurchasesResponse>, ApiError> {
    let limit = query.capped_limit();
    let purchases = state
        .store
        .list_purchases_by_user(&auth.user_id, limit + 1, query.offset)
        .await?;

    let has_more = purchases.len() > limit;
    let purchases = purchases
        .iter()
        .take(limit)
        .map(PurchaseResponse::from)
        .collect();

    Ok(Json(ListPurchasesResponse {
        purchases,
        has_more,
    }))
}

/// Get one of the caller's purchases.
pub async fn get_purchase(
    State(state): State<Arc<AppState>>,
    auth: AuthUser,
    Path(purchase_id): Path<String>,
) -> Result<Json<PurchaseResponse>, ApiError> {
    let purchase_id: PurchaseId = purchase_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid purchase id: {purchase_id}")))?;

    // Someone else's purchase looks the same as a missing one.
    let purchase = state
        .store
        .get_purchase(&purchase_id)
        .await?
        .filter(|p| p.user_id == auth.user_id)
        .ok_or_else(|| ApiError::NotFound(format!("purchase not found: {purchase_id}")))?;

    Ok(Json(PurchaseResponse::from(&purchase)))
}
