//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, entitlements, generate, health, purchases, usage, webhooks};
use crate::state::AppState;

// ============================================================================
// Concurrency Limiting Constants
// ============================================================================

/// Maximum concurrent requests for usage endpoints.
const USAGE_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent generation requests. These hold a connection open for
/// the whole backend call.
const GENERATE_MAX_CONCURRENT_REQUESTS: usize = 32;

/// Maximum concurrent requests for general API endpoints.
const API_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Entitlements (user JWT)
/// - `GET /v1/entitlements/me` - Current entitlement
/// - `GET /v1/entitlements/me/entries` - Ledger entries
///
/// ## Generation (user JWT, charged on success)
/// - `POST /v1/generate/{scan|report|image|video}`
///
/// ## Purchases (user JWT)
/// - `POST /v1/purchases` - Initiate purchase
/// - `GET /v1/purchases` - List purchases
/// - `GET /v1/purchases/:id` - Get purchase
///
/// ## Usage (service API key)
/// - `POST /v1/usage/consume` - Charge a consumption that succeeded elsewhere
/// - `POST /v1/usage/check` - Check without charging
///
/// ## Admin (admin key)
/// - `GET /v1/admin/entitlements/:user_id`
/// - `PUT /v1/admin/entitlements/:user_id/tier`
/// - `POST /v1/admin/purchases/reconcile`
///
/// ## Webhooks (signature verification)
/// - `POST /webhooks/payments`
pub fn create_router(state: AppState) -> Router {
    // Extract config values before moving state
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let usage_routes = Router::new()
        .route("/consume", post(usage::consume))
        .route("/check", post(usage::check))
        .layer(ConcurrencyLimitLayer::new(USAGE_MAX_CONCURRENT_REQUESTS));

    let generate_routes = Router::new()
        .route("/:kind", post(generate::generate))
        .layer(ConcurrencyLimitLayer::new(GENERATE_MAX_CONCURRENT_REQUESTS));

    let api_routes = Router::new()
        // Entitlements
        .route("/entitlements/me", get(entitlements::get_entitlement))
        .route("/entitlements/me/entries", get(entitlements::list_entries))
        // Purchases
        .route(
            "/purchases",
            post(purchases::create_purchase).get(purchases::list_purchases),
        )
        .route("/purchases/:id", get(purchases::get_purchase))
        // Admin
        .route(
            "/admin/entitlements/:user_id",
            get(admin::get_entitlement),
        )
        .route("/admin/entitlements/:user_id/tier", put(admin::set_tier))
        .route(
            "/admin/purchases/reconcile",
            post(admin::reconcile_purchases),
        )
        .layer(ConcurrencyLimitLayer::new(API_MAX_CONCURRENT_REQUESTS))
        // Routes with their own concurrency limits
        .nest("/generate", generate_routes)
        .nest("/usage", usage_routes);

    Router::new()
        // Health (public, no rate limit)
        .route("/health", get(health::health))
        // API v1 routes (rate limited)
        .nest("/v1", api_routes)
        // Webhooks (no rate limit - controlled by the payment provider)
        .route("/webhooks/payments", post(webhooks::payment_webhook))
        // Global middleware
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
