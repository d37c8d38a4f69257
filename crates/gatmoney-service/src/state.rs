//! Application state.

use std::sync::Arc;
use std::time::Duration;

use gatmoney_store::Store;

use crate::clock::{Clock, SystemClock};
use crate::config::ServiceConfig;
use crate::generation::{GenerationProvider, HttpGenerationProvider};
use crate::ledger::Ledger;
use crate::payments::{HttpPaymentProvider, PaymentProvider};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<dyn Store>,

    /// Entitlement orchestration over `store`.
    pub ledger: Arc<Ledger>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Generation backend (optional).
    pub generation: Option<Arc<dyn GenerationProvider>>,
}

impl AppState {
    /// Create application state with HTTP collaborators built from `config`.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, config: ServiceConfig) -> Self {
        // Create generation client if configured
        let generation = config
            .generation_api_url
            .as_ref()
            .zip(config.generation_api_key.as_ref())
            .and_then(|(url, key)| match HttpGenerationProvider::new(url, key) {
                Ok(client) => {
                    tracing::info!(generation_url = %url, "Generation backend enabled");
                    Some(Arc::new(client) as Arc<dyn GenerationProvider>)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create generation client");
                    None
                }
            });

        if generation.is_none() {
            tracing::warn!("Generation backend not configured - generate endpoints will fail");
        }

        // Create payment client if configured
        let payments = config
            .payment_api_url
            .as_ref()
            .zip(config.payment_api_key.as_ref())
            .and_then(|(url, key)| match HttpPaymentProvider::new(url, key) {
                Ok(client) => {
                    tracing::info!(payment_url = %url, "Payments enabled");
                    Some(Arc::new(client) as Arc<dyn PaymentProvider>)
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to create payment client");
                    None
                }
            });

        if payments.is_none() {
            tracing::warn!("Payments not configured - purchases will not be available");
        }

        if config.auth_jwt_secret.is_none() {
            tracing::warn!("AUTH_JWT_SECRET not set - user requests will be rejected");
        }

        Self::from_parts(store, config, Arc::new(SystemClock), generation, payments)
    }

    /// Assemble state from explicit collaborators.
    #[must_use]
    pub fn from_parts(
        store: Arc<dyn Store>,
        config: ServiceConfig,
        clock: Arc<dyn Clock>,
        generation: Option<Arc<dyn GenerationProvider>>,
        payments: Option<Arc<dyn PaymentProvider>>,
    ) -> Self {
        let mut ledger = Ledger::new(
            store.clone(),
            config.tier_policy.clone(),
            config.period_length,
        )
        .with_pricing(config.pricing.clone())
        .with_clock(clock)
        .with_external_timeout(Duration::from_secs(config.generation_timeout_seconds));

        if let Some(payments) = payments {
            ledger = ledger.with_payments(payments);
        }

        Self {
            store,
            ledger: Arc::new(ledger),
            config,
            generation,
        }
    }

    /// Check if the generation backend is configured.
    #[must_use]
    pub fn has_generation(&self) -> bool {
        self.generation.is_some()
    }

    /// Check if payments are configured.
    #[must_use]
    pub fn has_payments(&self) -> bool {
        self.ledger.has_payments()
    }
}
