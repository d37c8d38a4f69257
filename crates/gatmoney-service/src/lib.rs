//! GATMONEY entitlement service.
//!
//! This crate provides the HTTP API that meters paid actions of the GATMONEY
//! front-end:
//!
//! - Per-period scan and report allowances by tier
//! - Image credits and video seconds, bought through purchases
//! - Generation endpoints that charge only when the backend succeeds
//! - Payment webhooks that settle purchases and grant credits exactly once
//!
//! # Authentication
//!
//! 1. **User JWTs** - for the front-end
//! 2. **Service API keys** - for services that report usage themselves
//! 3. **Admin keys** - for tier changes and reconciliation

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Allow some pedantic lints that are noisy for Axum handler functions
#![allow(clippy::missing_errors_doc)] // Axum handlers all return Result
#![allow(clippy::unused_async)] // Health handler is async for the router

pub mod auth;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod error;
pub mod generation;
pub mod handlers;
pub mod ledger;
pub mod payments;
pub mod routes;
pub mod state;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigError, ServiceConfig};
pub use error::ApiError;
pub use generation::{
    GeneratedAsset, GenerationError, GenerationKind, GenerationProvider, GenerationRequest,
    HttpGenerationProvider,
};
pub use ledger::{Ledger, LedgerError, ReconcileReport};
pub use payments::{HttpPaymentProvider, PaymentError, PaymentProvider, PaymentSession};
pub use routes::create_router;
pub use state::AppState;
