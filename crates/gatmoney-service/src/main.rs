//! GATMONEY Service - HTTP API for entitlements, credits and purchases.
//!
//! This is the main entry point for the gatmoney service.

use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gatmoney_service::{create_router, AppState, ServiceConfig};
use gatmoney_store::{PgStore, Store};

/// Connections kept in the PostgreSQL pool.
const PG_MAX_CONNECTIONS: u32 = 10;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,gatmoney=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting GATMONEY Service");

    // Load configuration from environment
    let config = ServiceConfig::from_env()?;

    tracing::info!(
        listen_addr = %config.listen_addr,
        period = %config.period_length,
        postgres = %config.database_url.is_some(),
        generation_configured = %config.generation_api_url.is_some(),
        payments_configured = %config.payment_api_url.is_some(),
        webhook_verification = %config.payment_webhook_secret.is_some(),
        "Service configuration loaded"
    );

    let store = open_store(&config).await?;

    // Build app state
    let state = AppState::new(store, config.clone());

    // Create the router
    let app = create_router(state);
    tracing::info!("Router configured with all API endpoints");

    // Start HTTP server
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Pick the storage backend: PostgreSQL when `DATABASE_URL` is set, else
/// `RocksDB` if compiled in, else memory.
async fn open_store(config: &ServiceConfig) -> Result<Arc<dyn Store>, Box<dyn std::error::Error>> {
    if let Some(url) = &config.database_url {
        tracing::info!("Connecting to PostgreSQL");
        let store = PgStore::connect(url, PG_MAX_CONNECTIONS).await?;
        store.migrate().await?;
        return Ok(Arc::new(store));
    }

    #[cfg(feature = "rocksdb-backend")]
    {
        tracing::info!(path = %config.data_dir, "Opening RocksDB store");
        Ok(Arc::new(gatmoney_store::RocksStore::open(&config.data_dir)?))
    }

    #[cfg(not(feature = "rocksdb-backend"))]
    {
        tracing::warn!("DATABASE_URL not set - entitlements are kept in memory only");
        Ok(Arc::new(gatmoney_store::MemoryStore::new()))
    }
}
