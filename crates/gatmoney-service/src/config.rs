//! Service configuration.

use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use gatmoney_core::{PeriodLength, PolicyError, PricingConfig, TierPolicy};

/// Error loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable held an unparseable value.
    #[error("invalid value for {var}: {value}")]
    InvalidValue {
        /// The variable name.
        var: &'static str,
        /// The rejected value.
        value: String,
    },

    /// The tier policy file could not be read.
    #[error("failed to read tier policy {path}: {source}")]
    PolicyFile {
        /// Path that was tried.
        path: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The tier policy is malformed or not monotonic.
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// PostgreSQL connection string. Without it the service keeps state in memory
    /// (or in `RocksDB` when built with `rocksdb-backend`).
    pub database_url: Option<String>,

    /// Path to `RocksDB` data directory (default: "/data/gatmoney").
    pub data_dir: String,

    /// Expected JWT audience (default: "gatmoney").
    pub auth_audience: String,

    /// Shared HS256 secret of the auth backend. Without it user tokens are rejected.
    pub auth_jwt_secret: Option<String>,

    /// Service API key for service-to-service auth.
    pub service_api_key: Option<String>,

    /// Admin API key for privileged endpoints.
    pub admin_api_key: Option<String>,

    /// Generation API URL (optional).
    pub generation_api_url: Option<String>,

    /// Generation API key (optional).
    pub generation_api_key: Option<String>,

    /// How long to wait for a generation before treating it as failed.
    pub generation_timeout_seconds: u64,

    /// Payment API URL (optional).
    pub payment_api_url: Option<String>,

    /// Payment API key (optional).
    pub payment_api_key: Option<String>,

    /// Payment webhook signing secret (optional).
    pub payment_webhook_secret: Option<String>,

    /// Length of the counting period.
    pub period_length: PeriodLength,

    /// Per-tier limits.
    pub tier_policy: TierPolicy,

    /// Pricing configuration.
    pub pricing: PricingConfig,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// Payment secrets file structure.
#[derive(Debug, Deserialize)]
struct PaymentSecrets {
    api_url: String,
    api_key: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

/// Generation secrets file structure.
#[derive(Debug, Deserialize)]
struct GenerationSecrets {
    api_url: String,
    api_key: String,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is malformed or the tier policy is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // Try to load secrets from file first, then fall back to env vars
        let (payment_api_url, payment_api_key, payment_webhook_secret) = load_payment_secrets();
        let (generation_api_url, generation_api_key) = load_generation_secrets();

        let tier_policy = match std::env::var("TIER_POLICY_PATH") {
            Ok(path) => load_tier_policy(&path)?,
            Err(_) => defaults.tier_policy,
        };

        Ok(Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            database_url: std::env::var("DATABASE_URL").ok(),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            auth_audience: std::env::var("AUTH_AUDIENCE").unwrap_or(defaults.auth_audience),
            auth_jwt_secret: std::env::var("AUTH_JWT_SECRET").ok(),
            service_api_key: std::env::var("SERVICE_API_KEY").ok(),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            generation_api_url,
            generation_api_key,
            generation_timeout_seconds: parse_var(
                "GENERATION_TIMEOUT_SECONDS",
                defaults.generation_timeout_seconds,
            )?,
            payment_api_url,
            payment_api_key,
            payment_webhook_secret,
            period_length: parse_var("PERIOD_LENGTH", defaults.period_length)?,
            tier_policy,
            pricing: defaults.pricing,
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: parse_var("MAX_BODY_BYTES", defaults.max_body_bytes)?,
            request_timeout_seconds: parse_var(
                "REQUEST_TIMEOUT_SECONDS",
                defaults.request_timeout_seconds,
            )?,
        })
    }
}

/// Parse an optional environment variable, keeping `default` when unset.
fn parse_var<T: FromStr>(var: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { var, value }),
        Err(_) => Ok(default),
    }
}

/// Load and validate a tier policy JSON file.
///
/// # Errors
///
/// Returns an error if the file is unreadable, malformed, or not monotonic.
pub fn load_tier_policy(path: &str) -> Result<TierPolicy, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::PolicyFile {
        path: path.to_string(),
        source,
    })?;
    let policy = TierPolicy::from_json(&contents)?;
    tracing::info!(path = %path, "Loaded tier policy from file");
    Ok(policy)
}

/// Load payment secrets from file or environment.
fn load_payment_secrets() -> (Option<String>, Option<String>, Option<String>) {
    let secret_paths = [
        ".secrets/payments.json",
        "gatmoney/.secrets/payments.json",
        "../.secrets/payments.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<PaymentSecrets>(path) {
            tracing::info!(path = %path, "Loaded payment secrets from file");
            return (
                Some(secrets.api_url),
                Some(secrets.api_key),
                secrets.webhook_secret,
            );
        }
    }

    // Fall back to environment variables
    tracing::debug!("Payment secrets file not found, using environment variables");
    (
        std::env::var("PAYMENT_API_URL").ok(),
        std::env::var("PAYMENT_API_KEY").ok(),
        std::env::var("PAYMENT_WEBHOOK_SECRET").ok(),
    )
}

/// Load generation secrets from file or environment.
fn load_generation_secrets() -> (Option<String>, Option<String>) {
    let secret_paths = [
        ".secrets/generation.json",
        "gatmoney/.secrets/generation.json",
        "../.secrets/generation.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<GenerationSecrets>(path) {
            tracing::info!(path = %path, "Loaded generation secrets from file");
            return (Some(secrets.api_url), Some(secrets.api_key));
        }
    }

    tracing::debug!("Generation secrets file not found, using environment variables");
    (
        std::env::var("GENERATION_API_URL").ok(),
        std::env::var("GENERATION_API_KEY").ok(),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            database_url: None,
            data_dir: "/data/gatmoney".into(),
            auth_audience: "gatmoney".into(),
            auth_jwt_secret: None,
            service_api_key: None,
            admin_api_key: None,
            generation_api_url: None,
            generation_api_key: None,
            generation_timeout_seconds: 60,
            payment_api_url: None,
            payment_api_key: None,
            payment_webhook_secret: None,
            period_length: PeriodLength::Daily,
            tier_policy: TierPolicy::default(),
            pricing: PricingConfig::default(),
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 90,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_policy_is_valid() {
        let config = ServiceConfig::default();
        assert!(config.tier_policy.validate().is_ok());
        assert_eq!(config.period_length, PeriodLength::Daily);
    }

    #[test]
    fn policy_file_is_loaded_and_validated() {
        let policy = TierPolicy::default();
        let mut json: serde_json::Value = serde_json::to_value(&policy).unwrap();
        json["pro"]["max_scans_per_period"] = serde_json::json!(500);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{json}").unwrap();

        let loaded = load_tier_policy(file.path().to_str().unwrap()).unwrap();
        assert_eq!(loaded.pro.max_scans_per_period, 500);
    }

    #[test]
    fn non_monotonic_policy_file_is_rejected() {
        let policy = TierPolicy::default();
        let mut json: serde_json::Value = serde_json::to_value(&policy).unwrap();
        json["business"]["max_reports_per_period"] = serde_json::json!(1);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{json}").unwrap();

        let result = load_tier_policy(file.path().to_str().unwrap());
        assert!(matches!(result, Err(ConfigError::Policy(_))));
    }

    #[test]
    fn missing_policy_file_is_an_error() {
        let result = load_tier_policy("/definitely/not/here.json");
        assert!(matches!(result, Err(ConfigError::PolicyFile { .. })));
    }
}
