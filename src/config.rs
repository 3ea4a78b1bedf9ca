//! Application configuration management.
//!
//! This module handles loading configuration from environment variables.
//! It uses the `envy` crate to deserialize environment variables into a type-safe struct.

use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

/// Application configuration loaded from environment variables.
///
/// # Environment Variables
///
/// - `DATABASE_URL` (required): PostgreSQL connection string
/// - `SERVER_PORT` (optional): HTTP server port, defaults to 3000
/// - `REDIS_URL` (optional): lock store, defaults to `redis://127.0.0.1:6379`
/// - `PAYMENT_GATEWAY_URL`, `PAYMENT_GATEWAY_SECRET` (required): hosted checkout API
/// - `PAYMENT_REDIRECT_URL` (optional): used when a purchase carries no redirect URL
/// - `VENDOR_BASE_URL`, `VENDOR_UID`, `VENDOR_API_KEY` (required): vendor API
/// - `DEFAULT_VENDOR_ID` (optional): defaults to `smileone`
/// - `VENDOR_EXCHANGE_RATE` (required): price to vendor-currency multiplier for
///   vendors without a row in `vendor_rates`
/// - `LOCK_TTL_SECS` (optional): fulfillment lock TTL, defaults to 60
/// - `FULFILLMENT_MAX_ATTEMPTS` (optional): defaults to 3
/// - `FULFILLMENT_BACKOFF_MS` (optional): exponential backoff base, defaults to 5000
/// - `FULFILLMENT_WORKERS` (optional): defaults to 4
/// - `RECONCILIATION_THRESHOLD_SECS` (optional): defaults to 300
/// - `ADMIN_API_KEY_HASH` (required): SHA-256 hex of the admin bearer key
/// - `OPERATOR_WEBHOOK_URL`, `OPERATOR_WEBHOOK_SECRET` (optional): operator channel
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "default_port")]
    pub server_port: u16,

    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    pub payment_gateway_url: String,
    pub payment_gateway_secret: String,
    #[serde(default)]
    pub payment_redirect_url: Option<String>,

    pub vendor_base_url: String,
    pub vendor_uid: String,
    pub vendor_api_key: String,
    #[serde(default = "default_vendor_id")]
    pub default_vendor_id: String,
    pub vendor_exchange_rate: Decimal,

    #[serde(default = "default_lock_ttl_secs")]
    pub lock_ttl_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub fulfillment_max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub fulfillment_backoff_ms: u64,
    #[serde(default = "default_workers")]
    pub fulfillment_workers: usize,
    #[serde(default = "default_reconciliation_threshold_secs")]
    pub reconciliation_threshold_secs: u64,

    pub admin_api_key_hash: String,

    #[serde(default)]
    pub operator_webhook_url: Option<String>,
    #[serde(default)]
    pub operator_webhook_secret: Option<String>,
}

fn default_port() -> u16 {
    3000
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_vendor_id() -> String {
    "smileone".to_string()
}

fn default_lock_ttl_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    5000
}

fn default_workers() -> usize {
    4
}

fn default_reconciliation_threshold_secs() -> u64 {
    300
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// This method first attempts to load a `.env` file (which is optional),
    /// then reads environment variables and deserializes them into a Config struct.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Required environment variables are missing (e.g., DATABASE_URL)
    /// - Environment variable values cannot be parsed into expected types
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>()
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            default_redirect_url: self.payment_redirect_url.clone(),
            lock_ttl: Duration::from_secs(self.lock_ttl_secs),
            max_attempts: self.fulfillment_max_attempts.max(1),
            backoff_base: Duration::from_millis(self.fulfillment_backoff_ms),
            reconciliation_threshold: Duration::from_secs(self.reconciliation_threshold_secs),
        }
    }
}

/// Knobs the orchestrator and its services read at runtime.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub default_redirect_url: Option<String>,
    pub lock_ttl: Duration,
    /// Queue attempts per fulfillment job, also the vendor retry bound
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub reconciliation_threshold: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            default_redirect_url: None,
            lock_ttl: Duration::from_secs(default_lock_ttl_secs()),
            max_attempts: default_max_attempts(),
            backoff_base: Duration::from_millis(default_backoff_ms()),
            reconciliation_threshold: Duration::from_secs(default_reconciliation_threshold_secs()),
        }
    }
}
