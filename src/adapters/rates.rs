//! Exchange rates from shop price to vendor currency.
//!
//! Rates can be changed at runtime; every balance check reads the current
//! value, so a transaction never pins the rate it started with.
//!
//! - `PgExchangeRates`: rows in `vendor_rates`, edited through the admin API
//! - `ConfiguredRates`: process memory, for tests and local runs

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::db::DbPool;
use crate::error::AppError;
use crate::ports::ExchangeRateProvider;

fn ensure_positive(vendor_id: &str, rate: Decimal) -> Result<Decimal, AppError> {
    if rate <= Decimal::ZERO {
        return Err(AppError::Internal(format!(
            "exchange rate for vendor {vendor_id} is not positive"
        )));
    }
    Ok(rate)
}

/// Rates stored in Postgres. Vendors without a row use `default_rate`
/// (`VENDOR_EXCHANGE_RATE`).
#[derive(Clone)]
pub struct PgExchangeRates {
    pool: DbPool,
    default_rate: Decimal,
}

impl PgExchangeRates {
    pub fn new(pool: DbPool, default_rate: Decimal) -> Self {
        Self { pool, default_rate }
    }
}

#[async_trait]
impl ExchangeRateProvider for PgExchangeRates {
    async fn vendor_rate(&self, vendor_id: &str) -> Result<Decimal, AppError> {
        let stored = sqlx::query_scalar::<_, Decimal>(
            "SELECT rate FROM vendor_rates WHERE vendor_id = $1",
        )
        .bind(vendor_id)
        .fetch_optional(&self.pool)
        .await?;

        ensure_positive(vendor_id, stored.unwrap_or(self.default_rate))
    }

    async fn set_vendor_rate(&self, vendor_id: &str, rate: Decimal) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO vendor_rates (vendor_id, rate, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (vendor_id) DO UPDATE SET rate = EXCLUDED.rate, updated_at = NOW()
            "#,
        )
        .bind(vendor_id)
        .bind(rate)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[derive(Clone)]
pub struct ConfiguredRates {
    default_rate: Arc<RwLock<Decimal>>,
    overrides: Arc<RwLock<HashMap<String, Decimal>>>,
}

impl ConfiguredRates {
    pub fn new(default_rate: Decimal) -> Self {
        Self {
            default_rate: Arc::new(RwLock::new(default_rate)),
            overrides: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn set_default(&self, rate: Decimal) {
        *self.default_rate.write().await = rate;
    }
}

#[async_trait]
impl ExchangeRateProvider for ConfiguredRates {
    async fn vendor_rate(&self, vendor_id: &str) -> Result<Decimal, AppError> {
        let rate = match self.overrides.read().await.get(vendor_id) {
            Some(rate) => *rate,
            None => *self.default_rate.read().await,
        };
        ensure_positive(vendor_id, rate)
    }

    async fn set_vendor_rate(&self, vendor_id: &str, rate: Decimal) -> Result<(), AppError> {
        self.overrides
            .write()
            .await
            .insert(vendor_id.to_string(), rate);
        Ok(())
    }
}
