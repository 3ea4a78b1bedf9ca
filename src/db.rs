//! Database connection pool and migration management.
//!
//! The service owns two tables: `transactions` and the operator-editable
//! `vendor_rates`. Their schema lives in `migrations/` and is embedded into
//! the binary at compile time.

use std::time::Duration;

use sqlx::{Pool, Postgres};

pub type DbPool = Pool<Postgres>;

/// Create a new PostgreSQL connection pool.
///
/// # Configuration
///
/// - Maximum connections: 5
/// - Acquire timeout: 5 seconds, so a saturated pool surfaces as a 500
///   instead of a hung webhook
///
/// # Errors
///
/// Returns an error if the connection string is invalid or the server
/// cannot be reached.
pub async fn create_pool(database_url: &str) -> Result<DbPool, sqlx::Error> {
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await
}

/// Run the embedded migrations.
///
/// Applied migrations are tracked in `_sqlx_migrations`, so each file runs once.
pub async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}
