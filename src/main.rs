//! Purchase orchestrator - Main Application Entry Point
//!
//! Brokers digital goods purchases: hosted checkout through the payment
//! gateway, webhook-driven payment confirmation, queued vendor fulfillment
//! and refunds when fulfillment cannot complete.
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool and run migrations
//! 3. Connect to Redis for the fulfillment lock
//! 4. Build the gateway, vendor and operator adapters
//! 5. Start the fulfillment workers and requeue paid transactions left
//!    unfinished by the previous process
//! 6. Build HTTP router and start server on configured port

use std::sync::Arc;

use tracing_subscriber::EnvFilter;

use topup_orchestrator::{
    AppState,
    adapters::{
        events::BroadcastPublisher, notifier::OperatorChannel,
        payment_gateway::HttpPaymentGateway, postgres::PgTransactionStore, rates::PgExchangeRates,
        redis_lock::RedisLock, vendor_gateway::HttpVendorGateway,
    },
    config, create_app, db,
    services::{
        orchestrator::{OrchestratorDeps, TransactionOrchestrator},
        queue::FulfillmentQueue,
        vendors::VendorRegistry,
    },
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reads RUST_LOG (defaults to "info")
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let lock = RedisLock::connect(&config.redis_url).await?;
    tracing::info!("Connected to Redis");

    let vendor = HttpVendorGateway::new(
        &config.vendor_base_url,
        &config.vendor_uid,
        &config.vendor_api_key,
    )?;
    let vendors = VendorRegistry::new(&config.default_vendor_id)
        .with_vendor(&config.default_vendor_id, Arc::new(vendor));

    let notifier = match (&config.operator_webhook_url, &config.operator_webhook_secret) {
        (Some(url), Some(secret)) => OperatorChannel::with_webhook(url, secret)?,
        _ => {
            tracing::warn!("No operator webhook configured, alerts are only logged");
            OperatorChannel::log_only()
        }
    };

    let events = BroadcastPublisher::new();
    let queue = FulfillmentQueue::new();
    let orchestrator = TransactionOrchestrator::new(
        OrchestratorDeps {
            store: Arc::new(PgTransactionStore::new(pool.clone())),
            lock: Arc::new(lock),
            events: Arc::new(events.clone()),
            payment_gateway: Arc::new(HttpPaymentGateway::new(
                &config.payment_gateway_url,
                &config.payment_gateway_secret,
            )?),
            vendors,
            rates: Arc::new(PgExchangeRates::new(pool, config.vendor_exchange_rate)),
            notifier: Arc::new(notifier),
            queue: queue.clone(),
        },
        config.orchestrator_settings(),
    );

    queue.start(config.fulfillment_workers);
    tracing::info!("Started {} fulfillment workers", config.fulfillment_workers);

    let recovered = orchestrator.recover_pending_fulfillment().await?;
    tracing::info!("Startup recovery requeued {} transaction(s)", recovered);

    let app = create_app(AppState {
        orchestrator,
        events,
        admin_api_key_hash: Arc::from(config.admin_api_key_hash.as_str()),
    });

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
