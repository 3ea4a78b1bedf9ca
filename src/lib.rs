//! Digital goods purchase orchestrator.
//!
//! Drives a purchase from checkout through payment confirmation, vendor
//! fulfillment and, when anything fails after money was captured, a refund.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx, one row per transaction
//! - **Locking**: Redis `SET NX PX` leases around vendor fulfillment
//! - **Queue**: in-process workers with bounded retries and backoff
//! - **Authentication**: signed gateway webhooks, hashed admin API key
//!
//! `create_app` builds the router; `main` wires real adapters into it and
//! the integration tests wire in-memory ones.

pub mod adapters;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod ports;
pub mod services;

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post, put},
};
use tower_http::trace::TraceLayer;

use crate::adapters::events::BroadcastPublisher;
use crate::services::orchestrator::TransactionOrchestrator;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<TransactionOrchestrator>,
    /// Source of the live status stream
    pub events: BroadcastPublisher,
    /// SHA-256 hex of the admin bearer key
    pub admin_api_key_hash: Arc<str>,
}

/// Build the HTTP router.
///
/// # Routes
///
/// Public:
/// - `GET /health`
/// - `POST /api/v1/purchases/{spu_id}`
/// - `GET /api/v1/transactions/{id}/status`
/// - `GET /api/v1/transactions/{id}/events`
///
/// Gateway callbacks (signature checked in the handler):
/// - `POST /api/v1/webhooks/payment`
/// - `POST /api/v1/webhooks/refund`
///
/// Admin (bearer key):
/// - `GET /api/v1/admin/transactions/{id}`
/// - `POST /api/v1/admin/transactions/{id}/reconcile`
/// - `POST /api/v1/admin/transactions/{id}/cancel`
/// - `PUT /api/v1/admin/vendors/{vendor_id}/rate`
pub fn create_app(state: AppState) -> Router {
    let admin_routes = Router::new()
        .route(
            "/api/v1/admin/transactions/{id}",
            get(handlers::admin::get_transaction),
        )
        .route(
            "/api/v1/admin/transactions/{id}/reconcile",
            post(handlers::admin::reconcile_transaction),
        )
        .route(
            "/api/v1/admin/transactions/{id}/cancel",
            post(handlers::admin::cancel_transaction),
        )
        .route(
            "/api/v1/admin/vendors/{vendor_id}/rate",
            put(handlers::admin::set_vendor_rate),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::auth::admin_auth_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health::health_check))
        .route(
            "/api/v1/purchases/{spu_id}",
            post(handlers::purchases::create_purchase),
        )
        .route(
            "/api/v1/webhooks/payment",
            post(handlers::webhooks::payment_webhook),
        )
        .route(
            "/api/v1/webhooks/refund",
            post(handlers::webhooks::refund_webhook),
        )
        .route(
            "/api/v1/transactions/{id}/status",
            get(handlers::transactions::get_status),
        )
        .route(
            "/api/v1/transactions/{id}/events",
            get(handlers::transactions::stream_events),
        )
        .merge(admin_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
