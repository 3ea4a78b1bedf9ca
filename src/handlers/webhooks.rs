//! Payment gateway callback handlers.
//!
//! - POST /api/v1/webhooks/payment - Payment completed or failed
//! - POST /api/v1/webhooks/refund - Refund completed or failed out-of-band
//!
//! Both read the raw body so the signature is checked over the exact bytes
//! the gateway signed. Repeated deliveries are answered with 200 and an
//! `already_processed`-style outcome so the gateway stops retrying.

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, header::AUTHORIZATION},
};
use serde::Serialize;

use crate::{
    AppState,
    error::AppError,
    services::{orchestrator::WebhookOutcome, refund::RefundWebhookOutcome},
};

/// Webhook acknowledgement.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck<T> {
    pub success: bool,
    pub transaction_id: String,
    pub outcome: T,
}

fn authorization(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTHORIZATION).and_then(|h| h.to_str().ok())
}

/// Payment callback.
///
/// # Response
///
/// - **Success (200)**: `{"success": true, "transactionId": "...", "outcome": "queued"}`
/// - **Error (400)**: no usable merchant order id
/// - **Error (401)**: signature did not verify; nothing was changed
/// - **Error (404)**: unknown transaction
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck<WebhookOutcome>>, AppError> {
    let (transaction_id, outcome) = state
        .orchestrator
        .handle_payment_webhook(authorization(&headers), &body)
        .await?;
    tracing::info!("Payment webhook for {} handled: {:?}", transaction_id, outcome);

    Ok(Json(WebhookAck {
        success: true,
        transaction_id,
        outcome,
    }))
}

/// Refund callback. Same contract as the payment callback.
pub async fn refund_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck<RefundWebhookOutcome>>, AppError> {
    let (transaction_id, outcome) = state
        .orchestrator
        .handle_refund_webhook(authorization(&headers), &body)
        .await?;
    tracing::info!("Refund webhook for {} handled: {:?}", transaction_id, outcome);

    Ok(Json(WebhookAck {
        success: true,
        transaction_id,
        outcome,
    }))
}
