//! Webhook models for gateway callbacks and outbound notifications.
//!
//! Inbound:
//! - Payment and refund callbacks from the payment gateway
//! - The merchant order identifier that links a callback to a transaction
//!
//! Outbound:
//! - `TransactionEvent`: live status updates fanned out to observers
//! - `OperatorAlert`: signed webhook payload for the operator channel
//!
//! # Signature Verification
//!
//! Callbacks and operator alerts are signed with HMAC-SHA256 over the raw
//! JSON body, sent as `sha256=<hex>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AppError, GatewayError};
use crate::models::transaction::{SubStatus, Transaction, TransactionStatus};

/// Payment state reported by the gateway for a successful capture.
pub const PAYMENT_COMPLETED: &str = "COMPLETED";
/// Refund state reported by the gateway once the money is returned.
pub const REFUND_COMPLETED: &str = "COMPLETED";
/// Refund state reported by the gateway for a failed refund.
pub const REFUND_FAILED: &str = "FAILED";

/// Callback body sent by the payment gateway.
///
/// # Example
///
/// ```json
/// {
///   "event": "checkout.order.completed",
///   "payload": {
///     "merchantOrderId": "spu42-2f6a4c1e-8f0e-4c55-9d0b-3b1c9e7a6d21",
///     "orderId": "OMO2501151030",
///     "state": "COMPLETED"
///   }
/// }
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayCallback {
    #[serde(default)]
    pub event: Option<String>,
    pub payload: CallbackPayload,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    #[serde(default)]
    pub merchant_order_id: Option<String>,
    /// Set on refund callbacks instead of `merchant_order_id`
    #[serde(default)]
    pub original_merchant_order_id: Option<String>,
    /// Gateway-side order id
    #[serde(default)]
    pub order_id: Option<String>,
    pub state: String,
    #[serde(default)]
    pub refund_id: Option<String>,
    #[serde(default)]
    pub merchant_refund_id: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
}

impl GatewayCallback {
    pub fn is_payment_completed(&self) -> bool {
        self.payload.state == PAYMENT_COMPLETED
    }

    /// The merchant order id, required on every callback we act on.
    pub fn merchant_order_id(&self) -> Result<MerchantOrderId, AppError> {
        let raw = self
            .payload
            .merchant_order_id
            .as_deref()
            .or(self.payload.original_merchant_order_id.as_deref())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                AppError::Gateway(GatewayError::MalformedCallback(
                    "Missing merchant order ID in webhook payload".to_string(),
                ))
            })?;
        MerchantOrderId::parse(raw)
    }
}

/// `<spuId>-<transactionId>` as sent to and received from the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MerchantOrderId {
    pub spu_id: String,
    pub transaction_id: String,
}

impl MerchantOrderId {
    /// Split on the first hyphen only. Transaction ids are UUIDs and carry
    /// their own hyphens, so everything after the first one belongs to the id.
    pub fn parse(raw: &str) -> Result<Self, AppError> {
        match raw.split_once('-') {
            Some((spu_id, transaction_id)) if !spu_id.is_empty() && !transaction_id.is_empty() => {
                Ok(Self {
                    spu_id: spu_id.to_string(),
                    transaction_id: transaction_id.to_string(),
                })
            }
            _ => Err(AppError::Gateway(GatewayError::MalformedCallback(format!(
                "Invalid merchant order ID format: {raw}"
            )))),
        }
    }
}

impl std::fmt::Display for MerchantOrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.spu_id, self.transaction_id)
    }
}

/// Live status update for one transaction.
///
/// Published after every persisted transition; delivery is best-effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionEvent {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub sub_status: SubStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl TransactionEvent {
    pub fn new(transaction_id: &str, sub_status: SubStatus, message: impl Into<String>) -> Self {
        Self {
            transaction_id: transaction_id.to_string(),
            status: sub_status.status(),
            sub_status,
            message: message.into(),
            timestamp: Utc::now(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// User-facing message for a sub-status.
pub fn status_message(sub_status: SubStatus) -> &'static str {
    match sub_status {
        SubStatus::OrderInitiated => "Your order has been created.",
        SubStatus::GatewayInitiated | SubStatus::PaymentInProgress => {
            "Waiting for payment confirmation..."
        }
        SubStatus::PaymentSuccess => "Payment successful, processing your order...",
        SubStatus::VendorQueued => "Payment confirmed! Purchasing your coins...",
        SubStatus::VendorProcessing => "Processing your purchase...",
        SubStatus::OrderPlaced => "Your purchase was successful!",
        SubStatus::GatewayFailed => "We could not start your payment. Please try again.",
        SubStatus::PaymentFailed => "Payment failed. Please try again.",
        SubStatus::VendorFailed => {
            "We were unable to complete your purchase. A refund has been initiated."
        }
        SubStatus::BalanceError => {
            "We currently cannot fulfill your purchase. A refund has been initiated."
        }
        SubStatus::AdminCancelled => {
            "Your transaction has been cancelled. A refund will be processed."
        }
        SubStatus::RefundInitiated => "A refund has been initiated.",
        SubStatus::RefundCompleted => "Your payment has been refunded.",
        SubStatus::RefundFailed => {
            "We encountered an issue processing your refund. Our team has been notified."
        }
    }
}

/// Kind of operator alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    ReconciliationNeeded,
    ReconciliationCompleted,
    ReconciliationFailed,
    ReconciliationError,
    TransactionRequeued,
    TransactionCancelled,
    RefundFailed,
    FulfillmentError,
}

impl AlertKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertKind::ReconciliationNeeded => "reconciliation_needed",
            AlertKind::ReconciliationCompleted => "reconciliation_completed",
            AlertKind::ReconciliationFailed => "reconciliation_failed",
            AlertKind::ReconciliationError => "reconciliation_error",
            AlertKind::TransactionRequeued => "transaction_requeued",
            AlertKind::TransactionCancelled => "transaction_cancelled",
            AlertKind::RefundFailed => "refund_failed",
            AlertKind::FulfillmentError => "fulfillment_error",
        }
    }
}

/// Message for the operator channel.
///
/// # Example
///
/// ```json
/// {
///   "event_type": "reconciliation_needed",
///   "event_id": "550e8400-e29b-41d4-a716-446655440000",
///   "created_at": "2025-01-15T10:30:00Z",
///   "transaction_id": "2f6a4c1e-8f0e-4c55-9d0b-3b1c9e7a6d21",
///   "message": "Transaction 2f6a... is stuck and needs reconciliation",
///   "data": { "status": "PROCESSING", "sub_status": "VENDOR_QUEUED" }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorAlert {
    pub event_type: AlertKind,
    pub event_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub transaction_id: String,
    pub message: String,
    pub data: Value,
}

impl OperatorAlert {
    pub fn new(kind: AlertKind, transaction: &Transaction, message: impl Into<String>) -> Self {
        Self {
            event_type: kind,
            event_id: Uuid::new_v4(),
            created_at: Utc::now(),
            transaction_id: transaction.transaction_id.clone(),
            message: message.into(),
            data: serde_json::json!({
                "status": transaction.status,
                "sub_status": transaction.sub_status,
                "vendor_id": transaction.vendor_id,
                "vendor_retry_count": transaction.vendor_retry_count,
                "last_vendor_error": transaction.last_vendor_error,
                "updated_at": transaction.updated_at,
            }),
        }
    }
}
