//! Error types and HTTP error response handling.
//!
//! This module defines the service-wide `AppError` and the errors raised by
//! the two external ports (payment gateway and vendor). Port errors carry a
//! stable code so they can be recorded on a transaction and returned to
//! callers in the same shape.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Application-wide error type.
///
/// # Error Categories
///
/// - **Validation Errors**: bad or missing fields, unsupported SPU type
/// - **Gateway Errors**: payment initiation failure, invalid webhook signature
/// - **Vendor Errors**: classified as retryable or not
/// - **Resource Errors**: transaction not found
/// - **Infrastructure Errors**: database, lock store, queue
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Lock store (Redis) operation failed.
    #[error("Lock store error: {0}")]
    LockStore(#[from] redis::RedisError),

    /// Missing or invalid admin API key.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Invalid API key")]
    InvalidApiKey,

    /// Webhook signature did not verify. No transaction is touched.
    ///
    /// Returns HTTP 401 Unauthorized.
    #[error("Invalid webhook signature")]
    InvalidSignature,

    /// No transaction with this id exists.
    ///
    /// Returns HTTP 404 Not Found.
    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    /// Vendor balance cannot cover the purchase.
    ///
    /// Returns HTTP 402 Payment Required.
    #[error("Insufficient vendor balance")]
    InsufficientBalance,

    /// Request body or parameters are invalid.
    ///
    /// Returns HTTP 400 Bad Request.
    #[error("Invalid request")]
    InvalidRequest(String),

    /// Payment gateway call failed.
    ///
    /// Returns HTTP 502 Bad Gateway.
    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Vendor call failed.
    ///
    /// Returns HTTP 502 Bad Gateway.
    #[error("Vendor error: {0}")]
    Vendor(#[from] VendorError),

    /// Refund could not be completed and needs manual follow-up.
    #[error("Refund failed for {transaction_id}: {reason}")]
    RefundFailed {
        transaction_id: String,
        reason: String,
    },

    /// Fulfillment queue rejected a job.
    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable machine-readable code, used in responses and audit records.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Database(_) | AppError::LockStore(_) | AppError::Internal(_) => {
                "internal_error"
            }
            AppError::InvalidApiKey => "invalid_api_key",
            AppError::InvalidSignature => "invalid_signature",
            AppError::TransactionNotFound(_) => "transaction_not_found",
            AppError::InsufficientBalance => "insufficient_balance",
            AppError::InvalidRequest(_) => "invalid_request",
            AppError::Gateway(_) => "gateway_error",
            AppError::Vendor(e) => e.category.code(),
            AppError::RefundFailed { .. } => "refund_failed",
            AppError::Queue(_) => "queue_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidApiKey | AppError::InvalidSignature => StatusCode::UNAUTHORIZED,
            AppError::TransactionNotFound(_) => StatusCode::NOT_FOUND,
            AppError::InsufficientBalance => StatusCode::PAYMENT_REQUIRED,
            AppError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Gateway(GatewayError::InvalidSignature) => StatusCode::UNAUTHORIZED,
            AppError::Gateway(GatewayError::MalformedCallback(_)) => StatusCode::BAD_REQUEST,
            AppError::Gateway(_) | AppError::Vendor(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_)
            | AppError::LockStore(_)
            | AppError::RefundFailed { .. }
            | AppError::Queue(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Convert AppError into an HTTP response.
///
/// # Response Format
///
/// ```json
/// {
///   "error": {
///     "code": "error_type",
///     "message": "Human-readable error message"
///   }
/// }
/// ```
///
/// Infrastructure failures hide their details from the client.
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!("Internal error: {}", self);
            "An internal error occurred".to_string()
        } else {
            match &self {
                AppError::InvalidRequest(msg) => msg.clone(),
                other => other.to_string(),
            }
        };

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

/// Errors raised by the payment gateway port.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("payment initiation failed: {0}")]
    Initiation(String),

    #[error("invalid callback signature")]
    InvalidSignature,

    #[error("malformed callback: {0}")]
    MalformedCallback(String),

    #[error("refund rejected: {0}")]
    Refund(String),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Classification of a vendor failure.
///
/// The category decides whether a fulfillment job is retried or the
/// transaction is failed immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VendorErrorCategory {
    Network,
    Timeout,
    Server,
    Validation,
    InsufficientBalance,
    Unknown,
}

impl VendorErrorCategory {
    pub fn code(self) -> &'static str {
        match self {
            VendorErrorCategory::Network => "VENDOR_NETWORK_ERROR",
            VendorErrorCategory::Timeout => "VENDOR_TIMEOUT",
            VendorErrorCategory::Server => "VENDOR_SERVER_ERROR",
            VendorErrorCategory::Validation => "VENDOR_VALIDATION_ERROR",
            VendorErrorCategory::InsufficientBalance => "VENDOR_INSUFFICIENT_BALANCE",
            VendorErrorCategory::Unknown => "VENDOR_UNKNOWN_ERROR",
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            VendorErrorCategory::Network | VendorErrorCategory::Timeout | VendorErrorCategory::Server
        )
    }

    /// Categorize a free-form vendor error message.
    ///
    /// Used when a vendor reports failure in its response body rather than
    /// through a transport error or HTTP status.
    pub fn from_message(message: &str) -> Self {
        let msg = message.to_lowercase();
        if msg.contains("timeout") || msg.contains("timed out") {
            VendorErrorCategory::Timeout
        } else if msg.contains("network") || msg.contains("connection") {
            VendorErrorCategory::Network
        } else if msg.contains("balance") || msg.contains("insufficient") {
            VendorErrorCategory::InsufficientBalance
        } else if msg.contains("validation") || msg.contains("invalid") {
            VendorErrorCategory::Validation
        } else if msg.contains("server")
            || msg.contains("temporarily unavailable")
            || msg.contains("rate limit")
            || msg.contains("too many requests")
            || msg.contains("try again")
        {
            VendorErrorCategory::Server
        } else {
            VendorErrorCategory::Unknown
        }
    }

    /// Categorize an HTTP status returned by the vendor.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 | 500..=599 => VendorErrorCategory::Server,
            408 => VendorErrorCategory::Timeout,
            400..=499 => VendorErrorCategory::Validation,
            _ => VendorErrorCategory::Unknown,
        }
    }
}

/// A vendor failure with its category.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message} ({})", .category.code())]
pub struct VendorError {
    pub category: VendorErrorCategory,
    pub message: String,
}

impl VendorError {
    pub fn new(category: VendorErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }

    /// Build an error whose category is inferred from the message text.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            category: VendorErrorCategory::from_message(&message),
            message,
        }
    }

    pub fn retryable(&self) -> bool {
        self.category.is_retryable()
    }
}

impl From<reqwest::Error> for VendorError {
    fn from(e: reqwest::Error) -> Self {
        let category = if e.is_timeout() {
            VendorErrorCategory::Timeout
        } else if e.is_connect() || e.is_request() {
            VendorErrorCategory::Network
        } else if let Some(status) = e.status() {
            VendorErrorCategory::from_status(status.as_u16())
        } else if e.is_decode() {
            VendorErrorCategory::Server
        } else {
            VendorErrorCategory::Unknown
        };
        Self::new(category, e.to_string())
    }
}
