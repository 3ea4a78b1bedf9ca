//! Seams between the orchestrator and the outside world.
//!
//! Every external collaborator sits behind one of these traits so the
//! composition root can wire Postgres, Redis and HTTP clients in production
//! and in-memory doubles in tests.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::{AppError, GatewayError, VendorError};
use crate::models::transaction::{SubStatus, Transaction, TransactionStatus, TransactionUpdate};
use crate::models::vendor::{VendorOrderStatus, VendorPurchaseRequest, VendorReceipt};
use crate::models::webhook::{GatewayCallback, OperatorAlert, TransactionEvent};

/// Document-style persistence for transactions.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(&self, tx: &Transaction) -> Result<(), AppError>;

    async fn find_one(&self, transaction_id: &str) -> Result<Option<Transaction>, AppError>;

    /// Write only the fields set on `update` and return the stored result.
    ///
    /// Returns `None` when no transaction has this id.
    async fn update_partial(
        &self,
        transaction_id: &str,
        update: &TransactionUpdate,
    ) -> Result<Option<Transaction>, AppError>;

    /// Like `update_partial`, but only while the stored sub-status is still
    /// `expected`. The check and the write are one atomic step.
    ///
    /// Returns `None` when no transaction has this id in that sub-status.
    async fn update_if_sub_status(
        &self,
        transaction_id: &str,
        expected: SubStatus,
        update: &TransactionUpdate,
    ) -> Result<Option<Transaction>, AppError>;

    /// All transactions in `status`, oldest update first.
    async fn find_by_status(&self, status: TransactionStatus) -> Result<Vec<Transaction>, AppError>;

    /// Connectivity check for the health endpoint.
    async fn ping(&self) -> Result<(), AppError>;
}

/// Proof of a held lock. Release only succeeds for the matching token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub key: String,
    pub token: String,
}

/// TTL-bound exclusive lock shared across processes.
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// Try once. `None` means another holder has it.
    async fn acquire(&self, key: &str, ttl: Duration) -> Result<Option<LockLease>, AppError>;

    async fn release(&self, lease: &LockLease) -> Result<(), AppError>;
}

/// Fan-out of transaction state changes. Cannot fail observably.
pub trait EventPublisher: Send + Sync {
    fn publish(&self, event: TransactionEvent);
}

/// Hosted checkout returned by the gateway.
#[derive(Debug, Clone, PartialEq)]
pub struct GatewayCheckout {
    pub gateway_order_id: String,
    pub redirect_url: String,
    pub raw: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GatewayRefund {
    pub refund_id: String,
    pub raw: serde_json::Value,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a hosted payment. `amount_minor` is in minor currency units.
    async fn initiate(
        &self,
        merchant_order_id: &str,
        amount_minor: i64,
        redirect_url: &str,
    ) -> Result<GatewayCheckout, GatewayError>;

    /// Verify the authorization header against the raw body and parse it.
    fn validate_callback(
        &self,
        authorization: Option<&str>,
        body: &[u8],
    ) -> Result<GatewayCallback, GatewayError>;

    async fn refund(
        &self,
        gateway_order_id: &str,
        merchant_refund_id: &str,
        amount_minor: i64,
        reason: &str,
    ) -> Result<GatewayRefund, GatewayError>;
}

#[async_trait]
pub trait VendorGateway: Send + Sync {
    /// Current balance in vendor-currency units. Never cached.
    async fn check_balance(&self) -> Result<Decimal, VendorError>;

    async fn purchase(&self, request: &VendorPurchaseRequest) -> Result<VendorReceipt, VendorError>;

    /// Look up an order by our transaction id.
    async fn check_transaction_status(
        &self,
        transaction_id: &str,
    ) -> Result<VendorOrderStatus, VendorError>;
}

/// Operator channel. Delivery failures are logged by the implementation.
#[async_trait]
pub trait OperatorNotifier: Send + Sync {
    async fn notify(&self, alert: OperatorAlert);
}

/// Price-to-vendor-currency rate, read on every balance check.
#[async_trait]
pub trait ExchangeRateProvider: Send + Sync {
    async fn vendor_rate(&self, vendor_id: &str) -> Result<Decimal, AppError>;

    /// Replace the rate for one vendor. Later checks see it immediately.
    async fn set_vendor_rate(&self, vendor_id: &str, rate: Decimal) -> Result<(), AppError>;
}
