//! Transaction aggregate and its status machine.
//!
//! This module defines:
//! - `Transaction`: the purchase record, keyed by our own transaction id
//! - `TransactionStatus` / `SubStatus`: coarse and fine-grained lifecycle state
//! - `TransactionUpdate`: a targeted partial update applied by the store

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{AppError, VendorErrorCategory};

/// Coarse lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Success,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Processing => "PROCESSING",
            TransactionStatus::Success => "SUCCESS",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TransactionStatus::Pending),
            "PROCESSING" => Ok(TransactionStatus::Processing),
            "SUCCESS" => Ok(TransactionStatus::Success),
            "FAILED" => Ok(TransactionStatus::Failed),
            other => Err(AppError::Internal(format!("unknown status: {other}"))),
        }
    }
}

/// Fine-grained lifecycle state.
///
/// Every sub-status belongs to exactly one coarse status, so the pair
/// stored on a transaction can never disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubStatus {
    OrderInitiated,
    GatewayInitiated,
    PaymentInProgress,
    PaymentSuccess,
    VendorQueued,
    VendorProcessing,
    OrderPlaced,
    GatewayFailed,
    PaymentFailed,
    VendorFailed,
    BalanceError,
    AdminCancelled,
    RefundInitiated,
    RefundCompleted,
    RefundFailed,
}

impl SubStatus {
    pub const ALL: [SubStatus; 15] = [
        SubStatus::OrderInitiated,
        SubStatus::GatewayInitiated,
        SubStatus::PaymentInProgress,
        SubStatus::PaymentSuccess,
        SubStatus::VendorQueued,
        SubStatus::VendorProcessing,
        SubStatus::OrderPlaced,
        SubStatus::GatewayFailed,
        SubStatus::PaymentFailed,
        SubStatus::VendorFailed,
        SubStatus::BalanceError,
        SubStatus::AdminCancelled,
        SubStatus::RefundInitiated,
        SubStatus::RefundCompleted,
        SubStatus::RefundFailed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SubStatus::OrderInitiated => "ORDER_INITIATED",
            SubStatus::GatewayInitiated => "GATEWAY_INITIATED",
            SubStatus::PaymentInProgress => "PAYMENT_IN_PROGRESS",
            SubStatus::PaymentSuccess => "PAYMENT_SUCCESS",
            SubStatus::VendorQueued => "VENDOR_QUEUED",
            SubStatus::VendorProcessing => "VENDOR_PROCESSING",
            SubStatus::OrderPlaced => "ORDER_PLACED",
            SubStatus::GatewayFailed => "GATEWAY_FAILED",
            SubStatus::PaymentFailed => "PAYMENT_FAILED",
            SubStatus::VendorFailed => "VENDOR_FAILED",
            SubStatus::BalanceError => "BALANCE_ERROR",
            SubStatus::AdminCancelled => "ADMIN_CANCELLED",
            SubStatus::RefundInitiated => "REFUND_INITIATED",
            SubStatus::RefundCompleted => "REFUND_COMPLETED",
            SubStatus::RefundFailed => "REFUND_FAILED",
        }
    }

    /// The coarse status this sub-status belongs to.
    pub fn status(self) -> TransactionStatus {
        match self {
            SubStatus::OrderInitiated | SubStatus::GatewayInitiated | SubStatus::PaymentInProgress => {
                TransactionStatus::Pending
            }
            SubStatus::PaymentSuccess | SubStatus::VendorQueued | SubStatus::VendorProcessing => {
                TransactionStatus::Processing
            }
            SubStatus::OrderPlaced => TransactionStatus::Success,
            SubStatus::GatewayFailed
            | SubStatus::PaymentFailed
            | SubStatus::VendorFailed
            | SubStatus::BalanceError
            | SubStatus::AdminCancelled
            | SubStatus::RefundInitiated
            | SubStatus::RefundCompleted
            | SubStatus::RefundFailed => TransactionStatus::Failed,
        }
    }

    /// Whether the status machine allows moving from `self` to `next`.
    ///
    /// Admin overrides (cancel, reconcile) bypass this table.
    pub fn can_transition_to(self, next: SubStatus) -> bool {
        use SubStatus::*;
        matches!(
            (self, next),
            (
                OrderInitiated,
                GatewayInitiated | GatewayFailed | PaymentSuccess | PaymentFailed
            ) | (GatewayInitiated, PaymentInProgress | PaymentSuccess | PaymentFailed)
                | (PaymentInProgress, PaymentSuccess | PaymentFailed)
                | (
                    PaymentSuccess,
                    VendorQueued | VendorProcessing | OrderPlaced | VendorFailed
                )
                | (
                    VendorQueued,
                    VendorProcessing | OrderPlaced | VendorFailed | BalanceError
                )
                | (
                    VendorProcessing,
                    VendorProcessing | VendorQueued | OrderPlaced | VendorFailed | BalanceError
                )
                | (
                    VendorFailed | BalanceError | AdminCancelled,
                    RefundInitiated | RefundCompleted | RefundFailed
                )
                | (RefundInitiated, RefundCompleted | RefundFailed)
                | (RefundFailed, RefundInitiated | RefundCompleted)
        )
    }

    /// Sub-statuses that explain why a transaction failed.
    pub fn is_failure_cause(self) -> bool {
        matches!(
            self,
            SubStatus::GatewayFailed
                | SubStatus::PaymentFailed
                | SubStatus::VendorFailed
                | SubStatus::BalanceError
                | SubStatus::AdminCancelled
        )
    }
}

impl fmt::Display for SubStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SubStatus::ALL
            .iter()
            .copied()
            .find(|sub| sub.as_str() == s)
            .ok_or_else(|| AppError::Internal(format!("unknown sub-status: {s}")))
    }
}

/// Kind of sellable product unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpuType {
    Merchandise,
    GameItem,
}

impl SpuType {
    pub fn as_str(self) -> &'static str {
        match self {
            SpuType::Merchandise => "MERCHANDISE",
            SpuType::GameItem => "GAME_ITEM",
        }
    }
}

impl FromStr for SpuType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MERCHANDISE" => Ok(SpuType::Merchandise),
            "GAME_ITEM" => Ok(SpuType::GameItem),
            other => Err(AppError::InvalidRequest(format!(
                "Unsupported SPU type: {other}"
            ))),
        }
    }
}

/// Price and product metadata, frozen at purchase time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpuDetails {
    pub price: Decimal,
    pub currency: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Product identifier on the vendor side (game items only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor_product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl SpuDetails {
    /// Price in minor currency units (cents, paisa), as the gateway expects.
    pub fn amount_minor(&self) -> Result<i64, AppError> {
        (self.price * Decimal::ONE_HUNDRED)
            .round()
            .to_i64()
            .ok_or_else(|| AppError::InvalidRequest("Price out of range".to_string()))
    }
}

/// Buyer identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDetails {
    pub user_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

/// Game account that receives a game item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerDetails {
    pub player_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub game_name: Option<String>,
}

/// One failed fulfillment attempt, appended to the audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorErrorEntry {
    pub timestamp: DateTime<Utc>,
    pub error: String,
    pub category: VendorErrorCategory,
    pub retry_count: i32,
}

/// The purchase record.
///
/// # Invariants
///
/// - `transaction_id` is generated here and never changes
/// - `status` always equals `sub_status.status()`
/// - `refund_completed` implies `refund_initiated`
/// - `refund_completed` and `refund_failed` are never both set
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub transaction_id: String,
    pub spu_id: String,
    pub spu_type: SpuType,
    pub spu_details: SpuDetails,
    pub user_details: UserDetails,
    pub player_details: Option<PlayerDetails>,

    pub status: TransactionStatus,
    pub sub_status: SubStatus,
    /// Sub-status that moved the transaction to FAILED, kept while the
    /// refund sub-states progress.
    pub failure_cause: Option<SubStatus>,
    pub failure_reason: Option<String>,

    pub vendor_id: String,
    pub vendor_retry_count: i32,
    pub last_vendor_error: Option<String>,
    pub last_vendor_error_at: Option<DateTime<Utc>>,
    pub vendor_errors: Vec<VendorErrorEntry>,
    pub vendor_response: Option<Value>,

    pub gateway_response: Option<Value>,
    pub payment_response: Option<Value>,
    /// Gateway-side order identifier
    pub order_id: Option<String>,

    pub refund_initiated: bool,
    pub refund_initiated_at: Option<DateTime<Utc>>,
    pub refund_completed: bool,
    pub refund_completed_at: Option<DateTime<Utc>>,
    pub refund_failed: bool,
    pub refund_failed_at: Option<DateTime<Utc>>,
    pub refund_reason: Option<String>,
    pub refund_id: Option<String>,
    pub refund_failure_reason: Option<String>,

    pub reconciliation_needed: bool,
    pub reconciliation_marked_at: Option<DateTime<Utc>>,
    pub reconciled: bool,
    pub reconciled_reason: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a new transaction in `PENDING/ORDER_INITIATED`.
    pub fn new(
        spu_id: String,
        spu_type: SpuType,
        spu_details: SpuDetails,
        user_details: UserDetails,
        player_details: Option<PlayerDetails>,
        vendor_id: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            transaction_id: Uuid::new_v4().to_string(),
            spu_id,
            spu_type,
            spu_details,
            user_details,
            player_details,
            status: TransactionStatus::Pending,
            sub_status: SubStatus::OrderInitiated,
            failure_cause: None,
            failure_reason: None,
            vendor_id,
            vendor_retry_count: 0,
            last_vendor_error: None,
            last_vendor_error_at: None,
            vendor_errors: Vec::new(),
            vendor_response: None,
            gateway_response: None,
            payment_response: None,
            order_id: None,
            refund_initiated: false,
            refund_initiated_at: None,
            refund_completed: false,
            refund_completed_at: None,
            refund_failed: false,
            refund_failed_at: None,
            refund_reason: None,
            refund_id: None,
            refund_failure_reason: None,
            reconciliation_needed: false,
            reconciliation_marked_at: None,
            reconciled: false,
            reconciled_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Merchant order identifier sent to the gateway: `<spuId>-<transactionId>`.
    pub fn merchant_order_id(&self) -> String {
        format!("{}-{}", self.spu_id, self.transaction_id)
    }

    /// SUCCESS, a refunded failure, or a failure that never captured money.
    pub fn is_terminal(&self) -> bool {
        self.status == TransactionStatus::Success
            || self.refund_completed
            || matches!(
                self.sub_status,
                SubStatus::GatewayFailed | SubStatus::PaymentFailed
            )
    }

    /// Progress indicator for status pages (1 to 4).
    ///
    /// Failed transactions report the stage they failed at.
    pub fn stage(&self) -> u8 {
        match self.status {
            TransactionStatus::Pending => match self.sub_status {
                SubStatus::OrderInitiated => 1,
                _ => 2,
            },
            TransactionStatus::Processing => 3,
            TransactionStatus::Success => 4,
            TransactionStatus::Failed => match self.failure_cause {
                Some(SubStatus::GatewayFailed) | None => 1,
                Some(SubStatus::PaymentFailed) => 2,
                Some(_) => 3,
            },
        }
    }

    /// Apply a partial update in place, the way the store does it.
    pub fn apply(&mut self, update: &TransactionUpdate, now: DateTime<Utc>) {
        if let Some(sub_status) = update.sub_status {
            self.status = sub_status.status();
            self.sub_status = sub_status;
            if sub_status.is_failure_cause() {
                self.failure_cause = Some(sub_status);
            }
        }
        if let Some(reason) = &update.failure_reason {
            self.failure_reason = Some(reason.clone());
        }
        if let Some(order_id) = &update.order_id {
            self.order_id = Some(order_id.clone());
        }
        if let Some(value) = &update.gateway_response {
            self.gateway_response = Some(value.clone());
        }
        if let Some(value) = &update.payment_response {
            self.payment_response = Some(value.clone());
        }
        if let Some(value) = &update.vendor_response {
            self.vendor_response = Some(value.clone());
        }
        if let Some(count) = update.vendor_retry_count {
            self.vendor_retry_count = count;
        }
        if let Some(error) = &update.last_vendor_error {
            self.last_vendor_error = Some(error.clone());
            self.last_vendor_error_at = Some(now);
        }
        if let Some(entry) = &update.push_vendor_error {
            self.vendor_errors.push(entry.clone());
        }
        if let Some(initiated) = update.refund_initiated {
            self.refund_initiated = initiated;
            if initiated {
                self.refund_initiated_at = Some(now);
            }
        }
        if let Some(completed) = update.refund_completed {
            self.refund_completed = completed;
            if completed {
                self.refund_completed_at = Some(now);
            }
        }
        if let Some(failed) = update.refund_failed {
            self.refund_failed = failed;
            if failed {
                self.refund_failed_at = Some(now);
            }
        }
        if let Some(reason) = &update.refund_reason {
            self.refund_reason = Some(reason.clone());
        }
        if let Some(refund_id) = &update.refund_id {
            self.refund_id = Some(refund_id.clone());
        }
        if let Some(reason) = &update.refund_failure_reason {
            self.refund_failure_reason = Some(reason.clone());
        }
        if let Some(needed) = update.reconciliation_needed {
            self.reconciliation_needed = needed;
            self.reconciliation_marked_at = needed.then_some(now);
        }
        if let Some(reason) = &update.reconciled_reason {
            self.reconciled = true;
            self.reconciled_reason = Some(reason.clone());
        }
        self.updated_at = now;
    }
}

/// A targeted partial update.
///
/// Only the fields that are `Some` are written. `push_vendor_error` appends
/// to the audit log instead of replacing it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionUpdate {
    /// Also sets `status` (and `failure_cause` for failure sub-statuses)
    pub sub_status: Option<SubStatus>,
    pub failure_reason: Option<String>,
    pub order_id: Option<String>,
    pub gateway_response: Option<Value>,
    pub payment_response: Option<Value>,
    pub vendor_response: Option<Value>,
    pub vendor_retry_count: Option<i32>,
    pub last_vendor_error: Option<String>,
    pub push_vendor_error: Option<VendorErrorEntry>,
    pub refund_initiated: Option<bool>,
    pub refund_completed: Option<bool>,
    pub refund_failed: Option<bool>,
    pub refund_reason: Option<String>,
    pub refund_id: Option<String>,
    pub refund_failure_reason: Option<String>,
    pub reconciliation_needed: Option<bool>,
    /// Marks the transaction reconciled with this reason
    pub reconciled_reason: Option<String>,
}

impl TransactionUpdate {
    pub fn to(sub_status: SubStatus) -> Self {
        Self {
            sub_status: Some(sub_status),
            ..Self::default()
        }
    }

    pub fn failure_reason(mut self, reason: impl Into<String>) -> Self {
        self.failure_reason = Some(reason.into());
        self
    }

    pub fn reconciled(mut self, reason: impl Into<String>) -> Self {
        self.reconciled_reason = Some(reason.into());
        self
    }

    pub fn clear_reconciliation(mut self) -> Self {
        self.reconciliation_needed = Some(false);
        self
    }
}
