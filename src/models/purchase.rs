//! Request and response bodies for the public and admin API.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::transaction::{
    PlayerDetails, SpuDetails, SpuType, SubStatus, Transaction, TransactionStatus,
    UserDetails, VendorErrorEntry,
};
use crate::models::webhook::status_message;

/// Request to start a purchase.
///
/// # Example
///
/// ```json
/// {
///   "spuType": "GAME_ITEM",
///   "spuDetails": { "price": "19.99", "currency": "BRL", "vendorProductId": "22590" },
///   "userDetails": { "userId": "u-100" },
///   "playerDetails": { "playerId": "12345678", "zoneId": "2001" },
///   "redirectUrl": "https://shop.example.com/orders/return"
/// }
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseRequest {
    pub spu_type: SpuType,
    pub spu_details: SpuDetails,
    pub user_details: UserDetails,
    #[serde(default)]
    pub player_details: Option<PlayerDetails>,
    #[serde(default)]
    pub redirect_url: Option<String>,
    /// Defaults to the configured vendor
    #[serde(default)]
    pub vendor_id: Option<String>,
}

/// Response for a started purchase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseResponse {
    pub transaction_id: String,
    pub redirect_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorView {
    pub code: Option<SubStatus>,
    pub message: Option<String>,
}

/// Refund block shown on status reads.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundView {
    pub initiated: bool,
    pub completed: bool,
    pub failed: bool,
    pub initiated_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    pub refund_id: Option<String>,
    pub failure_reason: Option<String>,
}

impl RefundView {
    fn from_transaction(tx: &Transaction) -> Option<Self> {
        if !tx.refund_initiated && !tx.refund_completed && !tx.refund_failed {
            return None;
        }
        Some(Self {
            initiated: tx.refund_initiated,
            completed: tx.refund_completed,
            failed: tx.refund_failed,
            initiated_at: tx.refund_initiated_at,
            completed_at: tx.refund_completed_at,
            failed_at: tx.refund_failed_at,
            reason: tx.refund_reason.clone(),
            refund_id: tx.refund_id.clone(),
            failure_reason: tx.refund_failure_reason.clone(),
        })
    }
}

/// User-facing status of a transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionStatusView {
    pub transaction_id: String,
    pub status: TransactionStatus,
    pub sub_status: SubStatus,
    pub stage: u8,
    pub message: String,
    pub spu_id: String,
    pub spu_type: SpuType,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund: Option<RefundView>,
}

impl From<&Transaction> for TransactionStatusView {
    fn from(tx: &Transaction) -> Self {
        let error = (tx.status == TransactionStatus::Failed).then(|| ErrorView {
            code: tx.failure_cause,
            message: tx
                .failure_reason
                .clone()
                .or_else(|| tx.last_vendor_error.clone()),
        });
        Self {
            transaction_id: tx.transaction_id.clone(),
            status: tx.status,
            sub_status: tx.sub_status,
            stage: tx.stage(),
            message: status_message(tx.sub_status).to_string(),
            spu_id: tx.spu_id.clone(),
            spu_type: tx.spu_type,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
            error,
            refund: RefundView::from_transaction(tx),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentView {
    pub order_id: Option<String>,
    pub amount: Decimal,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationView {
    pub needed: bool,
    pub marked_at: Option<DateTime<Utc>>,
    pub reconciled: bool,
    pub reason: Option<String>,
}

/// Detailed status for operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminTransactionView {
    #[serde(flatten)]
    pub summary: TransactionStatusView,
    pub vendor_id: String,
    pub vendor_retry_count: i32,
    pub last_vendor_error: Option<String>,
    pub last_vendor_error_at: Option<DateTime<Utc>>,
    pub vendor_errors: Vec<VendorErrorEntry>,
    pub payment: PaymentView,
    pub player_details: Option<PlayerDetails>,
    pub user_details: UserDetails,
    pub reconciliation: ReconciliationView,
    /// Nothing further will happen without operator action
    pub terminal: bool,
}

impl From<&Transaction> for AdminTransactionView {
    fn from(tx: &Transaction) -> Self {
        let mut summary = TransactionStatusView::from(tx);
        if summary.refund.is_none() {
            summary.refund = Some(RefundView {
                initiated: false,
                completed: false,
                failed: false,
                initiated_at: None,
                completed_at: None,
                failed_at: None,
                reason: None,
                refund_id: None,
                failure_reason: None,
            });
        }
        Self {
            summary,
            vendor_id: tx.vendor_id.clone(),
            vendor_retry_count: tx.vendor_retry_count,
            last_vendor_error: tx.last_vendor_error.clone(),
            last_vendor_error_at: tx.last_vendor_error_at,
            vendor_errors: tx.vendor_errors.clone(),
            payment: PaymentView {
                order_id: tx.order_id.clone(),
                amount: tx.spu_details.price,
                currency: tx.spu_details.currency.clone(),
            },
            player_details: tx.player_details.clone(),
            user_details: tx.user_details.clone(),
            reconciliation: ReconciliationView {
                needed: tx.reconciliation_needed,
                marked_at: tx.reconciliation_marked_at,
                reconciled: tx.reconciled,
                reason: tx.reconciled_reason.clone(),
            },
            terminal: tx.is_terminal(),
        }
    }
}

/// Optional body for admin reconcile and cancel.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AdminActionRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// Body for `PUT /api/v1/admin/vendors/{vendor_id}/rate`.
#[derive(Debug, Clone, Deserialize)]
pub struct VendorRateRequest {
    pub rate: Decimal,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorRateResponse {
    pub vendor_id: String,
    pub rate: Decimal,
}
