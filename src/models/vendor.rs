//! Vendor request and response types.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A fulfillment order for one player.
///
/// `transaction_id` doubles as the vendor-side idempotency key, which is
/// what makes the reconciliation-first check possible.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorPurchaseRequest {
    pub player_id: String,
    pub zone_id: Option<String>,
    pub product_id: Option<String>,
    /// Amount in vendor-currency units
    pub amount: Decimal,
    pub transaction_id: String,
    pub metadata: Value,
    pub retry_count: i32,
}

/// Successful vendor order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorReceipt {
    pub vendor_transaction_id: Option<String>,
    #[serde(default)]
    pub response: Value,
}

/// What the vendor knows about an order placed under our transaction id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorOrderStatus {
    pub exists: bool,
    pub success: bool,
    pub vendor_order_id: Option<String>,
}

impl VendorOrderStatus {
    pub fn not_found() -> Self {
        Self {
            exists: false,
            success: false,
            vendor_order_id: None,
        }
    }

    pub fn confirmed_success(&self) -> bool {
        self.exists && self.success
    }

    pub fn confirmed_failure(&self) -> bool {
        self.exists && !self.success
    }
}
