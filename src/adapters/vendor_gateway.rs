//! HTTP client for the game-currency vendor.
//!
//! Every call is a form of signed key/value pairs: the account uid, a unix
//! timestamp, the call's own fields and a `sign` computed over the sorted
//! pairs. Failures are classified into `VendorErrorCategory` here, so the
//! fulfillment worker only ever sees categorized errors.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;

use crate::adapters::signing::generate_signature;
use crate::error::{VendorError, VendorErrorCategory};
use crate::models::vendor::{VendorOrderStatus, VendorPurchaseRequest, VendorReceipt};
use crate::ports::VendorGateway;

const QUERY_POINTS_PATH: &str = "/api/querypoints";
const CREATE_ORDER_PATH: &str = "/api/createorder";
const CHECK_ORDER_PATH: &str = "/api/checkorder";

pub struct HttpVendorGateway {
    client: reqwest::Client,
    base_url: String,
    uid: String,
    api_key: String,
}

/// Envelope every vendor response shares.
#[derive(Debug, Deserialize)]
struct VendorEnvelope {
    status: u16,
    #[serde(default)]
    message: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, Value>,
}

impl VendorEnvelope {
    fn ensure_success(&self) -> Result<(), VendorError> {
        let message = self.message.as_deref().unwrap_or("");
        if self.status == 200 && (message.is_empty() || message.eq_ignore_ascii_case("success")) {
            return Ok(());
        }
        if message.is_empty() {
            return Err(VendorError::new(
                VendorErrorCategory::from_status(self.status),
                format!("vendor status {}", self.status),
            ));
        }
        Err(VendorError::classify(message))
    }
}

impl HttpVendorGateway {
    pub fn new(base_url: &str, uid: &str, api_key: &str) -> Result<Self, VendorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            uid: uid.to_string(),
            api_key: api_key.to_string(),
        })
    }

    fn sign(&self, fields: &BTreeMap<String, String>) -> String {
        let canonical = fields
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("&");
        generate_signature(&self.api_key, canonical.as_bytes())
    }

    async fn call(
        &self,
        path: &str,
        fields: BTreeMap<String, String>,
    ) -> Result<VendorEnvelope, VendorError> {
        let mut fields = fields;
        fields.insert("uid".to_string(), self.uid.clone());
        fields.insert("time".to_string(), chrono::Utc::now().timestamp().to_string());
        let sign = self.sign(&fields);
        fields.insert("sign".to_string(), sign);

        tracing::debug!("Vendor request {}", path);
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .form(&fields)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(VendorError::new(
                VendorErrorCategory::from_status(status.as_u16()),
                format!("vendor returned HTTP {}: {}", status.as_u16(), body),
            ));
        }

        let envelope = response.json::<VendorEnvelope>().await?;
        tracing::debug!("Vendor response {} status {}", path, envelope.status);
        Ok(envelope)
    }
}

fn value_as_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl VendorGateway for HttpVendorGateway {
    async fn check_balance(&self) -> Result<Decimal, VendorError> {
        let envelope = self.call(QUERY_POINTS_PATH, BTreeMap::new()).await?;
        envelope.ensure_success()?;

        let raw = value_as_string(envelope.rest.get("smile_points")).unwrap_or_else(|| "0".to_string());
        Decimal::from_str(&raw).map_err(|e| {
            VendorError::new(
                VendorErrorCategory::Server,
                format!("unreadable balance {raw}: {e}"),
            )
        })
    }

    async fn purchase(&self, request: &VendorPurchaseRequest) -> Result<VendorReceipt, VendorError> {
        let product_id = request.product_id.clone().ok_or_else(|| {
            VendorError::new(VendorErrorCategory::Validation, "missing vendor product id")
        })?;

        let mut fields = BTreeMap::new();
        fields.insert("productid".to_string(), product_id);
        fields.insert("userid".to_string(), request.player_id.clone());
        fields.insert(
            "zoneid".to_string(),
            request.zone_id.clone().unwrap_or_default(),
        );
        fields.insert("cp_orderid".to_string(), request.transaction_id.clone());
        if let Some(product) = request.metadata.get("product").and_then(Value::as_str) {
            fields.insert("product".to_string(), product.to_string());
        }

        tracing::info!(
            "Placing vendor order for transaction {}, attempt #{}",
            request.transaction_id,
            request.retry_count + 1
        );
        let envelope = self.call(CREATE_ORDER_PATH, fields).await?;
        envelope.ensure_success()?;

        Ok(VendorReceipt {
            vendor_transaction_id: value_as_string(envelope.rest.get("order_id")),
            response: Value::Object(envelope.rest),
        })
    }

    async fn check_transaction_status(
        &self,
        transaction_id: &str,
    ) -> Result<VendorOrderStatus, VendorError> {
        let mut fields = BTreeMap::new();
        fields.insert("cp_orderid".to_string(), transaction_id.to_string());

        let envelope = self.call(CHECK_ORDER_PATH, fields).await?;
        let Some(order) = envelope.rest.get("data").filter(|d| d.is_object()) else {
            return Ok(VendorOrderStatus::not_found());
        };

        Ok(VendorOrderStatus {
            exists: true,
            success: order.get("status").and_then(Value::as_str) == Some("success"),
            vendor_order_id: value_as_string(order.get("order_id")),
        })
    }
}
