//! HTTP client for the hosted-checkout payment gateway.
//!
//! Outbound requests carry an `Authorization: sha256=<hex>` signature over
//! the JSON body; inbound callbacks are verified the same way against the
//! raw request bytes before anything is parsed.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::adapters::signing::{generate_signature, verify_signature};
use crate::error::GatewayError;
use crate::models::webhook::GatewayCallback;
use crate::ports::{GatewayCheckout, GatewayRefund, PaymentGateway};

const PAY_PATH: &str = "/checkout/v2/pay";
const REFUND_PATH: &str = "/payments/v2/refund";

pub struct HttpPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    secret: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayResponse {
    order_id: String,
    redirect_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefundResponse {
    refund_id: String,
    #[serde(default)]
    state: Option<String>,
}

impl HttpPaymentGateway {
    pub fn new(base_url: &str, secret: &str) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret: secret.to_string(),
        })
    }

    async fn post_signed(&self, path: &str, body: &Value) -> Result<(u16, Value), GatewayError> {
        let payload = body.to_string();
        let signature = generate_signature(&self.secret, payload.as_bytes());

        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("Content-Type", "application/json")
            .header("Authorization", signature)
            .body(payload)
            .send()
            .await?;

        let status = response.status().as_u16();
        let value = response.json::<Value>().await.unwrap_or(Value::Null);
        Ok((status, value))
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn initiate(
        &self,
        merchant_order_id: &str,
        amount_minor: i64,
        redirect_url: &str,
    ) -> Result<GatewayCheckout, GatewayError> {
        let body = json!({
            "merchantOrderId": merchant_order_id,
            "amount": amount_minor,
            "paymentFlow": {
                "type": "PG_CHECKOUT",
                "merchantUrls": { "redirectUrl": redirect_url }
            }
        });

        let (status, raw) = self.post_signed(PAY_PATH, &body).await?;
        if !(200..300).contains(&status) {
            return Err(GatewayError::Initiation(format!(
                "gateway returned HTTP {status}: {raw}"
            )));
        }

        let parsed: PayResponse = serde_json::from_value(raw.clone())
            .map_err(|e| GatewayError::Initiation(format!("unexpected response: {e}")))?;

        Ok(GatewayCheckout {
            gateway_order_id: parsed.order_id,
            redirect_url: parsed.redirect_url,
            raw,
        })
    }

    fn validate_callback(
        &self,
        authorization: Option<&str>,
        body: &[u8],
    ) -> Result<GatewayCallback, GatewayError> {
        let signature = authorization.ok_or(GatewayError::InvalidSignature)?;
        if !verify_signature(&self.secret, body, signature) {
            return Err(GatewayError::InvalidSignature);
        }
        serde_json::from_slice(body).map_err(|e| GatewayError::MalformedCallback(e.to_string()))
    }

    async fn refund(
        &self,
        gateway_order_id: &str,
        merchant_refund_id: &str,
        amount_minor: i64,
        reason: &str,
    ) -> Result<GatewayRefund, GatewayError> {
        let body = json!({
            "merchantRefundId": merchant_refund_id,
            "originalOrderId": gateway_order_id,
            "amount": amount_minor,
            "reason": reason,
        });

        let (status, raw) = self.post_signed(REFUND_PATH, &body).await?;
        if !(200..300).contains(&status) {
            return Err(GatewayError::Refund(format!(
                "gateway returned HTTP {status}: {raw}"
            )));
        }

        let parsed: RefundResponse = serde_json::from_value(raw.clone())
            .map_err(|e| GatewayError::Refund(format!("unexpected response: {e}")))?;
        if parsed.state.as_deref() == Some("FAILED") {
            return Err(GatewayError::Refund(format!(
                "refund {} rejected by gateway",
                parsed.refund_id
            )));
        }

        Ok(GatewayRefund {
            refund_id: parsed.refund_id,
            raw,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gateway() -> HttpPaymentGateway {
        HttpPaymentGateway::new("http://localhost:9999/", "callback-secret").unwrap()
    }

    #[test]
    fn test_validate_callback_accepts_signed_body() {
        let body = br#"{"event":"checkout.order.completed","payload":{"merchantOrderId":"s-t","orderId":"o1","state":"COMPLETED"}}"#;
        let signature = generate_signature("callback-secret", body);

        let callback = gateway().validate_callback(Some(&signature), body).unwrap();
        assert!(callback.is_payment_completed());
    }

    #[test]
    fn test_validate_callback_rejects_missing_or_wrong_signature() {
        let body = br#"{"payload":{"state":"COMPLETED"}}"#;
        assert!(matches!(
            gateway().validate_callback(None, body),
            Err(GatewayError::InvalidSignature)
        ));

        let forged = generate_signature("not-the-secret", body);
        assert!(matches!(
            gateway().validate_callback(Some(&forged), body),
            Err(GatewayError::InvalidSignature)
        ));
    }

    #[test]
    fn test_signed_garbage_is_malformed() {
        let body = b"not json";
        let signature = generate_signature("callback-secret", body);
        assert!(matches!(
            gateway().validate_callback(Some(&signature), body),
            Err(GatewayError::MalformedCallback(_))
        ));
    }
}
