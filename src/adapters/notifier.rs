//! Operator channel.
//!
//! Every alert is logged. When an operator webhook is configured the alert
//! is also POSTed there, signed with HMAC-SHA256.
//!
//! # Headers Sent
//!
//! - `Content-Type: application/json`
//! - `X-Webhook-Signature: sha256=<hex>`
//! - `X-Webhook-Event-Id: <uuid>`

use std::time::Duration;

use async_trait::async_trait;

use crate::adapters::signing::generate_signature;
use crate::models::webhook::OperatorAlert;
use crate::ports::OperatorNotifier;

struct OperatorWebhook {
    client: reqwest::Client,
    url: String,
    secret: String,
}

pub struct OperatorChannel {
    webhook: Option<OperatorWebhook>,
}

impl OperatorChannel {
    /// Log-only channel.
    pub fn log_only() -> Self {
        Self { webhook: None }
    }

    pub fn with_webhook(url: &str, secret: &str) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            webhook: Some(OperatorWebhook {
                client,
                url: url.to_string(),
                secret: secret.to_string(),
            }),
        })
    }

    async fn deliver(webhook: &OperatorWebhook, alert: &OperatorAlert) -> Result<u16, String> {
        let payload = serde_json::to_string(alert).map_err(|e| e.to_string())?;
        let signature = generate_signature(&webhook.secret, payload.as_bytes());

        let response = webhook
            .client
            .post(&webhook.url)
            .header("Content-Type", "application/json")
            .header("X-Webhook-Signature", signature)
            .header("X-Webhook-Event-Id", alert.event_id.to_string())
            .body(payload)
            .send()
            .await
            .map_err(|e| format!("Request failed: {e}"))?;

        Ok(response.status().as_u16())
    }
}

#[async_trait]
impl OperatorNotifier for OperatorChannel {
    async fn notify(&self, alert: OperatorAlert) {
        tracing::warn!(
            transaction_id = %alert.transaction_id,
            kind = alert.event_type.as_str(),
            "Operator alert: {}",
            alert.message
        );

        let Some(webhook) = &self.webhook else {
            return;
        };
        match Self::deliver(webhook, &alert).await {
            Ok(status) if (200..300).contains(&status) => {}
            Ok(status) => tracing::warn!(
                "Operator webhook {} answered HTTP {} for alert {}",
                webhook.url,
                status,
                alert.event_id
            ),
            Err(e) => tracing::warn!("Failed to send operator alert to {}: {}", webhook.url, e),
        }
    }
}
