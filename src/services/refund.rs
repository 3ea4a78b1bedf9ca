//! Refunds through the payment gateway.
//!
//! A refund is started at most once per transaction. It can be retried
//! after it failed, and once it completed every later attempt is a no-op.
//! The refund flags are always written; the sub-status follows only where
//! the state machine allows it.

use serde::Serialize;
use serde_json::Value;

use crate::error::AppError;
use crate::models::transaction::{SubStatus, Transaction, TransactionUpdate};
use crate::models::webhook::{AlertKind, OperatorAlert, REFUND_COMPLETED, REFUND_FAILED};
use crate::services::orchestrator::TransactionOrchestrator;

/// Result of asking for a refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum RefundOutcome {
    AlreadyRefunded,
    /// A refund is already in flight at the gateway
    Pending,
    Completed { refund_id: String },
}

/// What a refund webhook did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundWebhookOutcome {
    Completed,
    Failed,
    AlreadyCompleted,
    Ignored,
}

/// Merchant-side refund id sent to the gateway.
pub fn merchant_refund_id(transaction_id: &str) -> String {
    format!("RF-{transaction_id}")
}

impl TransactionOrchestrator {
    /// Refund the full captured amount.
    ///
    /// # Process
    ///
    /// 1. Stop if the refund already completed or is in flight
    /// 2. Mark `refundInitiated` (sub-status `REFUND_INITIATED` if allowed)
    /// 3. Call the gateway with the captured order id
    /// 4. Record `REFUND_COMPLETED`, or `REFUND_FAILED` plus an operator alert
    ///
    /// # Errors
    ///
    /// - `RefundFailed`: no gateway order id, or the gateway refused
    /// - `TransactionNotFound`, store errors
    pub async fn initiate_refund(
        &self,
        transaction_id: &str,
        reason: &str,
    ) -> Result<RefundOutcome, AppError> {
        let tx = self.load(transaction_id).await?;
        if tx.refund_completed {
            tracing::info!("Transaction {} already refunded", tx.transaction_id);
            return Ok(RefundOutcome::AlreadyRefunded);
        }
        if tx.refund_initiated && !tx.refund_failed {
            tracing::info!("Refund for transaction {} already in progress", tx.transaction_id);
            return Ok(RefundOutcome::Pending);
        }

        let update = TransactionUpdate {
            refund_initiated: Some(true),
            refund_failed: Some(false),
            refund_reason: Some(reason.to_string()),
            ..step(&tx, SubStatus::RefundInitiated)
        };
        let tx = self.write(transaction_id, &update).await?;
        self.publish(&tx);
        tracing::info!("Refund initiated for transaction {}: {}", tx.transaction_id, reason);

        let Some(order_id) = gateway_order_id(&tx) else {
            let failure = "No gateway order id to refund against".to_string();
            self.mark_refund_failed(transaction_id, &failure).await?;
            return Err(AppError::RefundFailed {
                transaction_id: transaction_id.to_string(),
                reason: failure,
            });
        };

        let amount_minor = tx.spu_details.amount_minor()?;
        match self
            .payment_gateway
            .refund(&order_id, &merchant_refund_id(transaction_id), amount_minor, reason)
            .await
        {
            Ok(refund) => {
                self.mark_refund_completed(transaction_id, Some(refund.refund_id.clone()))
                    .await?;
                Ok(RefundOutcome::Completed {
                    refund_id: refund.refund_id,
                })
            }
            Err(e) => {
                let failure = e.to_string();
                self.mark_refund_failed(transaction_id, &failure).await?;
                Err(AppError::RefundFailed {
                    transaction_id: transaction_id.to_string(),
                    reason: failure,
                })
            }
        }
    }

    async fn mark_refund_completed(
        &self,
        transaction_id: &str,
        refund_id: Option<String>,
    ) -> Result<Transaction, AppError> {
        let tx = self.load(transaction_id).await?;
        let update = TransactionUpdate {
            refund_initiated: Some(true),
            refund_completed: Some(true),
            refund_failed: Some(false),
            refund_id,
            ..step(&tx, SubStatus::RefundCompleted)
        };
        let tx = self.write(transaction_id, &update).await?;
        self.publish(&tx);
        tracing::info!("Refund completed for transaction {}", tx.transaction_id);
        Ok(tx)
    }

    async fn mark_refund_failed(&self, transaction_id: &str, reason: &str) -> Result<(), AppError> {
        let tx = self.load(transaction_id).await?;
        if tx.refund_completed {
            return Ok(());
        }
        let update = TransactionUpdate {
            refund_failed: Some(true),
            refund_failure_reason: Some(reason.to_string()),
            ..step(&tx, SubStatus::RefundFailed)
        };
        let tx = self.write(transaction_id, &update).await?;
        self.publish(&tx);
        tracing::error!("Refund failed for transaction {}: {}", tx.transaction_id, reason);

        self.notifier
            .notify(OperatorAlert::new(
                AlertKind::RefundFailed,
                &tx,
                format!("Refund failed for transaction {}: {}", tx.transaction_id, reason),
            ))
            .await;
        Ok(())
    }

    /// Apply a verified refund callback from the gateway.
    ///
    /// # Errors
    ///
    /// - `InvalidSignature`: callback not signed by the gateway
    /// - `Gateway(MalformedCallback)`: no usable merchant order id
    /// - `TransactionNotFound`: the id in the callback is unknown
    pub async fn handle_refund_webhook(
        &self,
        authorization: Option<&str>,
        body: &[u8],
    ) -> Result<(String, RefundWebhookOutcome), AppError> {
        let callback = self.verify_callback(authorization, body)?;
        let order = callback.merchant_order_id()?;
        let tx = self.load(&order.transaction_id).await?;

        if tx.refund_completed {
            tracing::info!(
                "Refund for transaction {} already completed, ignoring webhook",
                tx.transaction_id
            );
            return Ok((tx.transaction_id, RefundWebhookOutcome::AlreadyCompleted));
        }

        let outcome = match callback.payload.state.as_str() {
            REFUND_COMPLETED => {
                let refund_id = callback
                    .payload
                    .refund_id
                    .clone()
                    .or_else(|| tx.refund_id.clone());
                self.mark_refund_completed(&tx.transaction_id, refund_id).await?;
                RefundWebhookOutcome::Completed
            }
            REFUND_FAILED => {
                let reason = callback
                    .payload
                    .error_code
                    .clone()
                    .unwrap_or_else(|| "Refund failed at gateway".to_string());
                self.mark_refund_failed(&tx.transaction_id, &reason).await?;
                RefundWebhookOutcome::Failed
            }
            other => {
                tracing::info!(
                    "Refund webhook for transaction {} in state {}, nothing to do",
                    tx.transaction_id,
                    other
                );
                RefundWebhookOutcome::Ignored
            }
        };
        Ok((tx.transaction_id, outcome))
    }
}

/// An update moving to `next` when the state machine allows it, else empty.
fn step(tx: &Transaction, next: SubStatus) -> TransactionUpdate {
    if tx.sub_status.can_transition_to(next) {
        TransactionUpdate::to(next)
    } else {
        TransactionUpdate::default()
    }
}

/// Gateway order id captured at checkout or on the payment callback.
fn gateway_order_id(tx: &Transaction) -> Option<String> {
    tx.order_id.clone().or_else(|| {
        tx.payment_response
            .as_ref()
            .and_then(|raw| raw.pointer("/payload/orderId"))
            .and_then(Value::as_str)
            .map(str::to_string)
    })
}
