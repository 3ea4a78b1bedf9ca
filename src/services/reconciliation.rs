//! Stuck-transaction detection and operator actions.
//!
//! Detection is lazy: every status read runs `sweep`, which flags a
//! transaction that has sat in PROCESSING longer than the threshold and
//! alerts the operator once. Resolution is manual through
//! `admin_reconcile` and `admin_cancel`.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;

use crate::error::AppError;
use crate::models::transaction::{
    SpuType, SubStatus, Transaction, TransactionStatus, TransactionUpdate,
};
use crate::models::webhook::{AlertKind, OperatorAlert};
use crate::services::queue::EnqueueOutcome;
use crate::services::refund::RefundOutcome;
use crate::services::orchestrator::TransactionOrchestrator;

/// What an admin reconcile did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    MarkedCompleted,
    MarkedFailed,
    Requeued,
    /// The vendor could not be asked; nothing changed
    VendorCheckFailed { error: String },
    NoActionNeeded,
}

/// What an admin cancel did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelOutcome {
    pub transaction_id: String,
    pub refund: Option<RefundOutcome>,
    /// Set when the refund could not be started
    pub refund_error: Option<String>,
}

impl TransactionOrchestrator {
    /// Flag `tx` for reconciliation if it has been PROCESSING too long.
    ///
    /// Never fails the read: a store error is logged and the transaction
    /// is returned as loaded.
    pub async fn sweep(&self, tx: Transaction) -> Transaction {
        if tx.status != TransactionStatus::Processing || tx.reconciliation_needed {
            return tx;
        }
        let stuck_for = (Utc::now() - tx.updated_at).to_std().unwrap_or_default();
        if stuck_for <= self.settings.reconciliation_threshold {
            return tx;
        }

        let update = TransactionUpdate {
            reconciliation_needed: Some(true),
            ..TransactionUpdate::default()
        };
        let flagged = match self.store.update_partial(&tx.transaction_id, &update).await {
            Ok(Some(flagged)) => flagged,
            Ok(None) => return tx,
            Err(e) => {
                tracing::error!(
                    "Failed to flag transaction {} for reconciliation: {}",
                    tx.transaction_id,
                    e
                );
                return tx;
            }
        };

        tracing::warn!(
            "Transaction {} stuck in {} for {}s, flagged for reconciliation",
            flagged.transaction_id,
            flagged.sub_status,
            stuck_for.as_secs()
        );
        self.notifier
            .notify(OperatorAlert::new(
                AlertKind::ReconciliationNeeded,
                &flagged,
                format!(
                    "Transaction {} is stuck and needs reconciliation",
                    flagged.transaction_id
                ),
            ))
            .await;
        flagged
    }

    /// Resolve a transaction by asking the vendor what actually happened.
    ///
    /// # Process
    ///
    /// - Merchandise still in PROCESSING: mark placed
    /// - Vendor has a successful order: mark placed and reconciled
    /// - Vendor has a failed order: mark failed and refund
    /// - Vendor has no order and we are still PROCESSING: queue again
    ///
    /// A failed vendor lookup is reported in the outcome, not as an error.
    ///
    /// # Errors
    ///
    /// - `TransactionNotFound`, store and queue errors
    pub async fn admin_reconcile(
        &self,
        transaction_id: &str,
        reason: Option<&str>,
    ) -> Result<ReconcileOutcome, AppError> {
        let tx = self.load(transaction_id).await?;
        let reason = reason.unwrap_or("Manual reconciliation");
        tracing::info!("Admin reconcile of transaction {}: {}", tx.transaction_id, reason);

        if tx.spu_type == SpuType::Merchandise {
            if tx.status != TransactionStatus::Processing {
                return Ok(ReconcileOutcome::NoActionNeeded);
            }
            let tx = self
                .force(
                    transaction_id,
                    TransactionUpdate::to(SubStatus::OrderPlaced)
                        .reconciled(reason)
                        .clear_reconciliation(),
                )
                .await?;
            self.notify(AlertKind::ReconciliationCompleted, &tx, "marked as placed")
                .await;
            return Ok(ReconcileOutcome::MarkedCompleted);
        }

        let vendor = self.vendors.get(&tx.vendor_id)?;
        let existing = match vendor.check_transaction_status(&tx.transaction_id).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::error!(
                    "Vendor check failed while reconciling transaction {}: {}",
                    tx.transaction_id,
                    e
                );
                self.notify(
                    AlertKind::ReconciliationError,
                    &tx,
                    &format!("vendor check failed: {e}"),
                )
                .await;
                return Ok(ReconcileOutcome::VendorCheckFailed {
                    error: e.to_string(),
                });
            }
        };

        if existing.confirmed_success() {
            if tx.status == TransactionStatus::Success {
                return Ok(ReconcileOutcome::NoActionNeeded);
            }
            let update = TransactionUpdate {
                vendor_response: Some(json!({
                    "vendorOrderId": existing.vendor_order_id,
                    "reconciled": true,
                })),
                ..TransactionUpdate::to(SubStatus::OrderPlaced)
            }
            .reconciled(reason)
            .clear_reconciliation();
            let tx = self.force(transaction_id, update).await?;
            self.notify(AlertKind::ReconciliationCompleted, &tx, "vendor confirmed the order")
                .await;
            return Ok(ReconcileOutcome::MarkedCompleted);
        }

        if existing.confirmed_failure() {
            if tx.status == TransactionStatus::Failed {
                return Ok(ReconcileOutcome::NoActionNeeded);
            }
            let failure = format!("Vendor reported the order failed ({reason})");
            let update = TransactionUpdate::to(SubStatus::VendorFailed)
                .failure_reason(failure.clone())
                .reconciled(reason)
                .clear_reconciliation();
            let tx = self.force(transaction_id, update).await?;
            self.notify(AlertKind::ReconciliationFailed, &tx, "vendor reported a failed order")
                .await;
            if let Err(e) = self.initiate_refund(transaction_id, &failure).await {
                tracing::error!("Refund for transaction {} failed: {}", transaction_id, e);
            }
            return Ok(ReconcileOutcome::MarkedFailed);
        }

        if tx.status != TransactionStatus::Processing {
            return Ok(ReconcileOutcome::NoActionNeeded);
        }

        let tx = self
            .force(
                transaction_id,
                TransactionUpdate::to(SubStatus::VendorQueued).clear_reconciliation(),
            )
            .await?;
        if self.enqueue_fulfillment(transaction_id)? == EnqueueOutcome::Duplicate {
            tracing::info!("Transaction {} already has a fulfillment job", transaction_id);
        }
        self.notify(AlertKind::TransactionRequeued, &tx, "requeued for fulfillment")
            .await;
        Ok(ReconcileOutcome::Requeued)
    }

    /// Cancel a transaction and refund it.
    ///
    /// The cancel itself always sticks. The refund result (or its error) is
    /// reported in the outcome.
    pub async fn admin_cancel(
        &self,
        transaction_id: &str,
        reason: Option<&str>,
    ) -> Result<CancelOutcome, AppError> {
        let reason = reason.unwrap_or("Cancelled by admin");
        let current = self.load(transaction_id).await?;
        if current.refund_completed {
            return Ok(CancelOutcome {
                transaction_id: current.transaction_id,
                refund: Some(RefundOutcome::AlreadyRefunded),
                refund_error: None,
            });
        }

        let tx = self
            .force(
                transaction_id,
                TransactionUpdate::to(SubStatus::AdminCancelled)
                    .failure_reason(reason)
                    .clear_reconciliation(),
            )
            .await?;
        tracing::warn!("Transaction {} cancelled by admin: {}", tx.transaction_id, reason);
        self.notify(AlertKind::TransactionCancelled, &tx, reason).await;

        let (refund, refund_error) = match self.initiate_refund(transaction_id, reason).await {
            Ok(outcome) => (Some(outcome), None),
            Err(e) => {
                tracing::error!("Refund for cancelled transaction {} failed: {}", transaction_id, e);
                (None, Some(e.to_string()))
            }
        };
        Ok(CancelOutcome {
            transaction_id: tx.transaction_id,
            refund,
            refund_error,
        })
    }

    async fn notify(&self, kind: AlertKind, tx: &Transaction, detail: &str) {
        let message = format!("Transaction {}: {}", tx.transaction_id, detail);
        self.notifier.notify(OperatorAlert::new(kind, tx, message)).await;
    }
}
