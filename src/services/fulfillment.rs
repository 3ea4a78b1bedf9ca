//! Vendor fulfillment, run by the queue under a per-transaction lock.
//!
//! # Process
//!
//! 1. Try the lock once; if someone else holds it, skip quietly
//! 2. Re-read the transaction and stop if it is already SUCCESS or FAILED
//! 3. Ask the vendor whether an order for this transaction id already
//!    exists; if it succeeded, record it instead of ordering again
//! 4. Check the live balance against `price * rate`
//! 5. Place the order; classify failures as retryable or not
//!
//! The lock is released on every path out of the locked section.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};

use crate::error::{AppError, VendorError};
use crate::models::transaction::{
    SpuType, SubStatus, Transaction, TransactionStatus, TransactionUpdate, VendorErrorEntry,
};
use crate::models::vendor::VendorPurchaseRequest;
use crate::models::webhook::{AlertKind, OperatorAlert};
use crate::services::orchestrator::TransactionOrchestrator;
use crate::services::queue::{Job, JobHandler};

/// Lock key for a transaction's fulfillment.
pub fn fulfillment_lock_key(transaction_id: &str) -> String {
    format!("lock:transaction:{transaction_id}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FulfillmentOutcome {
    /// Another worker holds the lock
    Skipped,
    /// Nothing to do, the transaction already finished
    AlreadyFinal,
    /// Order placed, or found already placed at the vendor
    Delivered { reconciled: bool },
    /// Failed for good and handed to the refund flow
    Failed(SubStatus),
}

impl TransactionOrchestrator {
    /// Run one fulfillment attempt.
    ///
    /// # Errors
    ///
    /// Returns the vendor error when the attempt failed with a retryable
    /// error and attempts remain, so the queue schedules another one.
    /// Store and lock failures are returned as-is for the same reason.
    pub async fn process_fulfillment(&self, job: &Job) -> Result<FulfillmentOutcome, AppError> {
        let transaction_id = &job.transaction_id;
        let key = fulfillment_lock_key(transaction_id);

        let Some(lease) = self.lock.acquire(&key, self.settings.lock_ttl).await? else {
            tracing::info!(
                "Transaction {} is being fulfilled by another worker, skipping attempt {}",
                transaction_id,
                job.attempt
            );
            return Ok(FulfillmentOutcome::Skipped);
        };

        let result = self.fulfill_locked(job).await;

        if let Err(e) = self.lock.release(&lease).await {
            tracing::warn!("Failed to release lock {}: {}", key, e);
        }
        result
    }

    async fn fulfill_locked(&self, job: &Job) -> Result<FulfillmentOutcome, AppError> {
        let tx = self.load(&job.transaction_id).await?;
        if matches!(tx.status, TransactionStatus::Success | TransactionStatus::Failed) {
            tracing::info!(
                "Transaction {} already {}, acknowledging job",
                tx.transaction_id,
                tx.status
            );
            return Ok(FulfillmentOutcome::AlreadyFinal);
        }
        if tx.status != TransactionStatus::Processing {
            tracing::warn!(
                "Transaction {} in {} has no confirmed payment, not fulfilling",
                tx.transaction_id,
                tx.sub_status
            );
            return Ok(FulfillmentOutcome::AlreadyFinal);
        }

        let processing = self
            .transition(&tx, TransactionUpdate::to(SubStatus::VendorProcessing))
            .await?;
        let tx = processing.unwrap_or(tx);
        let vendor = self.vendors.get(&tx.vendor_id)?;

        match vendor.check_transaction_status(&tx.transaction_id).await {
            Ok(existing) if existing.confirmed_success() => {
                tracing::info!(
                    "Transaction {} already fulfilled by vendor {} (order {:?})",
                    tx.transaction_id,
                    tx.vendor_id,
                    existing.vendor_order_id
                );
                let response = json!({
                    "vendorOrderId": existing.vendor_order_id,
                    "alreadyProcessed": true,
                });
                self.complete_order(&tx, response, Some("Order found at vendor before purchase"))
                    .await?;
                return Ok(FulfillmentOutcome::Delivered { reconciled: true });
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    "Could not check existing vendor order for transaction {}: {}",
                    tx.transaction_id,
                    e
                );
            }
        }

        let Some(player) = tx.player_details.clone() else {
            self.fail_and_refund(&tx, SubStatus::VendorFailed, "Missing player details")
                .await?;
            return Ok(FulfillmentOutcome::Failed(SubStatus::VendorFailed));
        };

        let rate = self.rates.vendor_rate(&tx.vendor_id).await?;
        let amount = tx.spu_details.price * rate;
        let balance = vendor.check_balance().await?;
        if amount > balance {
            tracing::warn!(
                "Vendor {} balance {} cannot cover {} for transaction {}",
                tx.vendor_id,
                balance,
                amount,
                tx.transaction_id
            );
            self.fail_and_refund(
                &tx,
                SubStatus::BalanceError,
                format!("Insufficient vendor balance: need {amount}, have {balance}"),
            )
            .await?;
            return Ok(FulfillmentOutcome::Failed(SubStatus::BalanceError));
        }

        let request = VendorPurchaseRequest {
            player_id: player.player_id,
            zone_id: player.zone_id,
            product_id: tx.spu_details.vendor_product_id.clone(),
            amount,
            transaction_id: tx.transaction_id.clone(),
            metadata: tx.spu_details.metadata.clone().unwrap_or_else(|| json!({})),
            retry_count: tx.vendor_retry_count,
        };

        match vendor.purchase(&request).await {
            Ok(receipt) => {
                let response = json!({
                    "vendorTransactionId": receipt.vendor_transaction_id,
                    "response": receipt.response,
                });
                self.complete_order(&tx, response, None).await?;
                Ok(FulfillmentOutcome::Delivered { reconciled: false })
            }
            Err(e) => self.record_vendor_failure(&tx, e).await,
        }
    }

    async fn record_vendor_failure(
        &self,
        tx: &Transaction,
        error: VendorError,
    ) -> Result<FulfillmentOutcome, AppError> {
        let retry_count = tx.vendor_retry_count + 1;
        let update = TransactionUpdate {
            vendor_retry_count: Some(retry_count),
            last_vendor_error: Some(error.to_string()),
            push_vendor_error: Some(VendorErrorEntry {
                timestamp: Utc::now(),
                error: error.message.clone(),
                category: error.category,
                retry_count: tx.vendor_retry_count,
            }),
            ..TransactionUpdate::default()
        };
        let tx = self.write(&tx.transaction_id, &update).await?;

        let attempts_left = (retry_count as u32) < self.settings.max_attempts;
        if error.retryable() && attempts_left {
            tracing::warn!(
                "Vendor purchase for transaction {} failed (attempt {}/{}), will retry: {}",
                tx.transaction_id,
                retry_count,
                self.settings.max_attempts,
                error
            );
            return Err(AppError::Vendor(error));
        }

        tracing::error!(
            "Vendor purchase for transaction {} failed permanently after {} attempt(s): {}",
            tx.transaction_id,
            retry_count,
            error
        );
        self.fail_and_refund(&tx, SubStatus::VendorFailed, error.to_string())
            .await?;
        Ok(FulfillmentOutcome::Failed(SubStatus::VendorFailed))
    }

    async fn complete_order(
        &self,
        tx: &Transaction,
        vendor_response: Value,
        reconciled_reason: Option<&str>,
    ) -> Result<(), AppError> {
        let mut update = TransactionUpdate {
            vendor_response: Some(vendor_response),
            ..TransactionUpdate::to(SubStatus::OrderPlaced)
        };
        if let Some(reason) = reconciled_reason {
            update = update.reconciled(reason);
        }
        self.transition(tx, update).await?;
        tracing::info!("Transaction {} fulfilled", tx.transaction_id);
        Ok(())
    }

    /// Mark the transaction failed with `cause`, then start the refund.
    ///
    /// A refund error is recorded on the transaction and reported to the
    /// operator; it does not fail the caller.
    pub(crate) async fn fail_and_refund(
        &self,
        tx: &Transaction,
        cause: SubStatus,
        reason: impl Into<String>,
    ) -> Result<(), AppError> {
        let reason = reason.into();
        self.transition(tx, TransactionUpdate::to(cause).failure_reason(reason.clone()))
            .await?;

        if let Err(e) = self.initiate_refund(&tx.transaction_id, &reason).await {
            tracing::error!("Refund for transaction {} failed: {}", tx.transaction_id, e);
        }
        Ok(())
    }

    /// Hand paid transactions back to the queue after a restart.
    ///
    /// The queue lives in process memory, so jobs that were waiting, running
    /// or backing off when the process stopped are gone. Every `PROCESSING`
    /// row is picked up again: confirmed payments are dispatched, queued or
    /// in-flight game items are re-enqueued. Re-running an interrupted
    /// attempt is safe because fulfillment looks the order up at the vendor
    /// before buying.
    ///
    /// Returns how many transactions were picked up.
    pub async fn recover_pending_fulfillment(&self) -> Result<usize, AppError> {
        let pending = self.store.find_by_status(TransactionStatus::Processing).await?;
        let mut recovered = 0;

        for tx in pending {
            let result = match (tx.sub_status, tx.spu_type) {
                (SubStatus::PaymentSuccess, _) => self.dispatch_fulfillment(&tx).await.map(|_| ()),
                (SubStatus::VendorQueued | SubStatus::VendorProcessing, SpuType::GameItem) => {
                    self.enqueue_fulfillment(&tx.transaction_id).map(|_| ())
                }
                _ => {
                    tracing::warn!(
                        "Transaction {} left in {} needs manual reconciliation",
                        tx.transaction_id,
                        tx.sub_status
                    );
                    continue;
                }
            };

            match result {
                Ok(()) => recovered += 1,
                Err(e) => tracing::error!(
                    "Could not recover transaction {}: {}",
                    tx.transaction_id,
                    e
                ),
            }
        }

        if recovered > 0 {
            tracing::info!("Recovered {} pending fulfillment(s)", recovered);
        }
        Ok(recovered)
    }

    /// Last-resort path once the queue gives up on a job.
    async fn handle_exhausted_job(&self, job: &Job, error: &AppError) {
        let tx = match self.load(&job.transaction_id).await {
            Ok(tx) => tx,
            Err(e) => {
                tracing::error!(
                    "Could not load transaction {} after final failure: {}",
                    job.transaction_id,
                    e
                );
                return;
            }
        };
        if tx.status == TransactionStatus::Success || tx.refund_initiated {
            return;
        }

        let reason = format!("Fulfillment failed after {} attempts: {}", job.attempt, error);
        if let Err(e) = self.fail_and_refund(&tx, SubStatus::VendorFailed, reason.clone()).await {
            tracing::error!(
                "Could not fail transaction {} after final failure: {}",
                tx.transaction_id,
                e
            );
            self.notifier
                .notify(OperatorAlert::new(AlertKind::FulfillmentError, &tx, reason))
                .await;
        }
    }
}

#[async_trait]
impl JobHandler for TransactionOrchestrator {
    async fn handle(&self, job: &Job) -> Result<(), AppError> {
        let outcome = self.process_fulfillment(job).await?;
        tracing::debug!("Fulfillment job for {} finished: {:?}", job.transaction_id, outcome);
        Ok(())
    }

    async fn on_final_failure(&self, job: &Job, error: &AppError) {
        self.handle_exhausted_job(job, error).await;
    }
}
