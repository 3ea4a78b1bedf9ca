//! Transaction orchestrator - owns the purchase state machine.
//!
//! This service handles:
//! - Purchase initiation (balance precondition, gateway checkout)
//! - Idempotent payment webhooks and dispatch by SPU type
//! - Status reads, with the reconciliation sweep applied on every read
//!
//! Fulfillment, refunds and admin actions live in sibling modules as further
//! `impl TransactionOrchestrator` blocks.
//!
//! # Single Writer
//!
//! Every status change goes through `transition` (state machine checked) or
//! `force` (admin override). Both persist a partial update and then publish
//! an event; publishing can never fail the write. `transition` writes with a
//! compare-and-set on the sub-status it validated, so two deliveries racing
//! on a stale read cannot both move the transaction.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::config::OrchestratorSettings;
use crate::error::{AppError, GatewayError};
use crate::models::purchase::{
    AdminTransactionView, PurchaseRequest, PurchaseResponse, TransactionStatusView,
};
use crate::models::transaction::{
    SpuType, SubStatus, Transaction, TransactionStatus, TransactionUpdate,
};
use crate::models::webhook::{TransactionEvent, status_message};
use crate::ports::{
    DistributedLock, EventPublisher, ExchangeRateProvider, OperatorNotifier, PaymentGateway,
    TransactionStore,
};
use crate::services::queue::{Backoff, EnqueueOutcome, FulfillmentQueue, JobOptions, JobType};
use crate::services::vendors::VendorRegistry;

/// Re-reads allowed when concurrent writers keep moving a transaction.
const MAX_TRANSITION_ATTEMPTS: usize = 3;

/// Collaborators injected by the composition root.
pub struct OrchestratorDeps {
    pub store: Arc<dyn TransactionStore>,
    pub lock: Arc<dyn DistributedLock>,
    pub events: Arc<dyn EventPublisher>,
    pub payment_gateway: Arc<dyn PaymentGateway>,
    pub vendors: VendorRegistry,
    pub rates: Arc<dyn ExchangeRateProvider>,
    pub notifier: Arc<dyn OperatorNotifier>,
    pub queue: FulfillmentQueue,
}

pub struct TransactionOrchestrator {
    pub(crate) store: Arc<dyn TransactionStore>,
    pub(crate) lock: Arc<dyn DistributedLock>,
    pub(crate) events: Arc<dyn EventPublisher>,
    pub(crate) payment_gateway: Arc<dyn PaymentGateway>,
    pub(crate) vendors: VendorRegistry,
    pub(crate) rates: Arc<dyn ExchangeRateProvider>,
    pub(crate) notifier: Arc<dyn OperatorNotifier>,
    pub(crate) queue: FulfillmentQueue,
    pub(crate) settings: OrchestratorSettings,
}

/// What a payment webhook did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// Payment did not complete; nothing to fulfill or refund
    PaymentFailed,
    /// Merchandise order marked placed
    Fulfilled,
    /// Game item handed to the fulfillment queue
    Queued,
    /// Transaction was already past this point
    AlreadyProcessed,
}

impl TransactionOrchestrator {
    /// Build the orchestrator and register it as the fulfillment job handler.
    pub fn new(deps: OrchestratorDeps, settings: OrchestratorSettings) -> Arc<Self> {
        let orchestrator = Arc::new(Self {
            store: deps.store,
            lock: deps.lock,
            events: deps.events,
            payment_gateway: deps.payment_gateway,
            vendors: deps.vendors,
            rates: deps.rates,
            notifier: deps.notifier,
            queue: deps.queue,
            settings,
        });
        orchestrator
            .queue
            .register_handler(JobType::VendorFulfillment, orchestrator.clone());
        orchestrator
    }

    pub fn queue(&self) -> &FulfillmentQueue {
        &self.queue
    }

    pub async fn ping_store(&self) -> Result<(), AppError> {
        self.store.ping().await
    }

    /// Start a purchase and return the hosted-checkout redirect.
    ///
    /// # Process
    ///
    /// 1. Validate the request
    /// 2. For game items, check the live vendor balance against
    ///    `price * rate` and reject with 402 before anything is stored
    /// 3. Persist the transaction in `ORDER_INITIATED`
    /// 4. Create the gateway checkout for `<spuId>-<transactionId>`
    /// 5. Persist `GATEWAY_INITIATED` (or `GATEWAY_FAILED` and return 502)
    ///
    /// # Errors
    ///
    /// - `InvalidRequest`: bad fields or unsupported vendor
    /// - `InsufficientBalance`: vendor cannot cover a game item
    /// - `Vendor`: the balance check itself failed
    /// - `Gateway`: checkout creation failed; the row stays for audit
    pub async fn initiate_purchase(
        &self,
        spu_id: &str,
        request: PurchaseRequest,
    ) -> Result<PurchaseResponse, AppError> {
        validate_spu_id(spu_id)?;
        validate_purchase(&request)?;

        let redirect_url = request
            .redirect_url
            .clone()
            .or_else(|| self.settings.default_redirect_url.clone())
            .ok_or_else(|| AppError::InvalidRequest("redirectUrl is required".to_string()))?;
        validate_redirect_url(&redirect_url)?;
        let amount_minor = request.spu_details.amount_minor()?;

        let vendor_id = match request.spu_type {
            SpuType::GameItem => {
                let vendor_id = self.vendors.resolve_id(request.vendor_id.as_deref())?;
                self.ensure_vendor_balance(&vendor_id, &request).await?;
                vendor_id
            }
            SpuType::Merchandise => request
                .vendor_id
                .clone()
                .unwrap_or_else(|| self.vendors.default_vendor_id().to_string()),
        };

        let tx = Transaction::new(
            spu_id.to_string(),
            request.spu_type,
            request.spu_details,
            request.user_details,
            request.player_details,
            vendor_id,
        );
        self.store.insert(&tx).await?;
        tracing::info!(
            "Transaction {} created for SPU {} ({})",
            tx.transaction_id,
            tx.spu_id,
            tx.spu_type.as_str()
        );

        let merchant_order_id = tx.merchant_order_id();
        match self
            .payment_gateway
            .initiate(&merchant_order_id, amount_minor, &redirect_url)
            .await
        {
            Ok(checkout) => {
                let update = TransactionUpdate {
                    gateway_response: Some(checkout.raw),
                    order_id: Some(checkout.gateway_order_id),
                    ..TransactionUpdate::to(SubStatus::GatewayInitiated)
                };
                self.transition(&tx, update).await?;
                tracing::info!("Transaction {} sent to payment gateway", tx.transaction_id);
                Ok(PurchaseResponse {
                    transaction_id: tx.transaction_id,
                    redirect_url: checkout.redirect_url,
                })
            }
            Err(e) => {
                tracing::error!(
                    "Payment initiation failed for transaction {}: {}",
                    tx.transaction_id,
                    e
                );
                let update =
                    TransactionUpdate::to(SubStatus::GatewayFailed).failure_reason(e.to_string());
                self.transition(&tx, update).await?;
                Err(AppError::Gateway(e))
            }
        }
    }

    async fn ensure_vendor_balance(
        &self,
        vendor_id: &str,
        request: &PurchaseRequest,
    ) -> Result<(), AppError> {
        let rate = self.rates.vendor_rate(vendor_id).await?;
        let required = request.spu_details.price * rate;
        let balance = self.vendors.get(vendor_id)?.check_balance().await?;

        if required > balance {
            tracing::warn!(
                "Vendor {} balance {} cannot cover {} for a purchase request",
                vendor_id,
                balance,
                required
            );
            return Err(AppError::InsufficientBalance);
        }
        Ok(())
    }

    /// Replace the exchange rate for a registered vendor. The next balance
    /// check, at checkout or before a vendor purchase, uses it.
    pub async fn set_vendor_rate(
        &self,
        vendor_id: &str,
        rate: rust_decimal::Decimal,
    ) -> Result<String, AppError> {
        if rate <= rust_decimal::Decimal::ZERO {
            return Err(AppError::InvalidRequest("Rate must be positive".to_string()));
        }
        let vendor_id = self.vendors.resolve_id(Some(vendor_id))?;
        self.rates.set_vendor_rate(&vendor_id, rate).await?;
        tracing::info!("Exchange rate for vendor {} set to {}", vendor_id, rate);
        Ok(vendor_id)
    }

    /// Apply a verified payment callback.
    ///
    /// Safe to run any number of times for the same callback: each step
    /// checks the current state and stops when the transaction is already
    /// past it.
    ///
    /// # Errors
    ///
    /// - `InvalidSignature`: callback not signed by the gateway; nothing is touched
    /// - `Gateway(MalformedCallback)`: no usable merchant order id
    /// - `TransactionNotFound`: the id in the callback is unknown
    pub async fn handle_payment_webhook(
        &self,
        authorization: Option<&str>,
        body: &[u8],
    ) -> Result<(String, WebhookOutcome), AppError> {
        let callback = self.verify_callback(authorization, body)?;
        let order = callback.merchant_order_id()?;
        let tx = self.load(&order.transaction_id).await?;
        let raw = serde_json::from_slice::<Value>(body).unwrap_or(Value::Null);

        if !callback.is_payment_completed() {
            tracing::info!(
                "Payment failed for transaction {}: {}",
                tx.transaction_id,
                callback.payload.state
            );
            let update = TransactionUpdate {
                payment_response: Some(raw),
                ..TransactionUpdate::to(SubStatus::PaymentFailed)
            }
            .failure_reason(format!("Payment state {}", callback.payload.state));
            let outcome = match self.transition(&tx, update).await? {
                Some(_) => WebhookOutcome::PaymentFailed,
                None => WebhookOutcome::AlreadyProcessed,
            };
            return Ok((tx.transaction_id, outcome));
        }

        let confirmed = if tx.sub_status == SubStatus::PaymentSuccess {
            // An earlier delivery stopped between confirming and dispatching.
            tx
        } else {
            let update = TransactionUpdate {
                payment_response: Some(raw),
                order_id: callback
                    .payload
                    .order_id
                    .clone()
                    .filter(|_| tx.order_id.is_none()),
                ..TransactionUpdate::to(SubStatus::PaymentSuccess)
            };
            match self.transition(&tx, update).await? {
                Some(updated) => updated,
                None => {
                    tracing::info!(
                        "Transaction {} already at {}, ignoring repeated payment webhook",
                        tx.transaction_id,
                        tx.sub_status
                    );
                    return Ok((tx.transaction_id, WebhookOutcome::AlreadyProcessed));
                }
            }
        };

        let outcome = self.dispatch_fulfillment(&confirmed).await?;
        Ok((confirmed.transaction_id, outcome))
    }

    pub(crate) async fn dispatch_fulfillment(
        &self,
        tx: &Transaction,
    ) -> Result<WebhookOutcome, AppError> {
        match tx.spu_type {
            SpuType::Merchandise => {
                let placed = self
                    .transition(tx, TransactionUpdate::to(SubStatus::OrderPlaced))
                    .await?;
                if placed.is_none() {
                    return Ok(WebhookOutcome::AlreadyProcessed);
                }
                tracing::info!("Merchandise transaction {} placed", tx.transaction_id);
                Ok(WebhookOutcome::Fulfilled)
            }
            SpuType::GameItem => {
                let queued = self
                    .transition(tx, TransactionUpdate::to(SubStatus::VendorQueued))
                    .await?;
                if queued.is_none() {
                    return Ok(WebhookOutcome::AlreadyProcessed);
                }
                match self.enqueue_fulfillment(&tx.transaction_id)? {
                    EnqueueOutcome::Queued => Ok(WebhookOutcome::Queued),
                    EnqueueOutcome::Duplicate => Ok(WebhookOutcome::AlreadyProcessed),
                }
            }
        }
    }

    pub(crate) fn enqueue_fulfillment(&self, transaction_id: &str) -> Result<EnqueueOutcome, AppError> {
        self.queue
            .enqueue(JobType::VendorFulfillment, transaction_id, self.job_options())
    }

    pub(crate) fn job_options(&self) -> JobOptions {
        JobOptions {
            max_attempts: self.settings.max_attempts,
            backoff: Backoff::Exponential(self.settings.backoff_base),
        }
    }

    pub(crate) fn verify_callback(
        &self,
        authorization: Option<&str>,
        body: &[u8],
    ) -> Result<crate::models::webhook::GatewayCallback, AppError> {
        self.payment_gateway
            .validate_callback(authorization, body)
            .map_err(|e| match e {
                GatewayError::InvalidSignature => {
                    tracing::error!("Invalid gateway webhook signature");
                    AppError::InvalidSignature
                }
                other => AppError::Gateway(other),
            })
    }

    /// User-facing status. Runs the reconciliation sweep first.
    pub async fn get_status(&self, transaction_id: &str) -> Result<TransactionStatusView, AppError> {
        let tx = self.load(transaction_id).await?;
        let tx = self.sweep(tx).await;
        Ok(TransactionStatusView::from(&tx))
    }

    /// Detailed status for operators. Runs the reconciliation sweep first.
    pub async fn get_admin_status(
        &self,
        transaction_id: &str,
    ) -> Result<AdminTransactionView, AppError> {
        let tx = self.load(transaction_id).await?;
        let tx = self.sweep(tx).await;
        Ok(AdminTransactionView::from(&tx))
    }

    pub async fn find_transaction(&self, transaction_id: &str) -> Result<Transaction, AppError> {
        self.load(transaction_id).await
    }

    pub(crate) async fn load(&self, transaction_id: &str) -> Result<Transaction, AppError> {
        self.store
            .find_one(transaction_id)
            .await?
            .ok_or_else(|| AppError::TransactionNotFound(transaction_id.to_string()))
    }

    pub(crate) async fn write(
        &self,
        transaction_id: &str,
        update: &TransactionUpdate,
    ) -> Result<Transaction, AppError> {
        self.store
            .update_partial(transaction_id, update)
            .await?
            .ok_or_else(|| AppError::TransactionNotFound(transaction_id.to_string()))
    }

    /// Move `tx` to `update.sub_status` if the state machine allows it.
    ///
    /// Returns `None` without writing when the move is not allowed from the
    /// current state, which is how repeated deliveries become no-ops. The
    /// write only lands if the row is still in the sub-status the check ran
    /// against; if another writer got there first, the row is re-read and
    /// the check runs again on what it finds.
    pub(crate) async fn transition(
        &self,
        tx: &Transaction,
        update: TransactionUpdate,
    ) -> Result<Option<Transaction>, AppError> {
        let Some(next) = update.sub_status else {
            let updated = self.write(&tx.transaction_id, &update).await?;
            self.publish(&updated);
            return Ok(Some(updated));
        };

        let mut current = tx.sub_status;
        for _ in 0..MAX_TRANSITION_ATTEMPTS {
            if !current.can_transition_to(next) {
                tracing::debug!(
                    "Transaction {}: transition {} -> {} not allowed, skipping",
                    tx.transaction_id,
                    current,
                    next
                );
                return Ok(None);
            }

            match self
                .store
                .update_if_sub_status(&tx.transaction_id, current, &update)
                .await?
            {
                Some(updated) => {
                    self.publish(&updated);
                    return Ok(Some(updated));
                }
                None => {
                    let fresh = self.load(&tx.transaction_id).await?;
                    tracing::debug!(
                        "Transaction {} moved {} -> {} before {} could be written",
                        tx.transaction_id,
                        current,
                        fresh.sub_status,
                        next
                    );
                    current = fresh.sub_status;
                }
            }
        }

        Err(AppError::Internal(format!(
            "transaction {} kept changing while moving to {}",
            tx.transaction_id, next
        )))
    }

    /// Admin override: write without consulting the state machine.
    pub(crate) async fn force(
        &self,
        transaction_id: &str,
        update: TransactionUpdate,
    ) -> Result<Transaction, AppError> {
        let updated = self.write(transaction_id, &update).await?;
        self.publish(&updated);
        Ok(updated)
    }

    pub(crate) fn publish(&self, tx: &Transaction) {
        let mut event = TransactionEvent::new(
            &tx.transaction_id,
            tx.sub_status,
            status_message(tx.sub_status),
        );
        if let (TransactionStatus::Failed, Some(reason)) = (tx.status, &tx.failure_reason) {
            event = event.with_details(serde_json::json!({ "reason": reason }));
        }
        self.events.publish(event);
    }
}

/// SPU ids become the first segment of the merchant order id, so they may
/// not contain the delimiter.
fn validate_spu_id(spu_id: &str) -> Result<(), AppError> {
    if spu_id.is_empty() {
        return Err(AppError::InvalidRequest("spuId is required".to_string()));
    }
    if spu_id.contains('-') {
        return Err(AppError::InvalidRequest(
            "spuId must not contain '-'".to_string(),
        ));
    }
    Ok(())
}

fn validate_purchase(request: &PurchaseRequest) -> Result<(), AppError> {
    if request.spu_details.price <= rust_decimal::Decimal::ZERO {
        return Err(AppError::InvalidRequest(
            "Price must be positive".to_string(),
        ));
    }
    if request.spu_details.currency.trim().is_empty() {
        return Err(AppError::InvalidRequest("Currency is required".to_string()));
    }
    if request.user_details.user_id.trim().is_empty() {
        return Err(AppError::InvalidRequest("userDetails.userId is required".to_string()));
    }
    if request.spu_type == SpuType::GameItem {
        let has_player = request
            .player_details
            .as_ref()
            .is_some_and(|p| !p.player_id.trim().is_empty());
        if !has_player {
            return Err(AppError::InvalidRequest(
                "playerDetails.playerId is required for GAME_ITEM".to_string(),
            ));
        }
    }
    Ok(())
}

/// Validate the post-payment redirect URL.
///
/// # Rules
///
/// - Must be a valid absolute URL
/// - Must be HTTPS (HTTP allowed for localhost)
/// - Maximum 2048 characters
fn validate_redirect_url(url: &str) -> Result<(), AppError> {
    if url.len() > 2048 {
        return Err(AppError::InvalidRequest(
            "redirectUrl exceeds 2048 characters".to_string(),
        ));
    }

    let parsed = url::Url::parse(url)
        .map_err(|_| AppError::InvalidRequest("Invalid redirectUrl format".to_string()))?;

    match parsed.scheme() {
        "https" => Ok(()),
        "http" if matches!(parsed.host_str(), Some("localhost" | "127.0.0.1" | "0.0.0.0")) => {
            Ok(())
        }
        "http" => Err(AppError::InvalidRequest(
            "redirectUrl must use HTTPS outside localhost".to_string(),
        )),
        _ => Err(AppError::InvalidRequest(
            "redirectUrl must use HTTP or HTTPS".to_string(),
        )),
    }
}
