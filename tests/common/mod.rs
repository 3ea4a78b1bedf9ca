//! Shared harness for integration tests: in-memory store and lock, scripted
//! payment gateway and vendor, and a notifier that records alerts.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;

use topup_orchestrator::{
    AppState,
    adapters::{
        events::BroadcastPublisher,
        memory::{InMemoryLock, InMemoryTransactionStore},
        rates::ConfiguredRates,
        signing::{generate_signature, verify_signature},
    },
    config::OrchestratorSettings,
    create_app,
    error::{AppError, GatewayError, VendorError},
    middleware::auth::hash_api_key,
    models::{
        purchase::{PurchaseRequest, PurchaseResponse},
        transaction::{
            PlayerDetails, SpuDetails, SpuType, SubStatus, Transaction, TransactionStatus,
            TransactionUpdate, UserDetails,
        },
        vendor::{VendorOrderStatus, VendorPurchaseRequest, VendorReceipt},
        webhook::{AlertKind, GatewayCallback, OperatorAlert},
    },
    ports::{
        GatewayCheckout, GatewayRefund, OperatorNotifier, PaymentGateway, TransactionStore,
        VendorGateway,
    },
    services::{
        orchestrator::{OrchestratorDeps, TransactionOrchestrator},
        queue::FulfillmentQueue,
        vendors::VendorRegistry,
    },
};

pub const GATEWAY_SECRET: &str = "gateway-test-secret";
pub const ADMIN_KEY: &str = "admin-test-key";
pub const VENDOR_ID: &str = "smileone";
pub const SPU_ID: &str = "spu42";

/// Payment gateway double. Callbacks are signed with `GATEWAY_SECRET`.
#[derive(Default)]
pub struct ScriptedGateway {
    pub fail_initiate: Mutex<bool>,
    pub fail_refund: Mutex<bool>,
    pub refund_calls: AtomicU32,
    pub initiate_calls: AtomicU32,
}

impl ScriptedGateway {
    pub fn refunds(&self) -> u32 {
        self.refund_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn initiate(
        &self,
        merchant_order_id: &str,
        amount_minor: i64,
        _redirect_url: &str,
    ) -> Result<GatewayCheckout, GatewayError> {
        self.initiate_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_initiate.lock().unwrap() {
            return Err(GatewayError::Initiation("gateway unavailable".to_string()));
        }
        Ok(GatewayCheckout {
            gateway_order_id: format!("OMO-{merchant_order_id}"),
            redirect_url: format!("https://pay.test/checkout/{merchant_order_id}"),
            raw: json!({ "amount": amount_minor, "state": "PENDING" }),
        })
    }

    fn validate_callback(
        &self,
        authorization: Option<&str>,
        body: &[u8],
    ) -> Result<GatewayCallback, GatewayError> {
        let signature = authorization.ok_or(GatewayError::InvalidSignature)?;
        if !verify_signature(GATEWAY_SECRET, body, signature) {
            return Err(GatewayError::InvalidSignature);
        }
        serde_json::from_slice(body).map_err(|e| GatewayError::MalformedCallback(e.to_string()))
    }

    async fn refund(
        &self,
        _gateway_order_id: &str,
        merchant_refund_id: &str,
        _amount_minor: i64,
        _reason: &str,
    ) -> Result<GatewayRefund, GatewayError> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        if *self.fail_refund.lock().unwrap() {
            return Err(GatewayError::Refund("refund rejected".to_string()));
        }
        Ok(GatewayRefund {
            refund_id: format!("REF-{merchant_refund_id}"),
            raw: json!({ "state": "PENDING" }),
        })
    }
}

/// Vendor double with scripted purchase results.
pub struct ScriptedVendor {
    pub balance: Mutex<Decimal>,
    /// Consumed front to back; an empty script means success
    pub purchase_script: Mutex<VecDeque<Result<VendorReceipt, VendorError>>>,
    pub order_status: Mutex<Result<VendorOrderStatus, VendorError>>,
    pub purchase_delay: Mutex<Duration>,
    pub purchases: AtomicU32,
    pub balance_checks: AtomicU32,
    in_flight: AtomicU32,
    pub max_in_flight: AtomicU32,
    pub last_request: Mutex<Option<VendorPurchaseRequest>>,
}

impl Default for ScriptedVendor {
    fn default() -> Self {
        Self {
            balance: Mutex::new(dec!(1000000)),
            purchase_script: Mutex::new(VecDeque::new()),
            order_status: Mutex::new(Ok(VendorOrderStatus::not_found())),
            purchase_delay: Mutex::new(Duration::ZERO),
            purchases: AtomicU32::new(0),
            balance_checks: AtomicU32::new(0),
            in_flight: AtomicU32::new(0),
            max_in_flight: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }
}

impl ScriptedVendor {
    pub fn set_balance(&self, balance: Decimal) {
        *self.balance.lock().unwrap() = balance;
    }

    pub fn script(&self, results: Vec<Result<VendorReceipt, VendorError>>) {
        *self.purchase_script.lock().unwrap() = results.into();
    }

    pub fn set_order_status(&self, status: Result<VendorOrderStatus, VendorError>) {
        *self.order_status.lock().unwrap() = status;
    }

    pub fn purchases(&self) -> u32 {
        self.purchases.load(Ordering::SeqCst)
    }
}

pub fn receipt(id: &str) -> VendorReceipt {
    VendorReceipt {
        vendor_transaction_id: Some(id.to_string()),
        response: json!({ "status": 200, "order_id": id }),
    }
}

#[async_trait]
impl VendorGateway for ScriptedVendor {
    async fn check_balance(&self) -> Result<Decimal, VendorError> {
        self.balance_checks.fetch_add(1, Ordering::SeqCst);
        Ok(*self.balance.lock().unwrap())
    }

    async fn purchase(&self, request: &VendorPurchaseRequest) -> Result<VendorReceipt, VendorError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.purchases.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());

        let delay = *self.purchase_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let result = self
            .purchase_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(receipt("V-default")));

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn check_transaction_status(
        &self,
        _transaction_id: &str,
    ) -> Result<VendorOrderStatus, VendorError> {
        self.order_status.lock().unwrap().clone()
    }
}

/// Store wrapper that can hold back the result of the next read, so a test
/// can run another request between that read and the write that follows it.
pub struct StallingStore {
    inner: InMemoryTransactionStore,
    stall_next_read: Mutex<Option<Duration>>,
}

impl StallingStore {
    pub fn new(inner: InMemoryTransactionStore) -> Self {
        Self {
            inner,
            stall_next_read: Mutex::new(None),
        }
    }

    pub fn stall_next_read(&self, delay: Duration) {
        *self.stall_next_read.lock().unwrap() = Some(delay);
    }
}

#[async_trait]
impl TransactionStore for StallingStore {
    async fn insert(&self, tx: &Transaction) -> Result<(), AppError> {
        self.inner.insert(tx).await
    }

    async fn find_one(&self, transaction_id: &str) -> Result<Option<Transaction>, AppError> {
        let found = self.inner.find_one(transaction_id).await?;
        let stall = self.stall_next_read.lock().unwrap().take();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        Ok(found)
    }

    async fn update_partial(
        &self,
        transaction_id: &str,
        update: &TransactionUpdate,
    ) -> Result<Option<Transaction>, AppError> {
        self.inner.update_partial(transaction_id, update).await
    }

    async fn update_if_sub_status(
        &self,
        transaction_id: &str,
        expected: SubStatus,
        update: &TransactionUpdate,
    ) -> Result<Option<Transaction>, AppError> {
        self.inner
            .update_if_sub_status(transaction_id, expected, update)
            .await
    }

    async fn find_by_status(&self, status: TransactionStatus) -> Result<Vec<Transaction>, AppError> {
        self.inner.find_by_status(status).await
    }

    async fn ping(&self) -> Result<(), AppError> {
        self.inner.ping().await
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub alerts: Mutex<Vec<OperatorAlert>>,
}

impl RecordingNotifier {
    pub fn kinds(&self) -> Vec<AlertKind> {
        self.alerts.lock().unwrap().iter().map(|a| a.event_type).collect()
    }

    pub fn count(&self, kind: AlertKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }
}

#[async_trait]
impl OperatorNotifier for RecordingNotifier {
    async fn notify(&self, alert: OperatorAlert) {
        self.alerts.lock().unwrap().push(alert);
    }
}

pub fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        default_redirect_url: Some("https://shop.test/return".to_string()),
        lock_ttl: Duration::from_secs(5),
        max_attempts: 3,
        backoff_base: Duration::from_millis(5),
        reconciliation_threshold: Duration::from_secs(300),
    }
}

pub struct Harness {
    pub orchestrator: Arc<TransactionOrchestrator>,
    pub store: InMemoryTransactionStore,
    pub reads: Arc<StallingStore>,
    pub lock: InMemoryLock,
    pub events: BroadcastPublisher,
    pub gateway: Arc<ScriptedGateway>,
    pub vendor: Arc<ScriptedVendor>,
    pub notifier: Arc<RecordingNotifier>,
    pub rates: ConfiguredRates,
    pub queue: FulfillmentQueue,
}

impl Harness {
    /// Harness with the queue stopped. Call `start_workers` to process jobs.
    pub fn new() -> Self {
        Self::with_settings(fast_settings())
    }

    pub fn with_settings(settings: OrchestratorSettings) -> Self {
        let store = InMemoryTransactionStore::new();
        let lock = InMemoryLock::new();
        let events = BroadcastPublisher::new();
        let gateway = Arc::new(ScriptedGateway::default());
        let vendor = Arc::new(ScriptedVendor::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let rates = ConfiguredRates::new(dec!(1));
        let queue = FulfillmentQueue::new();
        let reads = Arc::new(StallingStore::new(store.clone()));

        let orchestrator = TransactionOrchestrator::new(
            OrchestratorDeps {
                store: reads.clone(),
                lock: Arc::new(lock.clone()),
                events: Arc::new(events.clone()),
                payment_gateway: gateway.clone(),
                vendors: VendorRegistry::new(VENDOR_ID).with_vendor(VENDOR_ID, vendor.clone()),
                rates: Arc::new(rates.clone()),
                notifier: notifier.clone(),
                queue: queue.clone(),
            },
            settings,
        );

        Self {
            orchestrator,
            store,
            reads,
            lock,
            events,
            gateway,
            vendor,
            notifier,
            rates,
            queue,
        }
    }

    pub fn start_workers(&self, workers: usize) {
        self.queue.start(workers);
    }

    pub async fn settle(&self) {
        tokio::time::timeout(Duration::from_secs(10), self.queue.wait_idle())
            .await
            .expect("queue did not drain");
    }

    pub fn app(&self) -> Router {
        create_app(AppState {
            orchestrator: self.orchestrator.clone(),
            events: self.events.clone(),
            admin_api_key_hash: Arc::from(hash_api_key(ADMIN_KEY).as_str()),
        })
    }

    pub async fn transaction(&self, transaction_id: &str) -> Transaction {
        self.store
            .find_one(transaction_id)
            .await
            .unwrap()
            .expect("transaction exists")
    }

    pub async fn purchase(&self, request: PurchaseRequest) -> PurchaseResponse {
        self.orchestrator
            .initiate_purchase(SPU_ID, request)
            .await
            .expect("purchase initiated")
    }

    pub async fn pay(&self, transaction_id: &str) {
        let (auth, body) = payment_callback(transaction_id, "COMPLETED");
        self.orchestrator
            .handle_payment_webhook(Some(&auth), &body)
            .await
            .expect("payment webhook accepted");
    }
}

pub fn game_item(price: Decimal) -> PurchaseRequest {
    PurchaseRequest {
        spu_type: SpuType::GameItem,
        spu_details: SpuDetails {
            price,
            currency: "BRL".to_string(),
            name: Some("100 Diamonds".to_string()),
            vendor_product_id: Some("22590".to_string()),
            metadata: None,
        },
        user_details: user(),
        player_details: Some(PlayerDetails {
            player_id: "12345678".to_string(),
            zone_id: Some("2001".to_string()),
            game_id: None,
            game_name: None,
        }),
        redirect_url: None,
        vendor_id: None,
    }
}

pub fn merchandise(price: Decimal) -> PurchaseRequest {
    PurchaseRequest {
        spu_type: SpuType::Merchandise,
        spu_details: SpuDetails {
            price,
            currency: "BRL".to_string(),
            name: Some("T-shirt".to_string()),
            vendor_product_id: None,
            metadata: None,
        },
        user_details: user(),
        player_details: None,
        redirect_url: Some("https://shop.test/orders".to_string()),
        vendor_id: None,
    }
}

fn user() -> UserDetails {
    UserDetails {
        user_id: "u-100".to_string(),
        email: Some("buyer@example.com".to_string()),
        phone: None,
    }
}

/// Signed payment callback for `transaction_id` in `state`.
pub fn payment_callback(transaction_id: &str, state: &str) -> (String, Vec<u8>) {
    sign(json!({
        "event": "checkout.order.completed",
        "payload": {
            "merchantOrderId": format!("{SPU_ID}-{transaction_id}"),
            "orderId": format!("OMO-{SPU_ID}-{transaction_id}"),
            "state": state
        }
    }))
}

/// Signed refund callback for `transaction_id` in `state`.
pub fn refund_callback(transaction_id: &str, state: &str) -> (String, Vec<u8>) {
    sign(json!({
        "event": "pg.refund.completed",
        "payload": {
            "originalMerchantOrderId": format!("{SPU_ID}-{transaction_id}"),
            "refundId": format!("REF-RF-{transaction_id}"),
            "state": state
        }
    }))
}

fn sign(body: serde_json::Value) -> (String, Vec<u8>) {
    let body = serde_json::to_vec(&body).unwrap();
    (generate_signature(GATEWAY_SECRET, &body), body)
}

/// A paid game-item transaction placed directly at `sub_status`.
pub fn staged(sub_status: SubStatus) -> Transaction {
    let request = game_item(dec!(10));
    let mut tx = Transaction::new(
        SPU_ID.to_string(),
        request.spu_type,
        request.spu_details,
        request.user_details,
        request.player_details,
        VENDOR_ID.to_string(),
    );
    tx.order_id = Some(format!("OMO-{}", tx.merchant_order_id()));
    tx.status = sub_status.status();
    tx.sub_status = sub_status;
    if sub_status.is_failure_cause() {
        tx.failure_cause = Some(sub_status);
    }
    tx
}
