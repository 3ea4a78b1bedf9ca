//! Stuck-transaction sweep and admin reconcile/cancel.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal_macros::dec;

use common::{Harness, merchandise, staged};
use topup_orchestrator::{
    error::{VendorError, VendorErrorCategory},
    models::{
        transaction::{SpuType, SubStatus, Transaction, TransactionStatus},
        vendor::VendorOrderStatus,
        webhook::AlertKind,
    },
    services::{
        queue::JobType,
        reconciliation::ReconcileOutcome,
        refund::RefundOutcome,
    },
};

fn stuck(sub_status: SubStatus) -> Transaction {
    let mut tx = staged(sub_status);
    tx.updated_at = Utc::now() - ChronoDuration::minutes(10);
    tx
}

#[tokio::test]
async fn test_status_read_flags_stuck_transaction_once() {
    let h = Harness::new();
    let tx = stuck(SubStatus::VendorQueued);
    let id = tx.transaction_id.clone();
    h.store.put(tx).await;

    let view = h.orchestrator.get_status(&id).await.unwrap();
    assert_eq!(view.status, TransactionStatus::Processing);

    let tx = h.transaction(&id).await;
    assert!(tx.reconciliation_needed);
    assert!(tx.reconciliation_marked_at.is_some());
    assert_eq!(h.notifier.count(AlertKind::ReconciliationNeeded), 1);

    h.orchestrator.get_status(&id).await.unwrap();
    h.orchestrator.get_admin_status(&id).await.unwrap();
    assert_eq!(h.notifier.count(AlertKind::ReconciliationNeeded), 1);
}

#[tokio::test]
async fn test_sweep_ignores_recent_and_non_processing() {
    let h = Harness::new();

    let recent = staged(SubStatus::VendorProcessing);
    let recent_id = recent.transaction_id.clone();
    h.store.put(recent).await;

    let old_pending = stuck(SubStatus::GatewayInitiated);
    let pending_id = old_pending.transaction_id.clone();
    h.store.put(old_pending).await;

    h.orchestrator.get_status(&recent_id).await.unwrap();
    h.orchestrator.get_status(&pending_id).await.unwrap();

    assert!(!h.transaction(&recent_id).await.reconciliation_needed);
    assert!(!h.transaction(&pending_id).await.reconciliation_needed);
    assert!(h.notifier.kinds().is_empty());
}

#[tokio::test]
async fn test_reconcile_records_vendor_success() {
    let h = Harness::new();
    let tx = stuck(SubStatus::VendorProcessing);
    let id = tx.transaction_id.clone();
    h.store.put(tx).await;
    h.orchestrator.get_status(&id).await.unwrap();

    h.vendor.set_order_status(Ok(VendorOrderStatus {
        exists: true,
        success: true,
        vendor_order_id: Some("V-77".to_string()),
    }));
    let outcome = h
        .orchestrator
        .admin_reconcile(&id, Some("customer ticket 12"))
        .await
        .unwrap();
    assert_eq!(outcome, ReconcileOutcome::MarkedCompleted);

    let tx = h.transaction(&id).await;
    assert_eq!(tx.status, TransactionStatus::Success);
    assert_eq!(tx.sub_status, SubStatus::OrderPlaced);
    assert!(tx.reconciled);
    assert_eq!(tx.reconciled_reason.as_deref(), Some("customer ticket 12"));
    assert!(!tx.reconciliation_needed);
    assert_eq!(h.notifier.count(AlertKind::ReconciliationCompleted), 1);

    let again = h.orchestrator.admin_reconcile(&id, None).await.unwrap();
    assert_eq!(again, ReconcileOutcome::NoActionNeeded);
}

#[tokio::test]
async fn test_reconcile_fails_and_refunds_on_vendor_failure() {
    let h = Harness::new();
    let tx = stuck(SubStatus::VendorProcessing);
    let id = tx.transaction_id.clone();
    h.store.put(tx).await;

    h.vendor.set_order_status(Ok(VendorOrderStatus {
        exists: true,
        success: false,
        vendor_order_id: Some("V-78".to_string()),
    }));
    let outcome = h.orchestrator.admin_reconcile(&id, None).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::MarkedFailed);

    let tx = h.transaction(&id).await;
    assert_eq!(tx.status, TransactionStatus::Failed);
    assert_eq!(tx.failure_cause, Some(SubStatus::VendorFailed));
    assert!(tx.refund_completed);
    assert_eq!(h.gateway.refunds(), 1);
    assert_eq!(h.notifier.count(AlertKind::ReconciliationFailed), 1);
}

#[tokio::test]
async fn test_reconcile_requeues_when_vendor_has_no_order() {
    let h = Harness::new();
    let tx = stuck(SubStatus::VendorProcessing);
    let id = tx.transaction_id.clone();
    h.store.put(tx).await;

    let outcome = h.orchestrator.admin_reconcile(&id, None).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::Requeued);
    assert!(h.queue.is_pending(JobType::VendorFulfillment, &id));
    assert_eq!(h.transaction(&id).await.sub_status, SubStatus::VendorQueued);
    assert_eq!(h.notifier.count(AlertKind::TransactionRequeued), 1);

    h.start_workers(1);
    h.settle().await;

    let tx = h.transaction(&id).await;
    assert_eq!(tx.sub_status, SubStatus::OrderPlaced);
    assert_eq!(h.vendor.purchases(), 1);
}

#[tokio::test]
async fn test_reconcile_reports_vendor_lookup_error() {
    let h = Harness::new();
    let tx = stuck(SubStatus::VendorProcessing);
    let id = tx.transaction_id.clone();
    h.store.put(tx).await;

    h.vendor.set_order_status(Err(VendorError::new(
        VendorErrorCategory::Network,
        "connection refused",
    )));
    let outcome = h.orchestrator.admin_reconcile(&id, None).await.unwrap();
    assert!(matches!(outcome, ReconcileOutcome::VendorCheckFailed { .. }));

    let tx = h.transaction(&id).await;
    assert_eq!(tx.sub_status, SubStatus::VendorProcessing);
    assert_eq!(h.notifier.count(AlertKind::ReconciliationError), 1);
}

#[tokio::test]
async fn test_reconcile_places_stuck_merchandise() {
    let h = Harness::new();
    let mut tx = stuck(SubStatus::PaymentSuccess);
    tx.spu_type = SpuType::Merchandise;
    tx.player_details = None;
    let id = tx.transaction_id.clone();
    h.store.put(tx).await;

    let outcome = h.orchestrator.admin_reconcile(&id, None).await.unwrap();
    assert_eq!(outcome, ReconcileOutcome::MarkedCompleted);
    assert_eq!(h.transaction(&id).await.sub_status, SubStatus::OrderPlaced);
    assert_eq!(h.vendor.purchases(), 0);
}

#[tokio::test]
async fn test_cancel_fails_and_refunds_once() {
    let h = Harness::new();
    let tx = stuck(SubStatus::VendorQueued);
    let id = tx.transaction_id.clone();
    h.store.put(tx).await;

    let outcome = h
        .orchestrator
        .admin_cancel(&id, Some("duplicate order"))
        .await
        .unwrap();
    assert!(matches!(outcome.refund, Some(RefundOutcome::Completed { .. })));
    assert!(outcome.refund_error.is_none());

    let tx = h.transaction(&id).await;
    assert_eq!(tx.status, TransactionStatus::Failed);
    assert_eq!(tx.failure_cause, Some(SubStatus::AdminCancelled));
    assert_eq!(tx.failure_reason.as_deref(), Some("duplicate order"));
    assert!(tx.refund_completed);
    assert_eq!(h.notifier.count(AlertKind::TransactionCancelled), 1);

    let again = h.orchestrator.admin_cancel(&id, None).await.unwrap();
    assert_eq!(again.refund, Some(RefundOutcome::AlreadyRefunded));
    assert_eq!(h.gateway.refunds(), 1);
}

#[tokio::test]
async fn test_cancel_reports_refund_error() {
    let h = Harness::new();
    *h.gateway.fail_refund.lock().unwrap() = true;
    let response = h.purchase(merchandise(dec!(30))).await;

    let outcome = h
        .orchestrator
        .admin_cancel(&response.transaction_id, None)
        .await
        .unwrap();
    assert!(outcome.refund.is_none());
    assert!(outcome.refund_error.is_some());

    let tx = h.transaction(&response.transaction_id).await;
    assert_eq!(tx.failure_cause, Some(SubStatus::AdminCancelled));
    assert!(tx.refund_failed);
    assert_eq!(h.notifier.count(AlertKind::RefundFailed), 1);
}
