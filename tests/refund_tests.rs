//! Refund initiation and the refund webhook.

mod common;

use common::{Harness, refund_callback, staged};
use topup_orchestrator::{
    error::AppError,
    models::{transaction::SubStatus, webhook::AlertKind},
    services::refund::{RefundOutcome, RefundWebhookOutcome},
};

#[tokio::test]
async fn test_second_refund_is_a_noop() {
    let h = Harness::new();
    let tx = staged(SubStatus::VendorFailed);
    let id = tx.transaction_id.clone();
    h.store.put(tx).await;

    let first = h.orchestrator.initiate_refund(&id, "vendor failed").await.unwrap();
    assert_eq!(
        first,
        RefundOutcome::Completed {
            refund_id: format!("REF-RF-{id}")
        }
    );

    let second = h.orchestrator.initiate_refund(&id, "vendor failed").await.unwrap();
    assert_eq!(second, RefundOutcome::AlreadyRefunded);
    assert_eq!(h.gateway.refunds(), 1);

    let tx = h.transaction(&id).await;
    assert!(tx.refund_initiated && tx.refund_completed && !tx.refund_failed);
    assert_eq!(tx.sub_status, SubStatus::RefundCompleted);
    assert_eq!(tx.failure_cause, Some(SubStatus::VendorFailed));
    assert_eq!(tx.refund_reason.as_deref(), Some("vendor failed"));
    assert!(tx.refund_completed_at.is_some());
}

#[tokio::test]
async fn test_refund_in_flight_is_pending() {
    let h = Harness::new();
    let mut tx = staged(SubStatus::RefundInitiated);
    tx.refund_initiated = true;
    let id = tx.transaction_id.clone();
    h.store.put(tx).await;

    let outcome = h.orchestrator.initiate_refund(&id, "again").await.unwrap();
    assert_eq!(outcome, RefundOutcome::Pending);
    assert_eq!(h.gateway.refunds(), 0);
}

#[tokio::test]
async fn test_failed_refund_alerts_and_can_be_retried() {
    let h = Harness::new();
    *h.gateway.fail_refund.lock().unwrap() = true;
    let tx = staged(SubStatus::BalanceError);
    let id = tx.transaction_id.clone();
    h.store.put(tx).await;

    let result = h.orchestrator.initiate_refund(&id, "no balance").await;
    assert!(matches!(result, Err(AppError::RefundFailed { .. })));

    let tx = h.transaction(&id).await;
    assert!(tx.refund_initiated);
    assert!(tx.refund_failed);
    assert!(!tx.refund_completed);
    assert_eq!(tx.sub_status, SubStatus::RefundFailed);
    assert!(tx.refund_failure_reason.is_some());
    assert_eq!(h.notifier.count(AlertKind::RefundFailed), 1);

    *h.gateway.fail_refund.lock().unwrap() = false;
    let outcome = h.orchestrator.initiate_refund(&id, "no balance").await.unwrap();
    assert!(matches!(outcome, RefundOutcome::Completed { .. }));
    assert_eq!(h.gateway.refunds(), 2);

    let tx = h.transaction(&id).await;
    assert!(tx.refund_completed);
    assert!(!tx.refund_failed);
    assert_eq!(tx.sub_status, SubStatus::RefundCompleted);
}

#[tokio::test]
async fn test_refund_without_gateway_order_id_fails() {
    let h = Harness::new();
    let mut tx = staged(SubStatus::VendorFailed);
    tx.order_id = None;
    let id = tx.transaction_id.clone();
    h.store.put(tx).await;

    let result = h.orchestrator.initiate_refund(&id, "vendor failed").await;
    assert!(matches!(result, Err(AppError::RefundFailed { .. })));
    assert_eq!(h.gateway.refunds(), 0);
    assert!(h.transaction(&id).await.refund_failed);
}

#[tokio::test]
async fn test_refund_webhook_completes_pending_refund() {
    let h = Harness::new();
    let mut tx = staged(SubStatus::RefundInitiated);
    tx.refund_initiated = true;
    let id = tx.transaction_id.clone();
    h.store.put(tx).await;

    let (auth, body) = refund_callback(&id, "COMPLETED");
    let (webhook_id, outcome) = h
        .orchestrator
        .handle_refund_webhook(Some(&auth), &body)
        .await
        .unwrap();
    assert_eq!(webhook_id, id);
    assert_eq!(outcome, RefundWebhookOutcome::Completed);

    let tx = h.transaction(&id).await;
    assert!(tx.refund_completed);
    assert_eq!(tx.refund_id.as_deref(), Some(format!("REF-RF-{id}").as_str()));
    assert_eq!(tx.sub_status, SubStatus::RefundCompleted);

    let (_, again) = h
        .orchestrator
        .handle_refund_webhook(Some(&auth), &body)
        .await
        .unwrap();
    assert_eq!(again, RefundWebhookOutcome::AlreadyCompleted);

    let outcome = h.orchestrator.initiate_refund(&id, "late").await.unwrap();
    assert_eq!(outcome, RefundOutcome::AlreadyRefunded);
    assert_eq!(h.gateway.refunds(), 0);
}

#[tokio::test]
async fn test_late_refund_failure_webhook_does_not_undo_completion() {
    let h = Harness::new();
    let tx = staged(SubStatus::VendorFailed);
    let id = tx.transaction_id.clone();
    h.store.put(tx).await;
    h.orchestrator.initiate_refund(&id, "vendor failed").await.unwrap();

    let (auth, body) = refund_callback(&id, "FAILED");
    let (_, outcome) = h
        .orchestrator
        .handle_refund_webhook(Some(&auth), &body)
        .await
        .unwrap();
    assert_eq!(outcome, RefundWebhookOutcome::AlreadyCompleted);

    let tx = h.transaction(&id).await;
    assert!(tx.refund_completed);
    assert!(!tx.refund_failed);
}

#[tokio::test]
async fn test_refund_failure_webhook_marks_failed() {
    let h = Harness::new();
    let mut tx = staged(SubStatus::RefundInitiated);
    tx.refund_initiated = true;
    let id = tx.transaction_id.clone();
    h.store.put(tx).await;

    let (auth, body) = refund_callback(&id, "FAILED");
    let (_, outcome) = h
        .orchestrator
        .handle_refund_webhook(Some(&auth), &body)
        .await
        .unwrap();
    assert_eq!(outcome, RefundWebhookOutcome::Failed);

    let tx = h.transaction(&id).await;
    assert!(tx.refund_failed);
    assert_eq!(tx.sub_status, SubStatus::RefundFailed);
    assert_eq!(h.notifier.count(AlertKind::RefundFailed), 1);

    let (auth, body) = refund_callback(&id, "PENDING");
    let (_, pending) = h
        .orchestrator
        .handle_refund_webhook(Some(&auth), &body)
        .await
        .unwrap();
    assert_eq!(pending, RefundWebhookOutcome::Ignored);
}

#[tokio::test]
async fn test_refund_webhook_rejects_bad_signature() {
    let h = Harness::new();
    let tx = staged(SubStatus::RefundInitiated);
    let id = tx.transaction_id.clone();
    h.store.put(tx).await;

    let (_, body) = refund_callback(&id, "COMPLETED");
    let result = h
        .orchestrator
        .handle_refund_webhook(Some("sha256=deadbeef"), &body)
        .await;
    assert!(matches!(result, Err(AppError::InvalidSignature)));
    assert!(!h.transaction(&id).await.refund_completed);
}
