//! Operator endpoints.
//!
//! - GET /api/v1/admin/transactions/{id} - Detailed transaction view
//! - POST /api/v1/admin/transactions/{id}/reconcile - Resolve against the vendor
//! - POST /api/v1/admin/transactions/{id}/cancel - Cancel and refund
//! - PUT /api/v1/admin/vendors/{vendor_id}/rate - Set a vendor exchange rate
//!
//! All routes require the admin bearer key.

use axum::{
    Extension, Json,
    extract::{Path, State},
};
use serde::Serialize;

use crate::{
    AppState,
    error::AppError,
    middleware::auth::AdminContext,
    models::purchase::{
        AdminActionRequest, AdminTransactionView, VendorRateRequest, VendorRateResponse,
    },
    services::reconciliation::{CancelOutcome, ReconcileOutcome},
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResponse {
    pub transaction_id: String,
    #[serde(flatten)]
    pub outcome: ReconcileOutcome,
}

/// Detailed view: payment and vendor payloads, retry history, refund and
/// reconciliation flags. Runs the stuck-transaction check like the public read.
pub async fn get_transaction(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AdminTransactionView>, AppError> {
    let view = state.orchestrator.get_admin_status(&id).await?;
    Ok(Json(view))
}

/// Reconcile a transaction with the vendor's records.
///
/// # Request Body (optional)
///
/// ```json
/// { "reason": "customer reported missing coins" }
/// ```
///
/// # Response (200)
///
/// ```json
/// { "transactionId": "2f6a4c1e-...", "action": "requeued" }
/// ```
pub async fn reconcile_transaction(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Path(id): Path<String>,
    body: Option<Json<AdminActionRequest>>,
) -> Result<Json<ReconcileResponse>, AppError> {
    let reason = body.and_then(|Json(b)| b.reason);
    tracing::info!("Admin {} reconciling transaction {}", admin.key_fingerprint, id);

    let outcome = state
        .orchestrator
        .admin_reconcile(&id, reason.as_deref())
        .await?;

    Ok(Json(ReconcileResponse {
        transaction_id: id,
        outcome,
    }))
}

/// Cancel a transaction and start its refund.
///
/// # Response (200)
///
/// ```json
/// {
///   "transactionId": "2f6a4c1e-...",
///   "refund": { "result": "completed", "refund_id": "RF-..." },
///   "refundError": null
/// }
/// ```
pub async fn cancel_transaction(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Path(id): Path<String>,
    body: Option<Json<AdminActionRequest>>,
) -> Result<Json<CancelOutcome>, AppError> {
    let reason = body.and_then(|Json(b)| b.reason);
    tracing::warn!("Admin {} cancelling transaction {}", admin.key_fingerprint, id);

    let outcome = state
        .orchestrator
        .admin_cancel(&id, reason.as_deref())
        .await?;
    Ok(Json(outcome))
}

/// Set the price-to-vendor-currency rate for one vendor.
///
/// # Request Body
///
/// ```json
/// { "rate": "2.5" }
/// ```
///
/// # Errors
///
/// - 400: rate not positive, or vendor not registered
pub async fn set_vendor_rate(
    State(state): State<AppState>,
    Extension(admin): Extension<AdminContext>,
    Path(vendor_id): Path<String>,
    Json(body): Json<VendorRateRequest>,
) -> Result<Json<VendorRateResponse>, AppError> {
    tracing::info!(
        "Admin {} setting exchange rate for vendor {}",
        admin.key_fingerprint,
        vendor_id
    );

    let vendor_id = state
        .orchestrator
        .set_vendor_rate(&vendor_id, body.rate)
        .await?;
    Ok(Json(VendorRateResponse {
        vendor_id,
        rate: body.rate,
    }))
}
