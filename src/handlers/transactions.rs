//! Transaction status handlers.
//!
//! - GET /api/v1/transactions/{id}/status - Current status for the buyer
//! - GET /api/v1/transactions/{id}/events - Live status updates (SSE)

use std::convert::Infallible;

use axum::{
    Json,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use tokio_stream::{Stream, StreamExt, wrappers::BroadcastStream};

use crate::{
    AppState,
    error::AppError,
    models::{
        purchase::TransactionStatusView,
        webhook::{TransactionEvent, status_message},
    },
};

/// Current status of a transaction.
///
/// Reading the status also runs the stuck-transaction check, so a
/// transaction idle in PROCESSING for too long gets flagged here.
///
/// # Response (200)
///
/// ```json
/// {
///   "transactionId": "2f6a4c1e-...",
///   "status": "PROCESSING",
///   "subStatus": "VENDOR_QUEUED",
///   "stage": 3,
///   "message": "Payment confirmed! Purchasing your coins...",
///   "spuId": "spu42",
///   "spuType": "GAME_ITEM",
///   "createdAt": "2025-01-15T10:30:00Z",
///   "updatedAt": "2025-01-15T10:31:12Z"
/// }
/// ```
pub async fn get_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TransactionStatusView>, AppError> {
    let view = state.orchestrator.get_status(&id).await?;
    Ok(Json(view))
}

/// Server-sent events for one transaction.
///
/// The first event carries the current status; later events follow every
/// persisted transition. Delivery is best-effort: a slow client that falls
/// behind skips the events it missed.
pub async fn stream_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    // Subscribe before reading so no transition slips between the two.
    let live = BroadcastStream::new(state.events.subscribe());
    let tx = state.orchestrator.find_transaction(&id).await?;
    let current = TransactionEvent::new(
        &tx.transaction_id,
        tx.sub_status,
        status_message(tx.sub_status),
    );

    let updates = live.filter_map(move |item| match item {
        Ok(event) if event.transaction_id == id => Some(event),
        Ok(_) => None,
        Err(e) => {
            tracing::debug!("Status stream lagged: {}", e);
            None
        }
    });

    let stream = tokio_stream::once(current)
        .chain(updates)
        .filter_map(|event| Event::default().event("status").json_data(&event).ok())
        .map(Ok);

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
