//! Purchase initiation handler.
//!
//! - POST /api/v1/purchases/{spu_id} - Start a purchase and get the checkout URL

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};

use crate::{
    AppState,
    error::AppError,
    models::purchase::{PurchaseRequest, PurchaseResponse},
};

/// Start a purchase.
///
/// # Endpoint
///
/// `POST /api/v1/purchases/{spu_id}`
///
/// # Request Body
///
/// ```json
/// {
///   "spuType": "GAME_ITEM",
///   "spuDetails": { "price": "19.99", "currency": "BRL", "vendorProductId": "22590" },
///   "userDetails": { "userId": "u-100" },
///   "playerDetails": { "playerId": "12345678", "zoneId": "2001" },
///   "redirectUrl": "https://shop.example.com/orders/return"
/// }
/// ```
///
/// # Response
///
/// - **Success (201 Created)**: transaction id and hosted-checkout redirect
/// - **Error (400)**: invalid request
/// - **Error (402)**: vendor balance cannot cover a game item
/// - **Error (502)**: payment gateway or vendor unavailable
///
/// ```json
/// {
///   "transactionId": "2f6a4c1e-8f0e-4c55-9d0b-3b1c9e7a6d21",
///   "redirectUrl": "https://pay.example.com/checkout/OMO2501151030"
/// }
/// ```
pub async fn create_purchase(
    State(state): State<AppState>,
    Path(spu_id): Path<String>,
    Json(request): Json<PurchaseRequest>,
) -> Result<(StatusCode, Json<PurchaseResponse>), AppError> {
    let response = state.orchestrator.initiate_purchase(&spu_id, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}
