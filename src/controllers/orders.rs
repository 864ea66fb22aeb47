use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::BookingError;
use crate::middleware::PaymentReporter;
use crate::models::OrderStatus;
use crate::services::Settlement;
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/orders/{id}/payment", post(payment_status))
}

#[derive(Debug, Deserialize)]
struct PaymentStatusRequest {
    status: OrderStatus,
}

#[derive(Debug, Serialize)]
struct PaymentStatusResponse {
    order_id: Uuid,
    status: OrderStatus,
    changed: bool,
}

// POST /orders/{id}/payment, called by the payment provider or staff
async fn payment_status(
    State(state): State<Arc<AppState>>,
    reporter: PaymentReporter,
    Path(order_id): Path<Uuid>,
    Json(req): Json<PaymentStatusRequest>,
) -> Result<impl IntoResponse, BookingError> {
    info!(order_id = %order_id, status = req.status.as_str(), reporter = ?reporter, "payment status reported");
    let settlement = state.payments.apply(order_id, req.status).await?;
    let changed = matches!(settlement, Settlement::Changed(_));
    let order = settlement.into_order();

    Ok(Json(PaymentStatusResponse {
        order_id: order.id,
        status: order.status,
        changed,
    }))
}
