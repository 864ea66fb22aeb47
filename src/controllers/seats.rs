use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

use crate::error::BookingError;
use crate::middleware::Caller;
use crate::models::{BuyerInfo, PaymentMethod, SeatMap, Showtime};
use crate::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/showtimes/{code}/seats", get(get_seats))
        .route("/showtimes/{code}/seats/hold", post(hold_seats))
        .route("/showtimes/{code}/seats/release", post(release_seats))
        .route("/showtimes/{code}/seats/purchase", post(purchase_seats))
}

pub(crate) async fn find_showtime(state: &AppState, code: &str) -> Result<Showtime, BookingError> {
    state
        .ledger
        .showtime_by_code(code)
        .await?
        .ok_or(BookingError::ShowtimeNotFound)
}

/* ---------- SEAT MAP ---------- */

#[derive(Debug, Serialize)]
struct SeatMapResponse {
    showtime_id: i64,
    code: String,
    starts_at: DateTime<Utc>,
    rows: SeatMap,
}

// GET /showtimes/{code}/seats
async fn get_seats(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Result<impl IntoResponse, BookingError> {
    let showtime = find_showtime(&state, &code).await?;

    // lapsed holds are reclaimed before answering, not only on the sweeper's timer
    let report = state.sweeper.sweep_showtime(showtime.id).await;
    if report.reclaimed > 0 {
        tracing::debug!(showtime_id = showtime.id, reclaimed = report.reclaimed, "reclaimed on read");
    }

    let rows = state.ledger.seat_map(showtime.id).await?;
    Ok(Json(SeatMapResponse {
        showtime_id: showtime.id,
        code: showtime.code,
        starts_at: showtime.starts_at,
        rows,
    }))
}

/* ---------- HOLD ---------- */

#[derive(Debug, Deserialize, Validate)]
struct HoldRequest {
    #[validate(length(max = 20))]
    seat_ids: Vec<i64>,
    guest_session: Option<Uuid>,
}

// POST /showtimes/{code}/seats/hold
async fn hold_seats(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    caller: Caller,
    Json(req): Json<HoldRequest>,
) -> Result<impl IntoResponse, BookingError> {
    req.validate()?;
    let showtime = find_showtime(&state, &code).await?;
    let holder = caller.holder_for_hold(req.guest_session);

    let outcome = state
        .arbiter
        .hold(showtime.id, &req.seat_ids, &holder, state.config.booking.hold_ttl())
        .await?;
    Ok(Json(outcome))
}

/* ---------- RELEASE ---------- */

#[derive(Debug, Deserialize, Validate)]
struct ReleaseRequest {
    #[validate(length(max = 20))]
    seat_ids: Vec<i64>,
    holder: String,
}

#[derive(Debug, Serialize)]
struct ReleaseResponse {
    released: usize,
}

// POST /showtimes/{code}/seats/release
async fn release_seats(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    caller: Caller,
    Json(req): Json<ReleaseRequest>,
) -> Result<impl IntoResponse, BookingError> {
    req.validate()?;
    let holder = caller.authorize(&req.holder)?;
    let showtime = find_showtime(&state, &code).await?;

    let released = state.arbiter.release(showtime.id, &req.seat_ids, &holder).await?;
    Ok(Json(ReleaseResponse { released }))
}

/* ---------- PURCHASE ---------- */

#[derive(Debug, Deserialize, Validate)]
struct PurchaseRequest {
    #[validate(length(max = 20))]
    seat_ids: Vec<i64>,
    holder: String,
    payment_method: PaymentMethod,
    #[validate(nested)]
    buyer: BuyerInfo,
}

// POST /showtimes/{code}/seats/purchase
async fn purchase_seats(
    State(state): State<Arc<AppState>>,
    Path(code): Path<String>,
    caller: Caller,
    Json(req): Json<PurchaseRequest>,
) -> Result<impl IntoResponse, BookingError> {
    req.validate()?;
    let holder = caller.authorize(&req.holder)?;
    let showtime = find_showtime(&state, &code).await?;

    let outcome = state
        .finalizer
        .purchase(showtime.id, &req.seat_ids, &holder, req.buyer, req.payment_method)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}
