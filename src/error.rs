use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use uuid::Uuid;

use crate::models::OrderStatus;

/// Failures of the storage layer underneath the seat ledger.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("seat {seat_id} does not exist for showtime {showtime_id}")]
    SeatNotFound { showtime_id: i64, seat_id: i64 },
    #[error("seat {seat_id} written without an identical write for couple seat {couple_id}")]
    CoupleSplit { seat_id: i64, couple_id: i64 },
    #[error("seat {0} written without holding its lock")]
    NotLocked(i64),
    #[error("order {0} written without holding its lock")]
    OrderNotLocked(Uuid),
    #[error("corrupt ledger row: {0}")]
    Corrupt(String),
    #[error("ledger state lock poisoned")]
    Poisoned,
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Everything a hold, release, purchase or payment callback can be rejected with.
/// Seat batch operations are all-or-nothing, so one of these always means no
/// seat changed.
#[derive(Debug, thiserror::Error)]
pub enum BookingError {
    #[error("showtime not found")]
    ShowtimeNotFound,
    #[error("showtime has already started")]
    ShowtimeAlreadyStarted,
    #[error("seat {seat_id} not found")]
    SeatNotFound { seat_id: i64 },
    #[error("no seats requested")]
    EmptySelection,
    #[error("seat {seat_id} is not available")]
    SeatUnavailable { seat_id: i64 },
    #[error("seat {seat_id} is not held by caller")]
    NotHeldByCaller { seat_id: i64 },
    #[error("hold on seat {seat_id} expired or was never established")]
    HoldExpiredOrInvalid { seat_id: i64 },
    #[error("order not found")]
    OrderNotFound,
    #[error("order is already {0:?}")]
    OrderAlreadySettled(OrderStatus),
    #[error("invalid holder token")]
    InvalidHolder,
    #[error("caller may not act for this holder")]
    Forbidden,
    #[error("invalid request: {0}")]
    Validation(String),
    #[error(transparent)]
    Ledger(LedgerError),
}

impl From<LedgerError> for BookingError {
    fn from(error: LedgerError) -> Self {
        match error {
            LedgerError::SeatNotFound { seat_id, .. } => BookingError::SeatNotFound { seat_id },
            other => BookingError::Ledger(other),
        }
    }
}

impl BookingError {
    pub fn code(&self) -> &'static str {
        match self {
            BookingError::ShowtimeNotFound => "SHOWTIME_NOT_FOUND",
            BookingError::ShowtimeAlreadyStarted => "SHOWTIME_ALREADY_STARTED",
            BookingError::SeatNotFound { .. } => "SEAT_NOT_FOUND",
            BookingError::EmptySelection => "EMPTY_SELECTION",
            BookingError::SeatUnavailable { .. } => "SEAT_UNAVAILABLE",
            BookingError::NotHeldByCaller { .. } => "NOT_HELD_BY_CALLER",
            BookingError::HoldExpiredOrInvalid { .. } => "HOLD_EXPIRED_OR_INVALID",
            BookingError::OrderNotFound => "ORDER_NOT_FOUND",
            BookingError::OrderAlreadySettled(_) => "ORDER_ALREADY_SETTLED",
            BookingError::InvalidHolder => "INVALID_HOLDER",
            BookingError::Forbidden => "FORBIDDEN",
            BookingError::Validation(_) => "VALIDATION_FAILED",
            BookingError::Ledger(_) => "STORAGE_ERROR",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            BookingError::ShowtimeNotFound
            | BookingError::SeatNotFound { .. }
            | BookingError::OrderNotFound => StatusCode::NOT_FOUND,
            BookingError::ShowtimeAlreadyStarted
            | BookingError::SeatUnavailable { .. }
            | BookingError::OrderAlreadySettled(_) => StatusCode::CONFLICT,
            BookingError::NotHeldByCaller { .. } | BookingError::Forbidden => StatusCode::FORBIDDEN,
            BookingError::HoldExpiredOrInvalid { .. } => StatusCode::GONE,
            BookingError::EmptySelection
            | BookingError::InvalidHolder
            | BookingError::Validation(_) => StatusCode::BAD_REQUEST,
            BookingError::Ledger(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn seat_id(&self) -> Option<i64> {
        match self {
            BookingError::SeatNotFound { seat_id }
            | BookingError::SeatUnavailable { seat_id }
            | BookingError::NotHeldByCaller { seat_id }
            | BookingError::HoldExpiredOrInvalid { seat_id } => Some(*seat_id),
            _ => None,
        }
    }
}

impl From<validator::ValidationErrors> for BookingError {
    fn from(errors: validator::ValidationErrors) -> Self {
        BookingError::Validation(errors.to_string())
    }
}

#[derive(Debug, Serialize)]
pub struct ApiError {
    success: bool,
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    seat_id: Option<i64>,
}

impl IntoResponse for BookingError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            // storage details stay in the logs
            BookingError::Ledger(e) => {
                tracing::error!("ledger failure: {:?}", e);
                "Storage error, please retry".to_string()
            }
            other => other.to_string(),
        };

        let body = ApiError {
            success: false,
            code: self.code(),
            message,
            seat_id: self.seat_id(),
        };
        (status, Json(body)).into_response()
    }
}
