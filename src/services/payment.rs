//! Payment status handling for orders.
//!
//! The payment collaborator reports PAID or FAILED for an order id. FAILED
//! cancels the order and puts its seats back on sale. PENDING orders nobody
//! reports on within the payment timeout are failed by the sweeper through the
//! same path.

use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::BookingError;
use crate::ledger::{LedgerTx, SeatLedger};
use crate::live::LiveViewHub;
use crate::models::{Order, OrderStatus, SeatState, SeatStatus, SeatWrite};

/// Result of applying a payment status.
#[derive(Debug, Clone)]
pub enum Settlement {
    /// The order moved out of PENDING.
    Changed(Order),
    /// The order already had the reported status.
    Unchanged(Order),
}

impl Settlement {
    pub fn order(&self) -> &Order {
        match self {
            Settlement::Changed(order) | Settlement::Unchanged(order) => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            Settlement::Changed(order) | Settlement::Unchanged(order) => order,
        }
    }
}

#[derive(Clone)]
pub struct PaymentStatusService {
    ledger: Arc<dyn SeatLedger>,
    hub: Arc<LiveViewHub>,
}

impl PaymentStatusService {
    pub fn new(ledger: Arc<dyn SeatLedger>, hub: Arc<LiveViewHub>) -> Self {
        Self { ledger, hub }
    }

    /// Applies a PAID or FAILED report. Repeating the current status is a
    /// no-op; contradicting a settled order is `OrderAlreadySettled`.
    pub async fn apply(&self, order_id: Uuid, status: OrderStatus) -> Result<Settlement, BookingError> {
        if status == OrderStatus::Pending {
            return Err(BookingError::Validation(
                "payment status must be PAID or FAILED".to_string(),
            ));
        }

        let mut tx = self.ledger.begin().await?;
        let order = tx
            .lock_order(order_id)
            .await?
            .ok_or(BookingError::OrderNotFound)?;

        if order.status == status {
            debug!(order_id = %order_id, status = status.as_str(), "payment status already applied");
            return Ok(Settlement::Unchanged(order));
        }
        if order.status != OrderStatus::Pending {
            return Err(BookingError::OrderAlreadySettled(order.status));
        }

        match status {
            OrderStatus::Failed => self.cancel(tx, order).await.map(Settlement::Changed),
            _ => {
                tx.set_order_status(order_id, status).await?;
                tx.commit().await?;
                info!(order_id = %order_id, showtime_id = order.showtime_id, "order paid");
                Ok(Settlement::Changed(Order { status, ..order }))
            }
        }
    }

    /// Fails PENDING orders older than `timeout`. Returns how many were failed.
    /// One broken order is logged and skipped.
    pub async fn expire_stale(&self, now: DateTime<Utc>, timeout: Duration) -> usize {
        let timeout = TimeDelta::from_std(timeout).unwrap_or(TimeDelta::MAX);
        let Some(cutoff) = now.checked_sub_signed(timeout) else {
            return 0;
        };

        let stale = match self.ledger.stale_pending_orders(cutoff).await {
            Ok(stale) => stale,
            Err(e) => {
                error!("failed to list stale pending orders: {:?}", e);
                return 0;
            }
        };
        if stale.is_empty() {
            return 0;
        }

        info!("found {} pending orders past the payment timeout", stale.len());
        let mut expired = 0;
        for order_id in stale {
            match self.apply(order_id, OrderStatus::Failed).await {
                Ok(Settlement::Changed(_)) => expired += 1,
                Ok(Settlement::Unchanged(_)) => {}
                // paid in the meantime
                Err(BookingError::OrderAlreadySettled(status)) => {
                    debug!(order_id = %order_id, status = status.as_str(), "stale order settled before expiry");
                }
                Err(e) => error!(order_id = %order_id, "failed to expire pending order: {:?}", e),
            }
        }
        expired
    }

    /// Marks a locked order FAILED and returns its seats to AVAILABLE.
    /// The order lock is taken before seat locks on this path.
    async fn cancel(&self, mut tx: Box<dyn LedgerTx>, order: Order) -> Result<Order, BookingError> {
        let showtime_id = order.showtime_id;
        let seat_ids: Vec<i64> = tx
            .order_tickets(order.id)
            .await?
            .into_iter()
            .map(|t| t.seat_id)
            .collect();

        let mut released = Vec::new();
        if !seat_ids.is_empty() {
            let locked = tx.lock_seats(showtime_id, &seat_ids).await?;
            let writes: Vec<SeatWrite> = locked
                .iter()
                .filter(|seat| seat.state.status == SeatStatus::Sold)
                .map(|seat| SeatWrite {
                    seat_id: seat.seat_id,
                    state: SeatState::available(),
                })
                .collect();
            if writes.len() != locked.len() {
                warn!(
                    order_id = %order.id,
                    showtime_id,
                    "cancelled order had seats that were no longer sold"
                );
            }
            tx.write_seats(showtime_id, &writes).await?;
            released = writes.into_iter().map(|w| w.seat_id).collect();
        }

        tx.set_order_status(order.id, OrderStatus::Failed).await?;
        tx.commit().await?;

        info!(
            order_id = %order.id,
            showtime_id,
            seats = ?released,
            "order failed, seats returned to sale"
        );
        self.hub.broadcast_full(showtime_id).await;

        Ok(Order {
            status: OrderStatus::Failed,
            ..order
        })
    }
}
