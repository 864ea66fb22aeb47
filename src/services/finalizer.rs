//! Purchase Finalizer: turns a caller's held seats into an order and tickets.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use super::arbiter::bookable_showtime;
use crate::config::PricingConfig;
use crate::error::BookingError;
use crate::ledger::{normalize_ids, SeatLedger};
use crate::live::LiveViewHub;
use crate::models::{
    BuyerInfo, HolderToken, Order, PaymentMethod, SeatState, SeatStatus, SeatWrite, Ticket,
};

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseOutcome {
    pub order: Order,
    pub tickets: Vec<Ticket>,
}

#[derive(Clone)]
pub struct PurchaseFinalizer {
    ledger: Arc<dyn SeatLedger>,
    hub: Arc<LiveViewHub>,
    pricing: PricingConfig,
}

impl PurchaseFinalizer {
    pub fn new(ledger: Arc<dyn SeatLedger>, hub: Arc<LiveViewHub>, pricing: PricingConfig) -> Self {
        Self { ledger, hub, pricing }
    }

    /// Sells the named seats to `holder`. Couple partners of named seats are
    /// sold with them, so naming one half of a pair buys the pair.
    ///
    /// Every seat must be HELD by `holder` with an unexpired hold, otherwise
    /// nothing changes and `HoldExpiredOrInvalid` names the first bad seat.
    /// Order, tickets and SOLD seats commit together or not at all.
    pub async fn purchase(
        &self,
        showtime_id: i64,
        seat_ids: &[i64],
        holder: &HolderToken,
        buyer: BuyerInfo,
        payment_method: PaymentMethod,
    ) -> Result<PurchaseOutcome, BookingError> {
        let ids = normalize_ids(seat_ids);
        if ids.is_empty() {
            return Err(BookingError::EmptySelection);
        }
        buyer.validate()?;

        let showtime = bookable_showtime(self.ledger.as_ref(), showtime_id, Utc::now()).await?;

        let mut tx = self.ledger.begin().await?;
        let locked = tx.lock_seats(showtime_id, &ids).await?;
        // the lock wait may outlast the hold, so expiry is judged once the locks are ours
        let now = Utc::now();

        for seat in &locked {
            let valid = seat.state.status == SeatStatus::Held
                && seat.state.is_held_by(holder)
                && !seat.state.is_expired(now);
            if !valid {
                warn!(
                    showtime_id,
                    seat_id = seat.seat_id,
                    holder = %holder,
                    status = %seat.state.status,
                    "purchase rejected, hold missing or lapsed"
                );
                return Err(BookingError::HoldExpiredOrInvalid { seat_id: seat.seat_id });
            }
        }

        let order_id = Uuid::new_v4();
        let tickets: Vec<Ticket> = locked
            .iter()
            .map(|seat| Ticket {
                id: Uuid::new_v4(),
                order_id,
                showtime_id,
                seat_id: seat.seat_id,
                seat_label: seat.label(),
                price: self.pricing.seat_price(showtime.base_price, seat.category),
            })
            .collect();

        let order = Order {
            id: order_id,
            showtime_id,
            holder: holder.clone(),
            buyer,
            payment_method,
            status: payment_method.initial_status(),
            total_amount: tickets.iter().map(|t| t.price).sum(),
            created_at: now,
        };

        let writes: Vec<SeatWrite> = locked
            .iter()
            .map(|seat| SeatWrite {
                seat_id: seat.seat_id,
                state: SeatState::sold(),
            })
            .collect();

        tx.insert_order(&order, &tickets).await?;
        tx.write_seats(showtime_id, &writes).await?;
        tx.commit().await?;

        let sold: Vec<i64> = writes.iter().map(|w| w.seat_id).collect();
        info!(
            showtime_id,
            order_id = %order.id,
            holder = %holder,
            seats = ?sold,
            total = order.total_amount,
            status = %order.status.as_str(),
            "purchase committed"
        );
        self.hub.broadcast_delta(showtime_id, &sold).await;

        Ok(PurchaseOutcome { order, tickets })
    }
}
