//! Hold Arbiter: the only path that moves a seat from AVAILABLE to HELD, or
//! from HELD back to AVAILABLE on the holder's request.
//!
//! Every call locks the named seats and their couple partners in one
//! transaction, checks all of them, then writes all of them. Any failed check
//! drops the transaction, so a batch either fully applies or leaves no trace.

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::BookingError;
use crate::ledger::{normalize_ids, SeatLedger};
use crate::live::LiveViewHub;
use crate::models::{HolderToken, SeatState, SeatStatus, SeatWrite, Showtime};

#[derive(Debug, Clone, Serialize)]
pub struct HoldOutcome {
    pub showtime_id: i64,
    /// Requested seats plus any couple partners pulled in with them.
    pub held_seat_ids: Vec<i64>,
    pub holder: HolderToken,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct HoldArbiter {
    ledger: Arc<dyn SeatLedger>,
    hub: Arc<LiveViewHub>,
}

impl HoldArbiter {
    pub fn new(ledger: Arc<dyn SeatLedger>, hub: Arc<LiveViewHub>) -> Self {
        Self { ledger, hub }
    }

    pub async fn hold(
        &self,
        showtime_id: i64,
        seat_ids: &[i64],
        holder: &HolderToken,
        ttl: Duration,
    ) -> Result<HoldOutcome, BookingError> {
        let ids = normalize_ids(seat_ids);
        if ids.is_empty() {
            return Err(BookingError::EmptySelection);
        }

        bookable_showtime(self.ledger.as_ref(), showtime_id, Utc::now()).await?;
        let ttl = TimeDelta::from_std(ttl)
            .map_err(|_| BookingError::Validation("hold ttl out of range".to_string()))?;
        if ttl <= TimeDelta::zero() {
            return Err(BookingError::Validation("hold ttl must be positive".to_string()));
        }
        hold_expiry(Utc::now(), ttl)?;

        let mut tx = self.ledger.begin().await?;
        let locked = tx.lock_seats(showtime_id, &ids).await?;
        // lapse checks and the new expiry count from when the locks were granted
        let now = Utc::now();
        let expires_at = hold_expiry(now, ttl)?;

        for seat in &locked {
            match seat.state.status {
                SeatStatus::Available => {}
                // a lapsed hold the sweeper has not reached yet is free to take
                SeatStatus::Held if seat.state.is_expired(now) => {
                    debug!(showtime_id, seat_id = seat.seat_id, "taking over lapsed hold");
                }
                _ => return Err(BookingError::SeatUnavailable { seat_id: seat.seat_id }),
            }
        }

        let writes: Vec<SeatWrite> = locked
            .iter()
            .map(|seat| SeatWrite {
                seat_id: seat.seat_id,
                state: SeatState::held(holder.clone(), expires_at),
            })
            .collect();
        tx.write_seats(showtime_id, &writes).await?;
        tx.commit().await?;

        let held_seat_ids: Vec<i64> = writes.iter().map(|w| w.seat_id).collect();
        info!(
            showtime_id,
            holder = %holder,
            seats = ?held_seat_ids,
            expires_at = %expires_at,
            "seats held"
        );
        self.hub.broadcast_delta(showtime_id, &held_seat_ids).await;

        Ok(HoldOutcome {
            showtime_id,
            held_seat_ids,
            holder: holder.clone(),
            expires_at,
        })
    }

    /// Releases seats held by `holder`. Seats already AVAILABLE count as done,
    /// so a retried release succeeds; seats held by someone else or sold fail
    /// the whole batch. Returns how many seats changed.
    pub async fn release(
        &self,
        showtime_id: i64,
        seat_ids: &[i64],
        holder: &HolderToken,
    ) -> Result<usize, BookingError> {
        let ids = normalize_ids(seat_ids);
        if ids.is_empty() {
            return Err(BookingError::EmptySelection);
        }
        if self.ledger.showtime(showtime_id).await?.is_none() {
            return Err(BookingError::ShowtimeNotFound);
        }

        let mut tx = self.ledger.begin().await?;
        let locked = tx.lock_seats(showtime_id, &ids).await?;

        let mut writes = Vec::with_capacity(locked.len());
        for seat in &locked {
            match seat.state.status {
                SeatStatus::Available => {}
                SeatStatus::Held if seat.state.is_held_by(holder) => writes.push(SeatWrite {
                    seat_id: seat.seat_id,
                    state: SeatState::available(),
                }),
                _ => return Err(BookingError::NotHeldByCaller { seat_id: seat.seat_id }),
            }
        }

        if writes.is_empty() {
            debug!(showtime_id, holder = %holder, "release was a no-op");
            return Ok(0);
        }

        tx.write_seats(showtime_id, &writes).await?;
        tx.commit().await?;

        let released: Vec<i64> = writes.iter().map(|w| w.seat_id).collect();
        info!(showtime_id, holder = %holder, seats = ?released, "seats released");
        self.hub.broadcast_delta(showtime_id, &released).await;

        Ok(released.len())
    }

    /// System-initiated release of a lapsed hold, used by the sweeper. Returns
    /// the seats that changed (the seat and its couple partner), or nothing if
    /// the hold was renewed, released or sold in the meantime. Does not broadcast.
    pub async fn reclaim_expired(
        &self,
        showtime_id: i64,
        seat_id: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<i64>, BookingError> {
        let mut tx = self.ledger.begin().await?;
        let locked = tx.lock_seats(showtime_id, &[seat_id]).await?;

        if !locked.iter().all(|seat| seat.state.is_expired(now)) {
            return Ok(Vec::new());
        }

        let writes: Vec<SeatWrite> = locked
            .iter()
            .map(|seat| SeatWrite {
                seat_id: seat.seat_id,
                state: SeatState::available(),
            })
            .collect();
        tx.write_seats(showtime_id, &writes).await?;
        tx.commit().await?;

        Ok(writes.into_iter().map(|w| w.seat_id).collect())
    }
}

fn hold_expiry(now: DateTime<Utc>, ttl: TimeDelta) -> Result<DateTime<Utc>, BookingError> {
    now.checked_add_signed(ttl)
        .ok_or_else(|| BookingError::Validation("hold ttl out of range".to_string()))
}

/// Looks up a showtime that still accepts holds and sales.
pub(crate) async fn bookable_showtime(
    ledger: &dyn SeatLedger,
    showtime_id: i64,
    now: DateTime<Utc>,
) -> Result<Showtime, BookingError> {
    let showtime = ledger
        .showtime(showtime_id)
        .await?
        .ok_or(BookingError::ShowtimeNotFound)?;
    if showtime.has_started(now) {
        return Err(BookingError::ShowtimeAlreadyStarted);
    }
    Ok(showtime)
}
