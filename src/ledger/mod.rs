//! Seat ledger: durable per-showtime seat state.
//!
//! Reads are plain, side-effect-free accessors. Every read-then-write goes
//! through a [`LedgerTx`], which takes exclusive per-seat locks in seat-id
//! order and applies its writes as one unit on commit. Dropping a transaction
//! without committing discards its writes and releases its locks.
//!
//! The couple-seat invariant is enforced here: a write to one half of a pair
//! must come with an identical write to the other half in the same call.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::error::{LedgerError, LedgerResult};
use crate::models::{group_by_row, Order, OrderStatus, SeatMap, SeatWrite, Showtime, ShowtimeSeat, Ticket};

pub use memory::MemorySeatLedger;
pub use postgres::PgSeatLedger;

/// (showtime id, seat id)
pub type SeatKey = (i64, i64);

#[async_trait]
pub trait SeatLedger: Send + Sync {
    async fn showtime(&self, showtime_id: i64) -> LedgerResult<Option<Showtime>>;

    async fn showtime_by_code(&self, code: &str) -> LedgerResult<Option<Showtime>>;

    /// All seats of a showtime, unlocked.
    async fn showtime_seats(&self, showtime_id: i64) -> LedgerResult<Vec<ShowtimeSeat>>;

    /// The named seats of a showtime, unlocked. Unknown ids are skipped.
    async fn seats(&self, showtime_id: i64, seat_ids: &[i64]) -> LedgerResult<Vec<ShowtimeSeat>>;

    /// HELD seats whose expiry is not after `now`, optionally for one showtime only.
    async fn expired_holds(
        &self,
        now: DateTime<Utc>,
        showtime_id: Option<i64>,
    ) -> LedgerResult<Vec<SeatKey>>;

    async fn order(&self, order_id: Uuid) -> LedgerResult<Option<Order>>;

    async fn tickets(&self, order_id: Uuid) -> LedgerResult<Vec<Ticket>>;

    /// PENDING orders created before `cutoff`.
    async fn stale_pending_orders(&self, cutoff: DateTime<Utc>) -> LedgerResult<Vec<Uuid>>;

    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>>;

    async fn seat(&self, showtime_id: i64, seat_id: i64) -> LedgerResult<ShowtimeSeat> {
        self.seats(showtime_id, &[seat_id])
            .await?
            .into_iter()
            .next()
            .ok_or(LedgerError::SeatNotFound { showtime_id, seat_id })
    }

    async fn seat_map(&self, showtime_id: i64) -> LedgerResult<SeatMap> {
        let seats = self.showtime_seats(showtime_id).await?;
        Ok(group_by_row(&seats))
    }
}

/// A unit of work over the ledger.
#[async_trait]
pub trait LedgerTx: Send {
    /// Locks the named seats together with their couple partners, in seat-id
    /// order, and returns them in that order. Fails with `SeatNotFound` if a
    /// named seat does not belong to the showtime. Seats already locked by this
    /// transaction are returned without locking again.
    async fn lock_seats(&mut self, showtime_id: i64, seat_ids: &[i64]) -> LedgerResult<Vec<ShowtimeSeat>>;

    async fn write_seats(&mut self, showtime_id: i64, writes: &[SeatWrite]) -> LedgerResult<()>;

    /// Locks an order row. `None` if it does not exist.
    async fn lock_order(&mut self, order_id: Uuid) -> LedgerResult<Option<Order>>;

    /// Tickets of an order, read through this transaction.
    async fn order_tickets(&mut self, order_id: Uuid) -> LedgerResult<Vec<Ticket>>;

    async fn set_order_status(&mut self, order_id: Uuid, status: OrderStatus) -> LedgerResult<()>;

    async fn insert_order(&mut self, order: &Order, tickets: &[Ticket]) -> LedgerResult<()>;

    async fn commit(self: Box<Self>) -> LedgerResult<()>;
}

/// Seats locked by one transaction, with their last known state.
#[derive(Debug, Default)]
pub(crate) struct LockSet {
    seats: HashMap<SeatKey, ShowtimeSeat>,
}

impl LockSet {
    pub(crate) fn contains(&self, key: &SeatKey) -> bool {
        self.seats.contains_key(key)
    }

    pub(crate) fn get(&self, key: &SeatKey) -> Option<&ShowtimeSeat> {
        self.seats.get(key)
    }

    pub(crate) fn insert(&mut self, seat: ShowtimeSeat) {
        self.seats.insert((seat.showtime_id, seat.seat_id), seat);
    }

    /// Rejects writes to unlocked seats and writes that would split a couple.
    pub(crate) fn check_writes(&self, showtime_id: i64, writes: &[SeatWrite]) -> LedgerResult<()> {
        let by_seat: HashMap<i64, &SeatWrite> = writes.iter().map(|w| (w.seat_id, w)).collect();

        for write in writes {
            let seat = self
                .get(&(showtime_id, write.seat_id))
                .ok_or(LedgerError::NotLocked(write.seat_id))?;

            if let Some(couple_id) = seat.couple_seat_id {
                match by_seat.get(&couple_id) {
                    Some(partner) if partner.state == write.state => {}
                    _ => {
                        return Err(LedgerError::CoupleSplit {
                            seat_id: write.seat_id,
                            couple_id,
                        })
                    }
                }
            }
        }
        Ok(())
    }

    /// Records committed-to-be state so later checks in the same transaction see it.
    pub(crate) fn apply(&mut self, showtime_id: i64, writes: &[SeatWrite]) {
        for write in writes {
            if let Some(seat) = self.seats.get_mut(&(showtime_id, write.seat_id)) {
                seat.state = write.state.clone();
            }
        }
    }
}

/// Sorted, de-duplicated seat ids.
pub fn normalize_ids(seat_ids: &[i64]) -> Vec<i64> {
    seat_ids.iter().copied().collect::<BTreeSet<_>>().into_iter().collect()
}
