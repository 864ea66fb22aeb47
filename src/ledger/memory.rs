//! In-process ledger.
//!
//! Each showtime seat owns an async mutex standing in for a row lock. A
//! transaction acquires those mutexes in seat-id order and buffers its writes;
//! commit applies the buffer under the state lock in one step, so readers see
//! either all of a transaction or none of it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, RwLock};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{normalize_ids, LedgerTx, LockSet, SeatKey, SeatLedger};
use crate::error::{LedgerError, LedgerResult};
use crate::models::{
    Order, OrderStatus, Seat, SeatCategory, SeatState, SeatWrite, Showtime, ShowtimeSeat, Ticket,
};

#[derive(Default)]
struct State {
    showtimes: HashMap<i64, Showtime>,
    seats: BTreeMap<SeatKey, ShowtimeSeat>,
    orders: HashMap<Uuid, Order>,
    tickets: Vec<Ticket>,
}

#[derive(Default)]
struct Inner {
    state: RwLock<State>,
    seat_locks: RwLock<HashMap<SeatKey, Arc<Mutex<()>>>>,
    order_locks: StdMutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    failing_seats: StdMutex<HashSet<SeatKey>>,
    fail_order_inserts: AtomicBool,
    fail_reads: AtomicBool,
}

#[derive(Clone, Default)]
pub struct MemorySeatLedger {
    inner: Arc<Inner>,
}

impl MemorySeatLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a showtime and generates its seat map, every seat AVAILABLE.
    pub fn add_showtime(&self, showtime: Showtime, layout: &[Seat]) -> LedgerResult<()> {
        let mut state = self.inner.state.write().map_err(|_| LedgerError::Poisoned)?;
        let mut locks = self.inner.seat_locks.write().map_err(|_| LedgerError::Poisoned)?;

        for seat in layout {
            let key = (showtime.id, seat.id);
            state
                .seats
                .insert(key, ShowtimeSeat::new(showtime.id, seat, SeatState::available()));
            locks.insert(key, Arc::new(Mutex::new(())));
        }
        state.showtimes.insert(showtime.id, showtime);
        Ok(())
    }

    /// Seeds one showtime starting in two hours: rows A-D of ten seats
    /// (row D is VIP) and row E of five couple pairs.
    pub fn seed_demo(&self) -> LedgerResult<Showtime> {
        let showtime = Showtime {
            id: 1,
            code: "DEMO-1".to_string(),
            room_id: 1,
            starts_at: Utc::now() + Duration::hours(2),
            base_price: 75_000,
        };
        self.add_showtime(showtime.clone(), &demo_layout())?;
        Ok(showtime)
    }

    /// Makes every subsequent lock of this seat fail. Fault injection for tests.
    pub fn fail_seat(&self, showtime_id: i64, seat_id: i64) {
        if let Ok(mut failing) = self.inner.failing_seats.lock() {
            failing.insert((showtime_id, seat_id));
        }
    }

    /// Makes order inserts fail until switched off. Fault injection for tests.
    pub fn fail_order_inserts(&self, fail: bool) {
        self.inner.fail_order_inserts.store(fail, Ordering::SeqCst);
    }

    /// Makes reads outside a transaction fail until switched off, the way an
    /// exhausted connection pool would. Fault injection for tests.
    pub fn fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Overwrites a seat's state outside any transaction. Test setup only.
    pub fn force_state(&self, showtime_id: i64, seat_id: i64, new_state: SeatState) -> LedgerResult<()> {
        let mut state = self.inner.state.write().map_err(|_| LedgerError::Poisoned)?;
        let seat = state
            .seats
            .get_mut(&(showtime_id, seat_id))
            .ok_or(LedgerError::SeatNotFound { showtime_id, seat_id })?;
        seat.state = new_state;
        Ok(())
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> LedgerResult<T> {
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(LedgerError::Corrupt("injected read failure".to_string()));
        }
        let state = self.inner.state.read().map_err(|_| LedgerError::Poisoned)?;
        Ok(f(&state))
    }
}

pub fn demo_layout() -> Vec<Seat> {
    let mut layout = Vec::new();
    let mut id = 1;
    for row in ["A", "B", "C", "D"] {
        let category = if row == "D" { SeatCategory::Vip } else { SeatCategory::Normal };
        for column in 1..=10 {
            layout.push(Seat::new(id, row, column, category));
            id += 1;
        }
    }
    for pair in 0..5 {
        let left = id + pair * 2;
        let column = (pair * 2 + 1) as i32;
        layout.push(Seat::new(left, "E", column, SeatCategory::Couple).coupled_with(left + 1));
        layout.push(Seat::new(left + 1, "E", column + 1, SeatCategory::Couple).coupled_with(left));
    }
    layout
}

#[async_trait]
impl SeatLedger for MemorySeatLedger {
    async fn showtime(&self, showtime_id: i64) -> LedgerResult<Option<Showtime>> {
        self.read(|s| s.showtimes.get(&showtime_id).cloned())
    }

    async fn showtime_by_code(&self, code: &str) -> LedgerResult<Option<Showtime>> {
        self.read(|s| s.showtimes.values().find(|st| st.code == code).cloned())
    }

    async fn showtime_seats(&self, showtime_id: i64) -> LedgerResult<Vec<ShowtimeSeat>> {
        self.read(|s| {
            s.seats
                .range((showtime_id, i64::MIN)..=(showtime_id, i64::MAX))
                .map(|(_, seat)| seat.clone())
                .collect()
        })
    }

    async fn seats(&self, showtime_id: i64, seat_ids: &[i64]) -> LedgerResult<Vec<ShowtimeSeat>> {
        let ids = normalize_ids(seat_ids);
        self.read(|s| {
            ids.iter()
                .filter_map(|id| s.seats.get(&(showtime_id, *id)).cloned())
                .collect()
        })
    }

    async fn expired_holds(
        &self,
        now: DateTime<Utc>,
        showtime_id: Option<i64>,
    ) -> LedgerResult<Vec<SeatKey>> {
        self.read(|s| {
            s.seats
                .iter()
                .filter(|(key, seat)| {
                    showtime_id.map_or(true, |id| key.0 == id) && seat.state.is_expired(now)
                })
                .map(|(key, _)| *key)
                .collect()
        })
    }

    async fn order(&self, order_id: Uuid) -> LedgerResult<Option<Order>> {
        self.read(|s| s.orders.get(&order_id).cloned())
    }

    async fn tickets(&self, order_id: Uuid) -> LedgerResult<Vec<Ticket>> {
        self.read(|s| {
            s.tickets
                .iter()
                .filter(|t| t.order_id == order_id)
                .cloned()
                .collect()
        })
    }

    async fn stale_pending_orders(&self, cutoff: DateTime<Utc>) -> LedgerResult<Vec<Uuid>> {
        self.read(|s| {
            s.orders
                .values()
                .filter(|o| o.status == OrderStatus::Pending && o.created_at < cutoff)
                .map(|o| o.id)
                .collect()
        })
    }

    async fn begin(&self) -> LedgerResult<Box<dyn LedgerTx>> {
        Ok(Box::new(MemoryTx {
            inner: self.inner.clone(),
            guards: Vec::new(),
            locked: LockSet::default(),
            locked_orders: HashMap::new(),
            seat_writes: BTreeMap::new(),
            order_status: HashMap::new(),
            new_orders: Vec::new(),
        }))
    }
}

struct MemoryTx {
    inner: Arc<Inner>,
    guards: Vec<OwnedMutexGuard<()>>,
    locked: LockSet,
    locked_orders: HashMap<Uuid, Order>,
    seat_writes: BTreeMap<SeatKey, SeatState>,
    order_status: HashMap<Uuid, OrderStatus>,
    new_orders: Vec<(Order, Vec<Ticket>)>,
}

impl MemoryTx {
    fn couple_partners(&self, showtime_id: i64, seat_ids: &[i64]) -> LedgerResult<Vec<i64>> {
        let state = self.inner.state.read().map_err(|_| LedgerError::Poisoned)?;
        let mut ids = Vec::with_capacity(seat_ids.len() * 2);
        for &seat_id in seat_ids {
            let seat = state
                .seats
                .get(&(showtime_id, seat_id))
                .ok_or(LedgerError::SeatNotFound { showtime_id, seat_id })?;
            ids.push(seat_id);
            if let Some(couple) = seat.couple_seat_id {
                ids.push(couple);
            }
        }
        Ok(normalize_ids(&ids))
    }
}

#[async_trait]
impl LedgerTx for MemoryTx {
    async fn lock_seats(&mut self, showtime_id: i64, seat_ids: &[i64]) -> LedgerResult<Vec<ShowtimeSeat>> {
        let ids = self.couple_partners(showtime_id, seat_ids)?;

        for &seat_id in &ids {
            let key = (showtime_id, seat_id);
            if self.locked.contains(&key) {
                continue;
            }

            let failing = self
                .inner
                .failing_seats
                .lock()
                .map_err(|_| LedgerError::Poisoned)?
                .contains(&key);
            if failing {
                return Err(LedgerError::Corrupt(format!("injected failure on seat {seat_id}")));
            }

            let lock = self
                .inner
                .seat_locks
                .read()
                .map_err(|_| LedgerError::Poisoned)?
                .get(&key)
                .cloned()
                .ok_or(LedgerError::SeatNotFound { showtime_id, seat_id })?;
            self.guards.push(lock.lock_owned().await);

            // read only after the lock is ours
            let seat = self
                .inner
                .state
                .read()
                .map_err(|_| LedgerError::Poisoned)?
                .seats
                .get(&key)
                .cloned()
                .ok_or(LedgerError::SeatNotFound { showtime_id, seat_id })?;
            self.locked.insert(seat);
        }

        ids.iter()
            .map(|id| {
                self.locked
                    .get(&(showtime_id, *id))
                    .cloned()
                    .ok_or(LedgerError::SeatNotFound { showtime_id, seat_id: *id })
            })
            .collect()
    }

    async fn write_seats(&mut self, showtime_id: i64, writes: &[SeatWrite]) -> LedgerResult<()> {
        self.locked.check_writes(showtime_id, writes)?;
        for write in writes {
            self.seat_writes
                .insert((showtime_id, write.seat_id), write.state.clone());
        }
        self.locked.apply(showtime_id, writes);
        Ok(())
    }

    async fn lock_order(&mut self, order_id: Uuid) -> LedgerResult<Option<Order>> {
        if let Some(order) = self.locked_orders.get(&order_id) {
            return Ok(Some(order.clone()));
        }

        // a lock exists exactly for each committed order
        let lock = self
            .inner
            .order_locks
            .lock()
            .map_err(|_| LedgerError::Poisoned)?
            .get(&order_id)
            .cloned();
        let Some(lock) = lock else {
            return Ok(None);
        };
        let guard = lock.lock_owned().await;

        let order = self
            .inner
            .state
            .read()
            .map_err(|_| LedgerError::Poisoned)?
            .orders
            .get(&order_id)
            .cloned();

        if let Some(order) = &order {
            self.guards.push(guard);
            self.locked_orders.insert(order_id, order.clone());
        }
        Ok(order)
    }

    async fn order_tickets(&mut self, order_id: Uuid) -> LedgerResult<Vec<Ticket>> {
        let mut tickets: Vec<Ticket> = self
            .inner
            .state
            .read()
            .map_err(|_| LedgerError::Poisoned)?
            .tickets
            .iter()
            .filter(|t| t.order_id == order_id)
            .cloned()
            .collect();
        // orders inserted earlier in this transaction
        tickets.extend(
            self.new_orders
                .iter()
                .filter(|(order, _)| order.id == order_id)
                .flat_map(|(_, tickets)| tickets.iter().cloned()),
        );
        tickets.sort_by_key(|t| t.seat_id);
        Ok(tickets)
    }

    async fn set_order_status(&mut self, order_id: Uuid, status: OrderStatus) -> LedgerResult<()> {
        let order = self
            .locked_orders
            .get_mut(&order_id)
            .ok_or(LedgerError::OrderNotLocked(order_id))?;
        order.status = status;
        self.order_status.insert(order_id, status);
        Ok(())
    }

    async fn insert_order(&mut self, order: &Order, tickets: &[Ticket]) -> LedgerResult<()> {
        if self.inner.fail_order_inserts.load(Ordering::SeqCst) {
            return Err(LedgerError::Corrupt("injected order insert failure".to_string()));
        }
        self.new_orders.push((order.clone(), tickets.to_vec()));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> LedgerResult<()> {
        let this = *self;
        let mut state = this.inner.state.write().map_err(|_| LedgerError::Poisoned)?;

        for (key, new_state) in this.seat_writes {
            if let Some(seat) = state.seats.get_mut(&key) {
                seat.state = new_state;
            }
        }
        if !this.new_orders.is_empty() {
            let mut order_locks = this.inner.order_locks.lock().map_err(|_| LedgerError::Poisoned)?;
            for (order, tickets) in this.new_orders {
                order_locks.insert(order.id, Arc::new(Mutex::new(())));
                state.orders.insert(order.id, order);
                state.tickets.extend(tickets);
            }
        }
        for (order_id, status) in this.order_status {
            if let Some(order) = state.orders.get_mut(&order_id) {
                order.status = status;
            }
        }
        drop(state);
        // row locks go last, after the state is visible
        drop(this.guards);
        Ok(())
    }
}
