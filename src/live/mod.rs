//! Live View Hub: per-showtime fan-out of seat map updates.
//!
//! ```text
//! Hold Arbiter / Sweeper / Finalizer  (after commit)
//!       │ broadcast_delta / broadcast_full
//!       ▼
//! LiveViewHub
//!   └── rooms: showtime_id → ShowtimeRoom (own lock)
//!         └── viewers: viewer id → bounded channel
//!               │
//!               ▼
//!         WebSocket session task (drains channel → socket)
//! ```
//!
//! The hub keeps no seat state of its own. Every payload is read from the
//! ledger while the room lock is held, so messages for one showtime leave in
//! the order their reads happened and never show an uncommitted value. Ledger
//! row locks are never taken from here.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::LedgerResult;
use crate::ledger::SeatLedger;
use crate::models::{group_by_row, SeatMap};

pub const DEFAULT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    Snapshot,
    Delta,
}

/// Payload pushed to live viewers: row label → seats of that row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeatMapUpdate {
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    pub showtime_id: i64,
    pub rows: SeatMap,
}

pub type UpdateSender = mpsc::Sender<Arc<SeatMapUpdate>>;

/// Receiving end handed to a connection.
pub struct ViewerHandle {
    pub id: Uuid,
    pub showtime_id: i64,
    pub updates: mpsc::Receiver<Arc<SeatMapUpdate>>,
}

#[derive(Default)]
struct Viewers {
    senders: HashMap<Uuid, UpdateSender>,
    /// Set once the room is detached from the registry; a closed room takes no viewers.
    closed: bool,
}

#[derive(Default)]
struct ShowtimeRoom {
    viewers: Mutex<Viewers>,
}

pub struct LiveViewHub {
    ledger: Arc<dyn SeatLedger>,
    rooms: DashMap<i64, Arc<ShowtimeRoom>>,
    capacity: usize,
}

impl LiveViewHub {
    pub fn new(ledger: Arc<dyn SeatLedger>, capacity: usize) -> Self {
        Self {
            ledger,
            rooms: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Registers a viewer and pushes it the full current seat map.
    pub async fn connect(&self, showtime_id: i64) -> LedgerResult<ViewerHandle> {
        let (tx, rx) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4();

        loop {
            let room = self.rooms.entry(showtime_id).or_default().clone();
            let mut viewers = room.viewers.lock().await;
            if viewers.closed {
                // lost a race with teardown; the registry entry is gone or replaced
                continue;
            }

            let seats = match self.ledger.showtime_seats(showtime_id).await {
                Ok(seats) => seats,
                Err(e) => {
                    // the room may have been created for this call alone
                    self.teardown_if_empty(showtime_id, &room, &mut viewers);
                    return Err(e);
                }
            };
            let snapshot = Arc::new(SeatMapUpdate {
                kind: UpdateKind::Snapshot,
                showtime_id,
                rows: group_by_row(&seats),
            });
            // a fresh channel has room for at least one message
            let _ = tx.try_send(snapshot);
            viewers.senders.insert(id, tx);

            debug!(showtime_id, viewer = %id, viewers = viewers.senders.len(), "live viewer connected");
            return Ok(ViewerHandle { id, showtime_id, updates: rx });
        }
    }

    pub async fn disconnect(&self, showtime_id: i64, viewer_id: Uuid) {
        let Some(room) = self.room(showtime_id) else {
            return;
        };
        let mut viewers = room.viewers.lock().await;
        if viewers.senders.remove(&viewer_id).is_some() {
            debug!(showtime_id, viewer = %viewer_id, "live viewer disconnected");
        }
        self.teardown_if_empty(showtime_id, &room, &mut viewers);
    }

    /// Pushes the complete seat map to every viewer of the showtime.
    pub async fn broadcast_full(&self, showtime_id: i64) {
        let Some(room) = self.room(showtime_id) else {
            return;
        };
        let mut viewers = room.viewers.lock().await;
        if viewers.senders.is_empty() {
            return;
        }

        let seats = match self.ledger.showtime_seats(showtime_id).await {
            Ok(seats) => seats,
            Err(e) => {
                warn!(showtime_id, "full broadcast skipped, ledger read failed: {:?}", e);
                return;
            }
        };
        let update = SeatMapUpdate {
            kind: UpdateKind::Snapshot,
            showtime_id,
            rows: group_by_row(&seats),
        };
        self.fan_out(showtime_id, &room, &mut viewers, update);
    }

    /// Pushes only the named seats, grouped by row, to every viewer of the showtime.
    pub async fn broadcast_delta(&self, showtime_id: i64, changed_seat_ids: &[i64]) {
        if changed_seat_ids.is_empty() {
            return;
        }
        let Some(room) = self.room(showtime_id) else {
            return;
        };
        let mut viewers = room.viewers.lock().await;
        if viewers.senders.is_empty() {
            return;
        }

        let seats = match self.ledger.seats(showtime_id, changed_seat_ids).await {
            Ok(seats) => seats,
            Err(e) => {
                warn!(showtime_id, "delta broadcast skipped, ledger read failed: {:?}", e);
                return;
            }
        };
        let update = SeatMapUpdate {
            kind: UpdateKind::Delta,
            showtime_id,
            rows: group_by_row(&seats),
        };
        self.fan_out(showtime_id, &room, &mut viewers, update);
    }

    pub async fn viewer_count(&self, showtime_id: i64) -> usize {
        match self.room(showtime_id) {
            Some(room) => room.viewers.lock().await.senders.len(),
            None => 0,
        }
    }

    /// Number of showtimes with at least one registered viewer.
    pub fn active_showtimes(&self) -> usize {
        self.rooms.len()
    }

    fn room(&self, showtime_id: i64) -> Option<Arc<ShowtimeRoom>> {
        self.rooms.get(&showtime_id).map(|r| r.value().clone())
    }

    fn fan_out(&self, showtime_id: i64, room: &Arc<ShowtimeRoom>, viewers: &mut Viewers, update: SeatMapUpdate) {
        let update = Arc::new(update);
        let mut dropped = Vec::new();

        for (id, sender) in &viewers.senders {
            // never wait on a slow viewer; a full or closed channel loses its seat in the room
            if let Err(e) = sender.try_send(update.clone()) {
                debug!(showtime_id, viewer = %id, "dropping live viewer: {}", e);
                dropped.push(*id);
            }
        }
        for id in dropped {
            viewers.senders.remove(&id);
        }
        self.teardown_if_empty(showtime_id, room, viewers);
    }

    fn teardown_if_empty(&self, showtime_id: i64, room: &Arc<ShowtimeRoom>, viewers: &mut Viewers) {
        if viewers.senders.is_empty() && !viewers.closed {
            viewers.closed = true;
            self.rooms
                .remove_if(&showtime_id, |_, current| Arc::ptr_eq(current, room));
            debug!(showtime_id, "live room torn down");
        }
    }
}
