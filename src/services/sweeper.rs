use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use super::{HoldArbiter, PaymentStatusService};
use crate::ledger::SeatLedger;
use crate::live::LiveViewHub;

/// Counters of one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub reclaimed: usize,
    pub failed: usize,
    pub orders_expired: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.reclaimed == 0 && self.failed == 0 && self.orders_expired == 0
    }
}

/// Background reclamation of lapsed holds and unpaid orders.
pub struct ExpirySweeper {
    ledger: Arc<dyn SeatLedger>,
    arbiter: HoldArbiter,
    payments: PaymentStatusService,
    hub: Arc<LiveViewHub>,
    interval: Duration,
    payment_timeout: Duration,
}

impl ExpirySweeper {
    pub fn new(
        ledger: Arc<dyn SeatLedger>,
        arbiter: HoldArbiter,
        payments: PaymentStatusService,
        hub: Arc<LiveViewHub>,
        interval: Duration,
        payment_timeout: Duration,
    ) -> Self {
        Self {
            ledger,
            arbiter,
            payments,
            hub,
            interval,
            payment_timeout,
        }
    }

    /// Starts the sweep loop on the runtime. It runs until the process exits.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    pub async fn run(&self) {
        info!("expiry sweeper started, interval {:?}", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let report = self.sweep().await;
            if report.is_empty() {
                debug!("sweep found nothing to reclaim");
            } else {
                info!(
                    reclaimed = report.reclaimed,
                    failed = report.failed,
                    orders_expired = report.orders_expired,
                    "sweep finished"
                );
            }
        }
    }

    /// One full pass: lapsed holds of every showtime, then stale pending orders.
    pub async fn sweep(&self) -> SweepReport {
        let now = Utc::now();
        let mut report = self.reclaim(now, None).await;
        report.orders_expired = self.payments.expire_stale(now, self.payment_timeout).await;
        report
    }

    /// Reclaims lapsed holds of a single showtime.
    pub async fn sweep_showtime(&self, showtime_id: i64) -> SweepReport {
        self.reclaim(Utc::now(), Some(showtime_id)).await
    }

    async fn reclaim(&self, now: DateTime<Utc>, showtime_id: Option<i64>) -> SweepReport {
        let mut report = SweepReport::default();

        let expired = match self.ledger.expired_holds(now, showtime_id).await {
            Ok(expired) => expired,
            Err(e) => {
                error!("failed to scan for expired holds: {:?}", e);
                return report;
            }
        };
        if expired.is_empty() {
            return report;
        }

        let mut touched: HashSet<(i64, i64)> = HashSet::new();
        let mut changed: BTreeMap<i64, Vec<i64>> = BTreeMap::new();

        for (showtime_id, seat_id) in expired {
            // couple partners come back with the first half
            if touched.contains(&(showtime_id, seat_id)) {
                continue;
            }
            match self.arbiter.reclaim_expired(showtime_id, seat_id, now).await {
                Ok(seat_ids) => {
                    for id in &seat_ids {
                        touched.insert((showtime_id, *id));
                    }
                    report.reclaimed += seat_ids.len();
                    changed.entry(showtime_id).or_default().extend(seat_ids);
                }
                Err(e) => {
                    error!(showtime_id, seat_id, "failed to reclaim expired hold: {:?}", e);
                    report.failed += 1;
                }
            }
        }

        for (showtime_id, seat_ids) in changed {
            if seat_ids.is_empty() {
                continue;
            }
            info!(showtime_id, seats = ?seat_ids, "expired holds reclaimed");
            self.hub.broadcast_delta(showtime_id, &seat_ids).await;
        }
        report
    }
}
