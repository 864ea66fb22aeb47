pub mod config;
pub mod controllers;
pub mod database;
pub mod error;
pub mod ledger;
pub mod live;
pub mod middleware;
pub mod models;
pub mod services;

use std::sync::Arc;
use tracing::info;

use config::{Config, LedgerBackend};
use ledger::{MemorySeatLedger, PgSeatLedger, SeatLedger};
use live::LiveViewHub;
use services::{ExpirySweeper, HoldArbiter, PaymentStatusService, PurchaseFinalizer};

// Shared state for the whole application
pub struct AppState {
    pub config: Config,
    pub ledger: Arc<dyn SeatLedger>,
    pub hub: Arc<LiveViewHub>,
    pub arbiter: HoldArbiter,
    pub finalizer: PurchaseFinalizer,
    pub payments: PaymentStatusService,
    pub sweeper: Arc<ExpirySweeper>,
}

impl AppState {
    /// Connects the configured ledger backend and wires the services on top.
    /// The memory backend starts with the demo showtime.
    pub async fn new(config: Config) -> Result<Arc<Self>, Box<dyn std::error::Error + Send + Sync>> {
        let ledger: Arc<dyn SeatLedger> = match config.ledger.backend {
            LedgerBackend::Postgres => {
                let db = database::Database::new(&config.database).await?;
                info!("Database connected");
                db.run_migrations().await?;
                Arc::new(PgSeatLedger::new(db.pool))
            }
            LedgerBackend::Memory => {
                let memory = MemorySeatLedger::new();
                let demo = memory.seed_demo()?;
                info!(showtime_id = demo.id, code = %demo.code, "in-memory ledger seeded");
                Arc::new(memory)
            }
        };

        Ok(Self::with_ledger(config, ledger))
    }

    pub fn with_ledger(config: Config, ledger: Arc<dyn SeatLedger>) -> Arc<Self> {
        let hub = Arc::new(LiveViewHub::new(
            ledger.clone(),
            config.booking.live_channel_capacity,
        ));
        let arbiter = HoldArbiter::new(ledger.clone(), hub.clone());
        let finalizer = PurchaseFinalizer::new(ledger.clone(), hub.clone(), config.pricing.clone());
        let payments = PaymentStatusService::new(ledger.clone(), hub.clone());
        let sweeper = Arc::new(ExpirySweeper::new(
            ledger.clone(),
            arbiter.clone(),
            payments.clone(),
            hub.clone(),
            config.booking.sweep_interval(),
            config.booking.payment_timeout(),
        ));

        Arc::new(Self {
            config,
            ledger,
            hub,
            arbiter,
            finalizer,
            payments,
            sweeper,
        })
    }
}
