use anyhow::Context;
use mimalloc::MiMalloc;
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cinema_booking::{config::Config, controllers, AppState};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("invalid configuration")?;

    let filter = tracing_subscriber::EnvFilter::new(&config.app.rust_log);
    if config.app.log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    info!("Starting cinema seat reservation API");

    let app_state = AppState::new(config.clone())
        .await
        .map_err(|e| anyhow::anyhow!(e))
        .context("failed to initialise application state")?;
    info!(backend = ?config.ledger.backend, "Seat ledger ready");

    // --- Start background tasks ---

    // Lapsed holds and unpaid orders, every sweep interval
    app_state.sweeper.clone().spawn();

    // --- Start the web server ---

    let app = controllers::app(app_state.clone());

    let host: std::net::IpAddr = config.app.host.parse().context("invalid APP__HOST")?;
    let addr = SocketAddr::from((host, config.app.port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
