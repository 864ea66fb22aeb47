pub mod live;
pub mod orders;
pub mod seats;

use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

pub fn routes() -> Router<Arc<crate::AppState>> {
    Router::new()
        .merge(seats::routes())
        .merge(live::routes())
        .merge(orders::routes())
}

/// The whole HTTP surface with state applied.
pub fn app(state: Arc<crate::AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "Cinema seat reservation API v1.0" }))
        .route("/health", get(|| async { "OK" }))
        .merge(routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}
