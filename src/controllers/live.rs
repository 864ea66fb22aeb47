//! Live seat map over WebSocket.
//!
//! ```text
//! ws://localhost:8000/showtimes/DEMO-1/live
//! ```
//!
//! The first message is a full snapshot, later ones are deltas or snapshots:
//!
//! ```json
//! {
//!   "type": "delta",
//!   "showtime_id": 1,
//!   "rows": { "E": [{ "id": 41, "label": "E1", "status": "HELD", ... }] }
//! }
//! ```

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::seats::find_showtime;
use crate::error::BookingError;
use crate::live::ViewerHandle;
use crate::AppState;

const PING_INTERVAL_SECS: u64 = 30;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/showtimes/{code}/live", get(live_seats))
}

// GET /showtimes/{code}/live
async fn live_seats(
    ws: WebSocketUpgrade,
    Path(code): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, BookingError> {
    let showtime = find_showtime(&state, &code).await?;
    info!(showtime_id = showtime.id, "live seat map connection requested");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, showtime.id, state)))
}

async fn handle_socket(socket: WebSocket, showtime_id: i64, state: Arc<AppState>) {
    let viewer = match state.hub.connect(showtime_id).await {
        Ok(viewer) => viewer,
        Err(e) => {
            warn!(showtime_id, "could not register live viewer: {:?}", e);
            return;
        }
    };
    let viewer_id = viewer.id;

    pump(socket, viewer).await;

    state.hub.disconnect(showtime_id, viewer_id).await;
    debug!(showtime_id, viewer = %viewer_id, "live connection closed");
}

/// Forwards hub updates to the socket until either side goes away.
async fn pump(socket: WebSocket, mut viewer: ViewerHandle) {
    let (mut sender, mut receiver) = socket.split();
    let mut ping = interval(Duration::from_secs(PING_INTERVAL_SECS));
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick fires immediately
    ping.tick().await;

    loop {
        tokio::select! {
            update = viewer.updates.recv() => {
                // None: the hub dropped this viewer as too slow
                let Some(update) = update else { break };
                let json = match serde_json::to_string(update.as_ref()) {
                    Ok(json) => json,
                    Err(e) => {
                        warn!("failed to encode seat map update: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            _ = ping.tick() => {
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!("live socket error: {}", e);
                    break;
                }
            },
        }
    }
}
