mod common;

use futures::StreamExt;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite, MaybeTlsStream, WebSocketStream};

use common::{TestApp, SHOWTIME};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Serves the full router on an ephemeral port and returns its address.
async fn serve(app: &TestApp) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}

/// Next seat map update, skipping control frames.
async fn next_update(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("no frame within 5s")
            .expect("socket closed")
            .unwrap();
        if let tungstenite::Message::Text(text) = frame {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

async fn wait_for_viewers(app: &TestApp, expected: usize) {
    for _ in 0..100 {
        if app.state.hub.viewer_count(app.showtime_id).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("viewer count never reached {expected}");
}

#[tokio::test]
async fn viewer_gets_snapshot_then_deltas_and_is_removed_on_close() {
    let app = common::app(&[]);
    let addr = serve(&app).await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/showtimes/{SHOWTIME}/live"))
        .await
        .unwrap();

    let snapshot = next_update(&mut socket).await;
    assert_eq!(snapshot["type"], "snapshot");
    assert_eq!(snapshot["showtime_id"], app.showtime_id);
    assert_eq!(snapshot["rows"].as_object().unwrap().len(), 5);
    wait_for_viewers(&app, 1).await;

    // E3 pulls in E4
    let path = format!("/showtimes/{SHOWTIME}/seats/hold");
    let (status, _) = app.post(&path, json!({ "seat_ids": [43] }), None).await;
    assert_eq!(status, axum::http::StatusCode::OK);

    let delta = next_update(&mut socket).await;
    assert_eq!(delta["type"], "delta");
    let row_e = delta["rows"]["E"].as_array().unwrap();
    assert_eq!(row_e.len(), 2);
    assert!(row_e.iter().all(|seat| seat["status"] == "HELD"));
    assert_eq!(delta["rows"].as_object().unwrap().len(), 1);

    socket.close(None).await.unwrap();
    wait_for_viewers(&app, 0).await;
    assert_eq!(app.state.hub.active_showtimes(), 0);
}

#[tokio::test]
async fn dropped_connection_is_deregistered() {
    let app = common::app(&[]);
    let addr = serve(&app).await;

    let (mut socket, _) = connect_async(format!("ws://{addr}/showtimes/{SHOWTIME}/live"))
        .await
        .unwrap();
    next_update(&mut socket).await;
    wait_for_viewers(&app, 1).await;

    // no close handshake, the TCP stream just goes away
    drop(socket);
    wait_for_viewers(&app, 0).await;
}

#[tokio::test]
async fn unknown_showtime_is_refused_before_upgrade() {
    let app = common::app(&[]);
    let addr = serve(&app).await;

    let err = connect_async(format!("ws://{addr}/showtimes/NOPE/live"))
        .await
        .unwrap_err();
    match err {
        tungstenite::Error::Http(response) => assert_eq!(response.status(), 404),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(app.state.hub.active_showtimes(), 0);
}
