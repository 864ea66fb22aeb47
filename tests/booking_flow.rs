mod common;

use axum::http::{Method, StatusCode};
use serde_json::json;
use std::time::Duration;

use cinema_booking::ledger::SeatLedger;
use cinema_booking::live::UpdateKind;
use cinema_booking::middleware::{create_token, Principal, PAYMENT_SECRET_HEADER};
use cinema_booking::models::{OrderStatus, SeatStatus};
use common::{seat, SECRET, SHOWTIME};

fn token(user_id: i64) -> String {
    create_token(Principal::User(user_id), SECRET).unwrap()
}

fn path(action: &str) -> String {
    format!("/showtimes/{SHOWTIME}/seats/{action}")
}

fn buyer() -> serde_json::Value {
    json!({ "name": "Thu Ha", "email": "thuha@example.com", "phone": "0912345678" })
}

#[tokio::test]
async fn banner_and_health() {
    let app = common::app(&[]);
    let (status, _) = app.call(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn couple_hold_then_rival_then_purchase() {
    let app = common::app(&[]);
    let u1 = token(1);
    let u2 = token(2);

    // E1 and E2 are a couple pair; naming one holds both
    let (status, body) = app.post(&path("hold"), json!({ "seat_ids": [41] }), Some(&u1)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["held_seat_ids"], json!([41, 42]));
    assert_eq!(body["holder"], "user:1");

    let (_, map) = app.get(&format!("/showtimes/{SHOWTIME}/seats")).await;
    let (e1, e2) = (seat(&map, "E1"), seat(&map, "E2"));
    assert_eq!(e1["status"], "HELD");
    assert_eq!(e1["holder"], "user:1");
    assert_eq!(e1["holder"], e2["holder"]);
    assert_eq!(e1["expiresAt"], e2["expiresAt"]);
    assert_eq!(e1["coupleId"], 42);

    let (status, body) = app.post(&path("hold"), json!({ "seat_ids": [41] }), Some(&u2)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "SEAT_UNAVAILABLE");

    let (status, body) = app
        .post(
            &path("purchase"),
            json!({
                "seat_ids": [41, 42],
                "holder": "user:1",
                "payment_method": "ONLINE",
                "buyer": buyer(),
            }),
            Some(&u1),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["tickets"].as_array().unwrap().len(), 2);
    // 75_000 base at 110% for each couple seat
    assert_eq!(body["order"]["total_amount"], 165_000);
    assert_eq!(body["order"]["status"], "PENDING");

    let (_, map) = app.get(&format!("/showtimes/{SHOWTIME}/seats")).await;
    assert_eq!(seat(&map, "E1")["status"], "SOLD");
    assert_eq!(seat(&map, "E2")["status"], "SOLD");
    assert_eq!(seat(&map, "E1")["holder"], serde_json::Value::Null);
}

#[tokio::test]
async fn guests_keep_their_session() {
    let app = common::app(&[]);
    let session = uuid::Uuid::new_v4();

    let (status, body) = app
        .post(&path("hold"), json!({ "seat_ids": [5], "guest_session": session }), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    let holder = format!("guest:{session}");
    assert_eq!(body["holder"], holder);

    let (status, body) = app.post(&path("release"), json!({ "seat_ids": [5], "holder": holder }), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"], 1);

    // a retried release is still a success
    let (status, body) = app.post(&path("release"), json!({ "seat_ids": [5], "holder": holder }), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["released"], 0);
}

#[tokio::test]
async fn release_by_stranger_is_rejected() {
    let app = common::app(&[]);
    let (_, body) = app.post(&path("hold"), json!({ "seat_ids": [7] }), None).await;
    let owner = body["holder"].as_str().unwrap().to_string();

    let stranger = format!("guest:{}", uuid::Uuid::new_v4());
    let (status, body) = app.post(&path("release"), json!({ "seat_ids": [7], "holder": stranger }), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "NOT_HELD_BY_CALLER");
    assert_eq!(body["seat_id"], 7);

    // presenting someone else's user token without their credentials
    let (status, _) = app.post(&path("release"), json!({ "seat_ids": [7], "holder": "user:1" }), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let seat = app.ledger_seat(7).await;
    assert_eq!(seat.state.holder.map(|h| h.to_string()), Some(owner));
}

#[tokio::test]
async fn bad_requests_are_rejected_with_codes() {
    let app = common::app(&[]);

    let (status, body) = app.post("/showtimes/NOPE/seats/hold", json!({ "seat_ids": [1] }), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "SHOWTIME_NOT_FOUND");

    let (status, body) = app.post(&path("hold"), json!({ "seat_ids": [] }), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "EMPTY_SELECTION");

    let (status, body) = app.post(&path("hold"), json!({ "seat_ids": [1, 4040] }), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["seat_id"], 4040);

    let (status, _) = app
        .post(&path("release"), json!({ "seat_ids": [1], "holder": "nobody" }), None)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .call(
            Method::POST,
            &path("hold"),
            Some(json!({ "seat_ids": [1] })),
            Some("not-a-jwt"),
        )
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn purchase_without_hold_is_gone() {
    let app = common::app(&[]);
    let u1 = token(1);
    let (status, body) = app
        .post(
            &path("purchase"),
            json!({ "seat_ids": [3], "holder": "user:1", "payment_method": "CASH", "buyer": buyer() }),
            Some(&u1),
        )
        .await;
    assert_eq!(status, StatusCode::GONE);
    assert_eq!(body["code"], "HOLD_EXPIRED_OR_INVALID");
    assert_eq!(app.ledger_seat(3).await.state.status, SeatStatus::Available);
}

#[tokio::test]
async fn failed_order_insert_sells_nothing() {
    let app = common::app(&[]);
    let u1 = token(1);
    app.post(&path("hold"), json!({ "seat_ids": [8, 9] }), Some(&u1)).await;
    app.ledger.fail_order_inserts(true);

    let (status, body) = app
        .post(
            &path("purchase"),
            json!({ "seat_ids": [8, 9], "holder": "user:1", "payment_method": "CARD", "buyer": buyer() }),
            Some(&u1),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "STORAGE_ERROR");
    for seat_id in [8, 9] {
        assert_eq!(app.ledger_seat(seat_id).await.state.status, SeatStatus::Held);
    }
}

#[tokio::test]
async fn failed_payment_returns_seats_to_sale() {
    let app = common::app(&[]);
    let u1 = token(1);
    app.post(&path("hold"), json!({ "seat_ids": [21, 22] }), Some(&u1)).await;
    let (_, body) = app
        .post(
            &path("purchase"),
            json!({ "seat_ids": [21, 22], "holder": "user:1", "payment_method": "CARD", "buyer": buyer() }),
            Some(&u1),
        )
        .await;
    let order_id = body["order"]["id"].as_str().unwrap().to_string();

    let (status, body) = app.report_payment(&order_id, "FAILED").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "FAILED");
    assert_eq!(body["changed"], true);

    for seat_id in [21, 22] {
        assert_eq!(app.ledger_seat(seat_id).await.state.status, SeatStatus::Available);
    }

    let (status, body) = app.report_payment(&order_id, "PAID").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "ORDER_ALREADY_SETTLED");
}

#[tokio::test]
async fn payment_reports_require_provider_secret_or_staff() {
    let app = common::app(&[]);
    let u1 = token(1);
    app.post(&path("hold"), json!({ "seat_ids": [25] }), Some(&u1)).await;
    let (_, body) = app
        .post(
            &path("purchase"),
            json!({ "seat_ids": [25], "holder": "user:1", "payment_method": "ONLINE", "buyer": buyer() }),
            Some(&u1),
        )
        .await;
    let uri = format!("/orders/{}/payment", body["order"]["id"].as_str().unwrap());
    let paid = json!({ "status": "PAID" });

    // the buyer cannot settle their own order
    let (status, _) = app.post(&uri, paid.clone(), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let (status, _) = app.post(&uri, paid.clone(), Some(&u1)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, _) = app
        .call_with_headers(Method::POST, &uri, Some(paid.clone()), None, &[(PAYMENT_SECRET_HEADER, "guess")])
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let order_id = uuid::Uuid::parse_str(uri.split('/').nth(2).unwrap()).unwrap();
    assert_eq!(app.state.ledger.order(order_id).await.unwrap().unwrap().status, OrderStatus::Pending);

    let staff = create_token(Principal::Staff(9), SECRET).unwrap();
    let (status, body) = app.post(&uri, paid, Some(&staff)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "PAID");
}

#[tokio::test]
async fn short_hold_is_swept_and_viewers_see_it() {
    let app = common::app(&[("BOOKING__HOLD_TTL_SECS", "1")]);
    let mut viewer = app.state.hub.connect(app.showtime_id).await.unwrap();
    viewer.updates.recv().await.unwrap();

    // B5
    let (status, _) = app.post(&path("hold"), json!({ "seat_ids": [15] }), Some(&token(3))).await;
    assert_eq!(status, StatusCode::OK);
    let held = viewer.updates.recv().await.unwrap();
    assert_eq!(held.rows["B"][0].status, SeatStatus::Held);

    tokio::time::sleep(Duration::from_millis(1_100)).await;
    let report = app.state.sweeper.sweep().await;
    assert_eq!(report.reclaimed, 1);

    let freed = viewer.updates.recv().await.unwrap();
    assert_eq!(freed.kind, UpdateKind::Delta);
    assert_eq!(freed.rows["B"][0].label, "B5");
    assert_eq!(freed.rows["B"][0].status, SeatStatus::Available);
}

#[tokio::test]
async fn seat_map_read_reclaims_lapsed_holds() {
    let app = common::app(&[("BOOKING__HOLD_TTL_SECS", "1")]);
    app.post(&path("hold"), json!({ "seat_ids": [30] }), None).await;
    tokio::time::sleep(Duration::from_millis(1_100)).await;

    let (status, map) = app.get(&format!("/showtimes/{SHOWTIME}/seats")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(seat(&map, "C10")["status"], "AVAILABLE");
    assert_eq!(app.ledger_seat(30).await.state.status, SeatStatus::Available);
}

#[tokio::test]
async fn concurrent_overlapping_holds_over_http() {
    let app = std::sync::Arc::new(common::app(&[]));
    let mut tasks = Vec::new();
    for user in 1..=6 {
        let app = app.clone();
        tasks.push(tokio::spawn(async move {
            let seats = json!({ "seat_ids": [33, 33 + user] });
            app.post(&path("hold"), seats, Some(&token(user))).await.0
        }));
    }

    let mut ok = 0;
    for task in tasks {
        match task.await.unwrap() {
            StatusCode::OK => ok += 1,
            StatusCode::CONFLICT => {}
            other => panic!("unexpected status {other}"),
        }
    }
    assert_eq!(ok, 1);

    let mut held = 0;
    for seat_id in 34..=39 {
        if app.ledger_seat(seat_id).await.state.status == SeatStatus::Held {
            held += 1;
        }
    }
    assert_eq!(held, 1);
    assert_eq!(app.ledger_seat(33).await.state.status, SeatStatus::Held);
}
