#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;

use cinema_booking::config::Config;
use cinema_booking::ledger::{MemorySeatLedger, SeatLedger};
use cinema_booking::middleware::PAYMENT_SECRET_HEADER;
use cinema_booking::models::ShowtimeSeat;
use cinema_booking::{controllers, AppState};

pub const SECRET: &str = "integration-secret";
pub const SHOWTIME: &str = "DEMO-1";
pub const PAYMENT_SECRET: &str = "integration-payment-secret";

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub ledger: MemorySeatLedger,
    pub showtime_id: i64,
}

pub fn config(overrides: &[(&str, &str)]) -> Config {
    let mut env: HashMap<String, String> = HashMap::from([
        ("LEDGER__BACKEND".to_string(), "memory".to_string()),
        ("JWT__SECRET".to_string(), SECRET.to_string()),
        ("PAYMENT__CALLBACK_SECRET".to_string(), PAYMENT_SECRET.to_string()),
    ]);
    for (key, value) in overrides {
        env.insert(key.to_string(), value.to_string());
    }
    let source = config::Environment::default()
        .separator("__")
        .try_parsing(true)
        .source(Some(env));
    Config::from_source(source).unwrap()
}

pub fn app(overrides: &[(&str, &str)]) -> TestApp {
    let ledger = MemorySeatLedger::new();
    let showtime = ledger.seed_demo().unwrap();
    let shared: Arc<dyn SeatLedger> = Arc::new(ledger.clone());
    let state = AppState::with_ledger(config(overrides), shared);

    TestApp {
        router: controllers::app(state.clone()),
        state,
        ledger,
        showtime_id: showtime.id,
    }
}

impl TestApp {
    pub async fn call(&self, method: Method, uri: &str, body: Option<Value>, token: Option<&str>) -> (StatusCode, Value) {
        self.call_with_headers(method, uri, body, token, &[]).await
    }

    pub async fn call_with_headers(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
        headers: &[(&str, &str)],
    ) -> (StatusCode, Value) {
        let mut request = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => request
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => request.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    pub async fn post(&self, path: &str, body: Value, token: Option<&str>) -> (StatusCode, Value) {
        self.call(Method::POST, path, Some(body), token).await
    }

    /// Payment status callback as the provider sends it, with the shared secret.
    pub async fn report_payment(&self, order_id: &str, status: &str) -> (StatusCode, Value) {
        self.call_with_headers(
            Method::POST,
            &format!("/orders/{order_id}/payment"),
            Some(serde_json::json!({ "status": status })),
            None,
            &[(PAYMENT_SECRET_HEADER, PAYMENT_SECRET)],
        )
        .await
    }

    pub async fn ledger_seat(&self, seat_id: i64) -> ShowtimeSeat {
        self.ledger.seat(self.showtime_id, seat_id).await.unwrap()
    }

    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.call(Method::GET, path, None, None).await
    }
}

/// Seat record from a seat map response by label, e.g. "E1".
pub fn seat<'a>(map: &'a Value, label: &str) -> &'a Value {
    let row = &label[..1];
    map["rows"][row]
        .as_array()
        .and_then(|seats| seats.iter().find(|s| s["label"] == label))
        .unwrap_or_else(|| panic!("seat {label} missing from map"))
}
