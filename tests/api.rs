use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Json, Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode},
    routing::get,
};
use chrono_tz::Tz;
use pm_monitor::{
    api::{AppState, build_router},
    pm::Reading,
    store::{MemoryStore, Store},
    waqi::WaqiClient,
};
use serde_json::{Value, json};
use tokio::{net::TcpListener, task::JoinHandle};
use tower::util::ServiceExt; // for `oneshot`

fn app(store: MemoryStore, waqi: Option<WaqiClient>) -> Router {
    build_router(Arc::new(AppState {
        store: Store::Memory(store),
        waqi,
        timezone: Tz::UTC,
    }))
}

async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let resp = app.clone().oneshot(request).await.unwrap();
    let status = resp.status();
    let bytes = to_bytes(resp.into_body(), 1024 * 1024).await.unwrap();
    let value = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));

    (status, value)
}

async fn ingest(app: &Router, body: Value) {
    let (status, resp) = call(app, "POST", "/api/readings", Some(body)).await;
    assert_eq!(status, StatusCode::OK, "{resp}");
}

async fn spawn_feed(status: StatusCode, body: Value, delay: Duration) -> (String, JoinHandle<()>) {
    let router = Router::new().route(
        "/feed/here/",
        get(move || {
            let body = body.clone();
            async move {
                tokio::time::sleep(delay).await;
                (status, Json(body))
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{addr}/feed/here/"), handle)
}

fn waqi_client(url: &str, timeout: Duration) -> WaqiClient {
    WaqiClient::new(url, "test-token", timeout).unwrap()
}

fn ok_feed(aqi: f64) -> Value {
    json!({
        "status": "ok",
        "data": {
            "aqi": aqi,
            "city": { "name": "Chiang Mai" },
            "time": { "iso": "2024-01-01T17:00:00+07:00" }
        }
    })
}

fn ranked(body: &Value) -> Vec<(String, f64)> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|e| {
            (
                e["source"].as_str().unwrap().to_string(),
                e["value"].as_f64().unwrap(),
            )
        })
        .collect()
}

async fn app_with_device_a(waqi: Option<WaqiClient>) -> Router {
    let app = app(MemoryStore::new(), waqi);
    ingest(
        &app,
        json!({ "deviceId": "A", "pm2_5": 5.0, "timestamp": "2024-01-01T10:00:00Z", "location": "Gate" }),
    )
    .await;
    app
}

#[tokio::test]
async fn healthz_ok() {
    let app = app(MemoryStore::new(), None);
    let (status, body) = call(&app, "GET", "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["store"], "memory");
}

#[tokio::test]
async fn ingest_upserts_device_and_appends_history() {
    let app = app(MemoryStore::new(), None);

    ingest(
        &app,
        json!({
            "pmId": "PM-01", "PM1": 4, "PM10": 20, "PM2_5": 11.5,
            "timestamp": "2024-01-01T10:00:00Z",
            "address": "12 Main Rd", "location": "Gate", "ip": "10.0.0.9",
            "status": "active"
        }),
    )
    .await;
    ingest(
        &app,
        json!({ "pmId": "PM-01", "PM2_5": 13, "timestamp": "2024-01-01T10:05:00Z" }),
    )
    .await;

    let (status, device) = call(&app, "GET", "/api/devices/PM-01", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(device["deviceId"], "PM-01");
    assert_eq!(device["pm2_5"], 13.0);
    assert_eq!(device["pm1"], 0.0);
    assert_eq!(device["timestamp"], "2024-01-01T10:05:00Z");
    assert_eq!(device["status"], "active");
    assert_eq!(device["location"], "Gate");
    assert_eq!(device["ip"], "10.0.0.9");

    let (status, history) = call(&app, "GET", "/api/history?deviceId=PM-01", None).await;
    assert_eq!(status, StatusCode::OK);
    let history = history.as_array().unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1]["pm2_5"], 13.0);
    assert_eq!(history[1]["location"], "Gate");

    let (status, devices) = call(&app, "GET", "/api/devices", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(devices.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn ingest_rejects_invalid_readings() {
    let app = app(MemoryStore::new(), None);

    for body in [
        json!({ "PM2_5": 10 }),
        json!({ "pmId": "" }),
        json!({ "pmId": "PM-01", "PM2_5": -3 }),
        json!({ "pmId": "PM-01", "timestamp": "last tuesday" }),
        json!({ "pmId": "PM-01", "status": "sleeping" }),
    ] {
        let (status, _) = call(&app, "POST", "/api/readings", Some(body.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
    }

    let (_, devices) = call(&app, "GET", "/api/devices", None).await;
    assert!(devices.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn ingest_normalizes_naive_timestamps() {
    let app = app(MemoryStore::new(), None);
    ingest(&app, json!({ "pmId": "PM-05", "timestamp": "2024-01-01 10:05" })).await;

    let (_, device) = call(&app, "GET", "/api/devices/PM-05", None).await;
    assert_eq!(device["timestamp"], "2024-01-01T10:05:00Z");

    let (_, history) = call(&app, "GET", "/api/history?deviceId=PM-05", None).await;
    assert_eq!(history[0]["timestamp"], "2024-01-01T10:05:00Z");
}

#[tokio::test]
async fn status_toggle() {
    let app = app(MemoryStore::new(), None);
    ingest(&app, json!({ "pmId": "PM-02" })).await;

    let (_, device) = call(&app, "GET", "/api/devices/PM-02", None).await;
    assert_eq!(device["status"], "inactive");

    let (status, _) = call(
        &app,
        "PATCH",
        "/api/devices/PM-02/status",
        Some(json!({ "status": "paused" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        "PATCH",
        "/api/devices/nope/status",
        Some(json!({ "status": "active" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = call(
        &app,
        "PATCH",
        "/api/devices/PM-02/status",
        Some(json!({ "status": "active" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"], "device PM-02 status updated to active");

    let (_, device) = call(&app, "GET", "/api/devices/PM-02", None).await;
    assert_eq!(device["status"], "active");
}

#[tokio::test]
async fn metadata_update_and_delete() {
    let app = app(MemoryStore::new(), None);
    ingest(&app, json!({ "pmId": "PM-03", "location": "Roof" })).await;

    let (status, device) = call(
        &app,
        "PATCH",
        "/api/devices/PM-03",
        Some(json!({ "address": "Block C", "ip": "192.168.1.30" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(device["address"], "Block C");
    assert_eq!(device["ip"], "192.168.1.30");
    assert_eq!(device["location"], "Roof");

    let (status, _) = call(&app, "PATCH", "/api/devices/ghost", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, "DELETE", "/api/devices/PM-03", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "DELETE", "/api/devices/PM-03", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = call(&app, "GET", "/api/devices/PM-03", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, history) = call(&app, "GET", "/api/history?deviceId=PM-03", None).await;
    assert_eq!(history.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn history_range_filter() {
    let store = MemoryStore::new();
    store
        .extend_history(
            [
                ("2024-01-01T09:00:00Z", 1.0),
                ("2024-01-01T10:00:00Z", 2.0),
                ("2024-01-01T11:00:00Z", 3.0),
                ("broken", 4.0),
            ]
            .map(|(ts, v)| Reading {
                device_id: "PM-04".into(),
                pm1: v,
                pm10: v,
                pm2_5: v,
                timestamp: ts.into(),
                location: String::new(),
            }),
        )
        .await;
    let app = app(store, None);

    let (_, all) = call(&app, "GET", "/api/history", None).await;
    assert_eq!(all.as_array().unwrap().len(), 4);

    let (status, window) = call(
        &app,
        "GET",
        "/api/history?deviceId=PM-04&from=2024-01-01T10:00:00Z&to=2024-01-01T11:00:00Z",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let values: Vec<f64> = window
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["pm2_5"].as_f64().unwrap())
        .collect();
    assert_eq!(values, [2.0, 3.0]);

    let (_, other) = call(&app, "GET", "/api/history?deviceId=PM-99", None).await;
    assert!(other.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn hourly_and_daily_averages() {
    let app = app(MemoryStore::new(), None);
    for (ts, v) in [
        ("2024-01-01T10:15:00Z", 10.0),
        ("2024-01-01T10:45:00Z", 20.0),
        ("2024-01-02T08:00:00Z", 40.0),
    ] {
        ingest(&app, json!({ "pmId": "A", "PM2_5": v, "timestamp": ts })).await;
    }
    ingest(&app, json!({ "pmId": "B", "PM2_5": 99, "timestamp": "2024-01-01T10:30:00Z" })).await;

    let (status, hourly) = call(
        &app,
        "GET",
        "/api/history/averages?deviceId=A&granularity=hour",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let hourly = hourly.as_array().unwrap();
    assert_eq!(hourly.len(), 2);
    assert_eq!(hourly[0]["bucketLabel"], "2024-01-01 10:00");
    assert_eq!(hourly[0]["averagePm25"], 15.0);
    assert_eq!(hourly[0]["count"], 2);
    assert_eq!(hourly[1]["bucketLabel"], "2024-01-02 08:00");

    let (_, daily) = call(
        &app,
        "GET",
        "/api/history/averages?deviceId=A&granularity=day",
        None,
    )
    .await;
    let daily = daily.as_array().unwrap();
    assert_eq!(daily.len(), 2);
    assert_eq!(daily[0]["bucketLabel"], "2024-01-01");
    assert_eq!(daily[0]["averagePm25"], 15.0);
    assert_eq!(daily[1]["bucketLabel"], "2024-01-02");
    assert_eq!(daily[1]["averagePm25"], 40.0);

    let (_, all_devices) = call(&app, "GET", "/api/history/averages", None).await;
    let first = &all_devices.as_array().unwrap()[0];
    assert_eq!(first["count"], 3);
    assert_eq!(first["averagePm25"], 43.0);

    let (_, empty) = call(&app, "GET", "/api/history/averages?deviceId=nobody", None).await;
    assert!(empty.as_array().unwrap().is_empty());

    let (status, _) = call(&app, "GET", "/api/history/averages?granularity=week", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn ranking_merges_reference_reading() {
    let (url, handle) = spawn_feed(StatusCode::OK, ok_feed(50.0), Duration::ZERO).await;
    let app = app_with_device_a(Some(waqi_client(&url, Duration::from_secs(5)))).await;

    let (status, body) = call(&app, "GET", "/api/ranking", None).await;
    handle.abort();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ranked(&body), [("WAQI".to_string(), 50.0), ("A".to_string(), 5.0)]);
    assert_eq!(body[0]["location"], "Chiang Mai");
    assert_eq!(body[1]["location"], "Gate");
}

#[tokio::test]
async fn ranking_survives_feed_error() {
    let (url, handle) = spawn_feed(
        StatusCode::INTERNAL_SERVER_ERROR,
        json!({ "status": "error" }),
        Duration::ZERO,
    )
    .await;
    let app = app_with_device_a(Some(waqi_client(&url, Duration::from_secs(5)))).await;

    let (status, body) = call(&app, "GET", "/api/ranking", None).await;
    handle.abort();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ranked(&body), [("A".to_string(), 5.0)]);
}

#[tokio::test]
async fn ranking_survives_feed_rejection() {
    let (url, handle) = spawn_feed(
        StatusCode::OK,
        json!({ "status": "error", "data": "Invalid key" }),
        Duration::ZERO,
    )
    .await;
    let app = app_with_device_a(Some(waqi_client(&url, Duration::from_secs(5)))).await;

    let (_, body) = call(&app, "GET", "/api/ranking", None).await;
    handle.abort();

    assert_eq!(ranked(&body), [("A".to_string(), 5.0)]);
}

#[tokio::test]
async fn ranking_does_not_wait_on_slow_feed() {
    let (url, handle) =
        spawn_feed(StatusCode::OK, ok_feed(50.0), Duration::from_secs(5)).await;
    let app = app_with_device_a(Some(waqi_client(&url, Duration::from_millis(200)))).await;

    let started = std::time::Instant::now();
    let (status, body) = call(&app, "GET", "/api/ranking", None).await;
    handle.abort();

    assert_eq!(status, StatusCode::OK);
    assert_eq!(ranked(&body), [("A".to_string(), 5.0)]);
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn ranking_survives_unreachable_feed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let url = format!("http://{addr}/feed/here/");
    let app = app_with_device_a(Some(waqi_client(&url, Duration::from_secs(2)))).await;

    let (status, body) = call(&app, "GET", "/api/ranking", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ranked(&body), [("A".to_string(), 5.0)]);
}

#[tokio::test]
async fn ranking_without_reference_configured() {
    let app = app_with_device_a(None).await;
    ingest(&app, json!({ "pmId": "B", "PM2_5": 12.6 })).await;

    let (_, body) = call(&app, "GET", "/api/ranking", None).await;
    assert_eq!(
        ranked(&body),
        [("B".to_string(), 13.0), ("A".to_string(), 5.0)]
    );
}
