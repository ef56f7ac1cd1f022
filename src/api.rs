pub mod handlers;
pub mod types;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, patch, post},
};
use chrono_tz::Tz;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::{store::Store, waqi::WaqiClient};

pub struct AppState {
    pub store: Store,
    /// `None` when no WAQI token is configured; the ranking then covers
    /// devices only.
    pub waqi: Option<WaqiClient>,
    pub timezone: Tz,
}

pub type SharedState = Arc<AppState>;

pub fn build_router(state: SharedState) -> Router {
    Router::new()
        .route("/healthz", get(handlers::health))
        .route("/api/readings", post(handlers::ingest))
        .route("/api/devices", get(handlers::list_devices))
        .route(
            "/api/devices/{device_id}",
            get(handlers::get_device)
                .patch(handlers::update_device)
                .delete(handlers::delete_device),
        )
        .route("/api/devices/{device_id}/status", patch(handlers::update_status))
        .route("/api/history", get(handlers::history))
        .route("/api/history/averages", get(handlers::averages))
        .route("/api/ranking", get(handlers::ranking))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let request_id = req
                    .headers()
                    .get("x-request-id")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("-");
                tracing::info_span!(
                    "http",
                    %request_id,
                    method = %req.method(),
                    uri = %req.uri(),
                )
            }),
        )
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
}
