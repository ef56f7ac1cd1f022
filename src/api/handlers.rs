use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use chrono::Utc;
use serde_json::{Value, json};

use crate::{
    aggregation::{Bucket, aggregate},
    api::{
        AppState, SharedState,
        types::{AveragesQuery, HistoryQuery, IngestResp, MessageResp, StatusUpdateReq},
    },
    ingest::IngestRequest,
    pm::{DeviceMetadata, DeviceState, DeviceStatus, Reading},
    ranking::{RankEntry, rank},
};

type ApiResult<T> = Result<Json<T>, (StatusCode, String)>;

fn internal(message: &str, err: anyhow::Error) -> (StatusCode, String) {
    tracing::error!("{message}: {err:#}");
    (StatusCode::INTERNAL_SERVER_ERROR, message.to_string())
}

fn not_found(device_id: &str) -> (StatusCode, String) {
    (
        StatusCode::NOT_FOUND,
        format!("device not found: {device_id}"),
    )
}

pub async fn health(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({ "status": "ok", "store": state.store.kind() }))
}

pub async fn ingest(
    State(state): State<SharedState>,
    Json(req): Json<IngestRequest>,
) -> ApiResult<IngestResp> {
    let ingest = req.validate(Utc::now(), state.timezone).map_err(|e| {
        tracing::warn!("rejected reading: {e:#}");
        (StatusCode::BAD_REQUEST, format!("{e:#}"))
    })?;

    let device = state
        .store
        .record_ingest(&ingest)
        .await
        .map_err(|e| internal("failed to record reading", e))?;

    tracing::info!(device_id = %device.device_id, pm2_5 = device.pm2_5, "reading recorded");
    Ok(Json(IngestResp {
        message: "reading recorded".into(),
        data: device,
    }))
}

pub async fn list_devices(State(state): State<SharedState>) -> ApiResult<Vec<DeviceState>> {
    let devices = state
        .store
        .list_devices()
        .await
        .map_err(|e| internal("failed to list devices", e))?;

    Ok(Json(devices))
}

pub async fn get_device(
    State(state): State<SharedState>,
    Path(device_id): Path<String>,
) -> ApiResult<DeviceState> {
    state
        .store
        .get_device(&device_id)
        .await
        .map_err(|e| internal("failed to get device", e))?
        .map(Json)
        .ok_or_else(|| not_found(&device_id))
}

pub async fn update_device(
    State(state): State<SharedState>,
    Path(device_id): Path<String>,
    Json(metadata): Json<DeviceMetadata>,
) -> ApiResult<DeviceState> {
    let device = state
        .store
        .update_metadata(&device_id, &metadata)
        .await
        .map_err(|e| internal("failed to update device", e))?
        .ok_or_else(|| not_found(&device_id))?;

    tracing::info!(%device_id, "device updated");
    Ok(Json(device))
}

pub async fn update_status(
    State(state): State<SharedState>,
    Path(device_id): Path<String>,
    Json(req): Json<StatusUpdateReq>,
) -> ApiResult<MessageResp> {
    let status: DeviceStatus = req
        .status
        .parse()
        .map_err(|e: anyhow::Error| (StatusCode::BAD_REQUEST, format!("{e:#}")))?;

    let found = state
        .store
        .update_status(&device_id, status)
        .await
        .map_err(|e| internal("failed to update status", e))?;
    if !found {
        return Err(not_found(&device_id));
    }

    tracing::info!(%device_id, %status, "device status updated");
    Ok(Json(MessageResp::new(format!(
        "device {device_id} status updated to {status}"
    ))))
}

pub async fn delete_device(
    State(state): State<SharedState>,
    Path(device_id): Path<String>,
) -> ApiResult<MessageResp> {
    let deleted = state
        .store
        .delete_device(&device_id)
        .await
        .map_err(|e| internal("failed to delete device", e))?;
    if !deleted {
        return Err(not_found(&device_id));
    }

    tracing::info!(%device_id, "device deleted");
    Ok(Json(MessageResp::new("device deleted")))
}

pub async fn history(
    State(state): State<SharedState>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<Reading>> {
    let readings = state
        .store
        .history(query.device_id.as_deref(), query.range(), state.timezone)
        .await
        .map_err(|e| internal("failed to fetch history", e))?;

    Ok(Json(readings))
}

pub async fn averages(
    State(state): State<SharedState>,
    Query(query): Query<AveragesQuery>,
) -> ApiResult<Vec<Bucket>> {
    let readings = state
        .store
        .history(query.device_id.as_deref(), query.range(), state.timezone)
        .await
        .map_err(|e| internal("failed to fetch history", e))?;

    Ok(Json(aggregate(
        &readings,
        query.granularity,
        state.timezone,
        query.range(),
    )))
}

pub async fn ranking(State(state): State<SharedState>) -> ApiResult<Vec<RankEntry>> {
    let (devices, reference) =
        tokio::join!(state.store.list_devices(), reference_reading(&state));

    let devices = devices.map_err(|e| internal("failed to list devices", e))?;

    Ok(Json(rank(&devices, reference)))
}

async fn reference_reading(state: &AppState) -> Option<RankEntry> {
    let waqi = state.waqi.as_ref()?;

    match waqi.fetch_reference().await {
        Ok(entry) => Some(entry),
        Err(e) => {
            tracing::warn!("reference reading unavailable, ranking devices only: {e:#}");
            None
        }
    }
}
