/// /devices endpoints: scan, claim, list, detail and toggle
use crate::{
    auth::AuthUser,
    context::AppContext,
    error::{OneLightError, OneLightResult},
    guard::Action,
    models::{Candidate, Device, DeviceStatus, MacAddress},
};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Build device routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/devices", get(list_devices))
        .route("/devices/add", get(scan_devices).post(register_device))
        .route("/devices/:id", get(device_detail).post(toggle_device))
        .route("/devices/:id/status", get(device_status))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceListResponse {
    pub devices: Vec<Device>,
}

#[derive(Debug, Deserialize)]
pub struct ScanQuery {
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ScanResponse {
    pub candidates: Vec<Candidate>,
    pub window_ms: u64,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub ip: String,
    pub mac: String,
    pub model: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ToggleRequest {
    pub on: bool,
}

/// Device plus whether the last contact attempt got through
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceView {
    #[serde(flatten)]
    pub device: Device,
    pub reachable: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub id: i64,
    pub status: DeviceStatus,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Devices owned by the caller
async fn list_devices(
    State(ctx): State<AppContext>,
    user: AuthUser,
) -> OneLightResult<Json<DeviceListResponse>> {
    let devices = ctx.store.list_devices_by_owner(user.user_id).await?;
    Ok(Json(DeviceListResponse { devices }))
}

/// Scan the LAN for plugs nobody has claimed yet
async fn scan_devices(
    State(ctx): State<AppContext>,
    user: AuthUser,
    Query(query): Query<ScanQuery>,
) -> OneLightResult<Json<ScanResponse>> {
    tracing::debug!("scan_devices: user {} scanning", user.user_id);

    let outcome = ctx
        .scanner
        .scan(query.timeout_ms.map(Duration::from_millis))
        .await?;

    // Hide anything already registered under either its mac or its ip
    let mut candidates = Vec::with_capacity(outcome.candidates.len());
    for candidate in outcome.candidates {
        if ctx.store.find_provisioned_by_mac(&candidate.mac).await?.is_some() {
            continue;
        }
        if !ctx.store.find_provisioned_by_ip(&candidate.ip).await?.is_empty() {
            continue;
        }
        candidates.push(candidate);
    }

    let message = if candidates.is_empty() {
        "No candidates found".to_string()
    } else {
        format!("Found {} device(s)", candidates.len())
    };

    Ok(Json(ScanResponse {
        candidates,
        window_ms: outcome.window_ms,
        message,
    }))
}

/// Claim a scanned candidate, then send the caller back to their list
async fn register_device(
    State(ctx): State<AppContext>,
    user: AuthUser,
    Json(req): Json<RegisterRequest>,
) -> OneLightResult<Response> {
    let candidate = Candidate {
        ip: req.ip,
        mac: MacAddress::parse(&req.mac)?,
        model: req.model,
    };

    let device = ctx
        .registrar
        .register(candidate, user.user_id, req.name.as_deref())
        .await?;

    Ok((
        StatusCode::SEE_OTHER,
        [(header::LOCATION, "/devices")],
        Json(device),
    )
        .into_response())
}

/// Detail page data; an unreachable plug still renders its stored record
async fn device_detail(
    State(ctx): State<AppContext>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> OneLightResult<Json<DeviceView>> {
    let target = ctx.guard.authorize(user.user_id, id, Action::View).await?;

    let refreshed = ctx.controller.refresh_status(&target).await;
    match refreshed {
        Ok(device) => Ok(Json(DeviceView {
            device,
            reachable: true,
        })),
        Err(OneLightError::DeviceUnreachable(_)) => {
            let device = ctx
                .store
                .get_device(id)
                .await?
                .unwrap_or_else(|| target.into_device());
            Ok(Json(DeviceView {
                device,
                reachable: false,
            }))
        }
        Err(e) => Err(e),
    }
}

/// Switch the relay on or off
async fn toggle_device(
    State(ctx): State<AppContext>,
    user: AuthUser,
    Path(id): Path<i64>,
    Json(req): Json<ToggleRequest>,
) -> OneLightResult<Json<DeviceView>> {
    let target = ctx.guard.authorize(user.user_id, id, Action::Control).await?;
    let device = ctx.controller.toggle(&target, req.on).await?;

    Ok(Json(DeviceView {
        device,
        reachable: true,
    }))
}

/// Fresh status read; failures are reported as errors
async fn device_status(
    State(ctx): State<AppContext>,
    user: AuthUser,
    Path(id): Path<i64>,
) -> OneLightResult<Json<StatusResponse>> {
    let target = ctx.guard.authorize(user.user_id, id, Action::ReadStatus).await?;
    let device = ctx.controller.refresh_status(&target).await?;

    Ok(Json(StatusResponse {
        id: device.id,
        status: device.status,
        last_seen: device.last_seen,
    }))
}
