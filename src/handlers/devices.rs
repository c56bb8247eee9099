//! Device API handlers
//!
//! Registration is done by merchants with a bearer token. Status queries and
//! heartbeats come from the on-device agent and authenticate with the shared
//! `X-Device-Key`.

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use validator::Validate;

use crate::device::{Device, DeviceStatusResponse, RegisterDeviceRequest};
use crate::error::ApiResult;
use crate::middleware::{require_shared_key, AuthenticatedPrincipal};
use crate::models::ApiResponse;
use crate::state::AppState;

const DEVICE_KEY_HEADER: &str = "X-Device-Key";

pub async fn register_device(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Json(request): Json<RegisterDeviceRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Device>>)> {
    request.validate()?;
    let device = state
        .devices
        .register_device(&principal, request, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(device))))
}

pub async fn deregister_device(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(hardware_id): Path<String>,
) -> ApiResult<StatusCode> {
    state.devices.deregister_device(&principal, &hardware_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn device_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(hardware_id): Path<String>,
) -> ApiResult<Json<ApiResponse<DeviceStatusResponse>>> {
    require_shared_key(&headers, DEVICE_KEY_HEADER, state.device_api_key.as_deref())?;
    let status = state.devices.device_status(&hardware_id).await?;
    Ok(Json(ApiResponse::ok(status)))
}

/// Liveness ping; the response tells the agent which lock state to apply
pub async fn heartbeat(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(hardware_id): Path<String>,
) -> ApiResult<Json<ApiResponse<DeviceStatusResponse>>> {
    require_shared_key(&headers, DEVICE_KEY_HEADER, state.device_api_key.as_deref())?;
    let status = state
        .devices
        .record_heartbeat(&hardware_id, Utc::now())
        .await?;
    Ok(Json(ApiResponse::ok(status)))
}
