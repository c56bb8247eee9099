//! Device route definitions

use axum::{
    routing::{delete, get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn device_routes() -> Router<AppState> {
    Router::new()
        .route("/api/devices", post(register_device))
        .route("/api/devices/:hardware_id", delete(deregister_device))
        .route("/api/devices/:hardware_id/status", get(device_status))
        .route("/api/devices/:hardware_id/heartbeat", post(heartbeat))
}
