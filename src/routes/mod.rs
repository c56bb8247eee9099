//! Route definitions

mod admin;
mod devices;
mod loans;

pub use admin::admin_routes;
pub use devices::device_routes;
pub use loans::loan_routes;

use axum::{routing::get, Router};

use crate::handlers::health_check;
use crate::middleware;
use crate::state::AppState;

/// Full API router with request tracing
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .merge(loan_routes())
        .merge(device_routes())
        .merge(admin_routes())
        .with_state(state)
        .layer(axum::middleware::from_fn(middleware::request_tracing))
}
