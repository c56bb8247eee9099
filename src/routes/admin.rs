//! Operator route definitions

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/api/partners/:id/webhook", put(register_partner_webhook))
        .route("/api/admin/enforcement/run", post(run_enforcement))
        .route("/api/admin/webhooks/failed", get(failed_webhooks))
        .route("/api/admin/webhooks/:id/retry", post(retry_webhook))
}
