//! Loan and payment route definitions

use axum::{
    routing::{get, post},
    Router,
};

use crate::handlers::*;
use crate::state::AppState;

pub fn loan_routes() -> Router<AppState> {
    Router::new()
        .route("/api/loans", post(create_loan).get(list_loans))
        .route("/api/loans/:id", get(get_loan))
        .route("/api/loans/:id/payments", post(record_payment))
        .route("/api/payments/gateway", post(gateway_payment))
}
