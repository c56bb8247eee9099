//! Loan API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use uuid::Uuid;
use validator::Validate;

use crate::error::ApiResult;
use crate::loan::{CreateLoanRequest, ListLoansQuery, Loan, LoanStateView};
use crate::middleware::AuthenticatedPrincipal;
use crate::models::ApiResponse;
use crate::payment::{PaymentChannel, PaymentCommand, ReconciliationResult, RecordPaymentRequest};
use crate::state::AppState;

/// Create a PENDING loan with its schedule
pub async fn create_loan(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Json(request): Json<CreateLoanRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<Loan>>)> {
    let loan = state
        .loan_service
        .create_loan(&principal, request, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(loan))))
}

/// List the caller's loans
pub async fn list_loans(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Query(query): Query<ListLoansQuery>,
) -> ApiResult<Json<ApiResponse<Vec<Loan>>>> {
    let loans = state.loan_service.list_loans(&principal, &query).await?;
    Ok(Json(ApiResponse::ok(loans)))
}

/// Loan with schedule and device status
pub async fn get_loan(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(loan_id): Path<Uuid>,
) -> ApiResult<Json<ApiResponse<LoanStateView>>> {
    let view = state.loan_service.get_loan_state(&principal, loan_id).await?;
    Ok(Json(ApiResponse::ok(view)))
}

/// Merchant-confirmed cash collection
pub async fn record_payment(
    State(state): State<AppState>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Path(loan_id): Path<Uuid>,
    Json(request): Json<RecordPaymentRequest>,
) -> ApiResult<(StatusCode, Json<ApiResponse<ReconciliationResult>>)> {
    request.validate()?;

    let command = PaymentCommand {
        loan_id,
        amount: request.amount,
        reference: request.reference,
        channel: PaymentChannel::Cash,
    };
    let result = state
        .reconciler
        .record_payment(&principal, command, Utc::now())
        .await?;

    let status = if result.duplicate {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(ApiResponse::ok(result))))
}
