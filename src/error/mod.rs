//! Error types for the lending engine
//!
//! `LendingError` is the domain taxonomy returned by every service. `ApiError`
//! maps it (and the few transport-level failures) onto HTTP status codes and a
//! JSON error body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

/// Domain errors raised by the loan lifecycle components
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LendingError {
    #[error("Invalid schedule input: {0}")]
    InvalidScheduleInput(String),

    #[error("Tenant mismatch: caller is not allowed to access loan {0}")]
    TenantMismatch(Uuid),

    #[error("Loan not found: {0}")]
    LoanNotFound(Uuid),

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Loan {0} is already completed")]
    LoanAlreadyCompleted(Uuid),

    #[error("Transition guard failed: {0}")]
    TransitionGuardFailed(String),

    #[error("Webhook delivery exhausted for event {event_id} after {attempts} attempts")]
    WebhookDeliveryExhausted { event_id: i64, attempts: i32 },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for LendingError {
    fn from(err: sqlx::Error) -> Self {
        LendingError::Storage(err.to_string())
    }
}

impl From<validator::ValidationErrors> for LendingError {
    fn from(err: validator::ValidationErrors) -> Self {
        LendingError::Validation(err.to_string())
    }
}

impl LendingError {
    /// Stable machine-readable code for API clients and partner tooling
    pub fn code(&self) -> &'static str {
        match self {
            LendingError::InvalidScheduleInput(_) => "INVALID_SCHEDULE_INPUT",
            LendingError::TenantMismatch(_) => "TENANT_MISMATCH",
            LendingError::LoanNotFound(_) => "LOAN_NOT_FOUND",
            LendingError::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            LendingError::LoanAlreadyCompleted(_) => "LOAN_ALREADY_COMPLETED",
            LendingError::TransitionGuardFailed(_) => "TRANSITION_GUARD_FAILED",
            LendingError::WebhookDeliveryExhausted { .. } => "WEBHOOK_DELIVERY_EXHAUSTED",
            LendingError::Validation(_) => "VALIDATION_ERROR",
            LendingError::Conflict(_) => "CONFLICT",
            LendingError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

/// Failure of an HTTP request: a domain error or a transport-level rejection
#[derive(Error, Debug)]
pub enum ApiError {
    #[error(transparent)]
    Lending(#[from] LendingError),

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A required secret is not configured, so the endpoint refuses everyone
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Serialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
}

impl ApiError {
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Lending(e) => e.code(),
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Lending(e) => match e {
                LendingError::InvalidScheduleInput(_) | LendingError::Validation(_) => {
                    StatusCode::BAD_REQUEST
                }
                LendingError::TenantMismatch(_) => StatusCode::FORBIDDEN,
                LendingError::LoanNotFound(_) | LendingError::DeviceNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                LendingError::LoanAlreadyCompleted(_) | LendingError::Conflict(_) => {
                    StatusCode::CONFLICT
                }
                LendingError::TransitionGuardFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
                LendingError::WebhookDeliveryExhausted { .. } | LendingError::Storage(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        // Storage details stay in the log
        let message = match &self {
            ApiError::Lending(LendingError::Storage(_)) => "internal storage failure".to_string(),
            other => other.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, code, "Request failed");
        } else {
            tracing::debug!(error = %self, code, "Request rejected");
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code: code.to_string(),
                message,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::Lending(err.into())
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::BadRequest(format!("Invalid JSON: {}", err))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
