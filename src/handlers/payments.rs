//! Payment-gateway bridge

use axum::{body::Bytes, extract::State, http::HeaderMap, Json};
use chrono::Utc;
use validator::Validate;

use crate::auth::Principal;
use crate::error::{ApiError, ApiResult};
use crate::models::ApiResponse;
use crate::payment::{GatewayPaymentNotification, PaymentChannel, PaymentCommand, ReconciliationResult};
use crate::state::AppState;
use crate::webhook::signer;

const SIGNATURE_HEADER: &str = "X-Gateway-Signature";

/// Confirmed payment pushed by the gateway, signed over the raw body
pub async fn gateway_payment(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<ApiResponse<ReconciliationResult>>> {
    let Some(secret) = state.gateway_secret.as_deref().filter(|s| !s.is_empty()) else {
        // Fail-closed: without a secret no callback can be trusted
        tracing::error!("Gateway secret not configured - rejecting callback");
        return Err(ApiError::ServiceUnavailable(
            "gateway callbacks are not configured".to_string(),
        ));
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or_default();
    if !signer::verify(secret, &body, signature) {
        tracing::warn!(target: "security", "Gateway callback with invalid signature");
        return Err(ApiError::Unauthorized("invalid gateway signature".to_string()));
    }

    let notification: GatewayPaymentNotification = serde_json::from_slice(&body)?;
    notification.validate()?;

    let command = PaymentCommand {
        loan_id: notification.loan_id,
        amount: notification.amount,
        reference: Some(notification.reference),
        channel: PaymentChannel::Gateway,
    };
    let result = state
        .reconciler
        .record_payment(&Principal::system(), command, Utc::now())
        .await?;

    Ok(Json(ApiResponse::ok(result)))
}
