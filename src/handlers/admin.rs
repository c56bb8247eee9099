//! Operator endpoints: partner registration, manual sweeps, failed webhooks

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use uuid::Uuid;
use validator::Validate;

use crate::enforcement::SweepReport;
use crate::error::{ApiError, ApiResult};
use crate::middleware::AdminPrincipal;
use crate::models::ApiResponse;
use crate::state::AppState;
use crate::webhook::{PartnerWebhook, RegisterWebhookRequest, WebhookEvent};

#[derive(Debug, Deserialize)]
pub struct FailedWebhooksQuery {
    pub limit: Option<i64>,
}

/// Register or replace a financing partner's callback
pub async fn register_partner_webhook(
    State(state): State<AppState>,
    AdminPrincipal(admin): AdminPrincipal,
    Path(partner_id): Path<Uuid>,
    Json(request): Json<RegisterWebhookRequest>,
) -> ApiResult<Json<ApiResponse<PartnerWebhook>>> {
    request.validate()?;

    let webhook = PartnerWebhook {
        partner_id,
        url: request.url,
        secret: request.secret,
        updated_at: Utc::now(),
    };
    state.store.upsert_partner_webhook(&webhook).await?;

    tracing::info!(partner_id = %partner_id, url = %webhook.url, subject = %admin.subject, "Partner webhook registered");
    Ok(Json(ApiResponse::ok(webhook)))
}

/// Run an enforcement sweep now
pub async fn run_enforcement(
    State(state): State<AppState>,
    AdminPrincipal(admin): AdminPrincipal,
) -> ApiResult<Json<ApiResponse<SweepReport>>> {
    tracing::info!(subject = %admin.subject, "Manual enforcement sweep requested");
    let report = state.sweeper.run().await?;
    Ok(Json(ApiResponse::ok(report)))
}

pub async fn failed_webhooks(
    State(state): State<AppState>,
    AdminPrincipal(_admin): AdminPrincipal,
    Query(query): Query<FailedWebhooksQuery>,
) -> ApiResult<Json<ApiResponse<Vec<WebhookEvent>>>> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let events = state.store.failed_events(limit).await?;
    Ok(Json(ApiResponse::ok(events)))
}

/// Put a FAILED event back in the delivery queue
pub async fn retry_webhook(
    State(state): State<AppState>,
    AdminPrincipal(admin): AdminPrincipal,
    Path(event_id): Path<i64>,
) -> ApiResult<Json<ApiResponse<i64>>> {
    if !state.store.requeue_event(event_id, Utc::now()).await? {
        return Err(ApiError::NotFound(format!(
            "no failed webhook event {}",
            event_id
        )));
    }
    tracing::info!(event_id, subject = %admin.subject, "Webhook event re-queued");
    Ok(Json(ApiResponse::ok(event_id)))
}
