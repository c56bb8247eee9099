//! Outbox and partner webhook models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;
use validator::Validate;

use crate::loan::{Loan, LoanStatus};
use crate::payment::PaymentTransaction;

/// Event kinds delivered to financing partners
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "webhook_event_type", rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookEventType {
    LoanActivated,
    PaymentReceived,
    LoanDefaulted,
    LoanRedeemed,
    LoanCompleted,
}

impl WebhookEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WebhookEventType::LoanActivated => "LOAN_ACTIVATED",
            WebhookEventType::PaymentReceived => "PAYMENT_RECEIVED",
            WebhookEventType::LoanDefaulted => "LOAN_DEFAULTED",
            WebhookEventType::LoanRedeemed => "LOAN_REDEEMED",
            WebhookEventType::LoanCompleted => "LOAN_COMPLETED",
        }
    }

    /// Event emitted for a state-machine edge
    pub fn for_transition(from: LoanStatus, to: LoanStatus) -> Option<Self> {
        match (from, to) {
            (LoanStatus::Pending, LoanStatus::Active) => Some(WebhookEventType::LoanActivated),
            (LoanStatus::Active, LoanStatus::Defaulted) => Some(WebhookEventType::LoanDefaulted),
            (LoanStatus::Defaulted, LoanStatus::Active) => Some(WebhookEventType::LoanRedeemed),
            (LoanStatus::Active, LoanStatus::Completed) => Some(WebhookEventType::LoanCompleted),
            _ => None,
        }
    }
}

/// Delivery bookkeeping status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "webhook_event_status", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WebhookEventStatus {
    Pending,
    Delivered,
    /// Attempts exhausted, waiting for manual inspection
    Failed,
    /// Loan has no financing partner
    Skipped,
}

/// Outbox row
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq)]
pub struct WebhookEvent {
    pub id: i64,
    pub loan_id: Uuid,
    pub partner_id: Option<Uuid>,
    pub event_type: WebhookEventType,
    pub payload: serde_json::Value,
    pub status: WebhookEventStatus,
    pub attempts: i32,
    pub next_attempt_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Event written inside a unit of work
#[derive(Debug, Clone, PartialEq)]
pub struct NewWebhookEvent {
    pub loan_id: Uuid,
    pub partner_id: Option<Uuid>,
    pub event_type: WebhookEventType,
    pub payload: serde_json::Value,
}

impl NewWebhookEvent {
    pub fn transition(loan: &Loan, from: LoanStatus, to: LoanStatus, at: DateTime<Utc>) -> Option<Self> {
        let event_type = WebhookEventType::for_transition(from, to)?;
        Some(Self {
            loan_id: loan.id,
            partner_id: loan.financing_partner_id,
            event_type,
            payload: json!({
                "event": event_type.as_str(),
                "loan_id": loan.id,
                "merchant_id": loan.merchant_id,
                "customer_id": loan.customer_id,
                "device_id": loan.device_id,
                "from_status": from,
                "to_status": to,
                "occurred_at": at,
            }),
        })
    }

    pub fn payment_received(loan: &Loan, payment: &PaymentTransaction) -> Self {
        Self {
            loan_id: loan.id,
            partner_id: loan.financing_partner_id,
            event_type: WebhookEventType::PaymentReceived,
            payload: json!({
                "event": WebhookEventType::PaymentReceived.as_str(),
                "loan_id": loan.id,
                "merchant_id": loan.merchant_id,
                "transaction_id": payment.id,
                "reference": payment.reference,
                "amount": payment.amount,
                "applied_amount": payment.applied_amount,
                "payment_type": payment.payment_type,
                "occurred_at": payment.created_at,
            }),
        }
    }
}

/// Callback registration for a financing partner
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct PartnerWebhook {
    pub partner_id: Uuid,
    pub url: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterWebhookRequest {
    #[validate(url)]
    pub url: String,
    #[validate(length(min = 16, max = 256))]
    pub secret: String,
}

/// Counters for one dispatcher pass
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub retried: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl DispatchReport {
    pub fn processed(&self) -> usize {
        self.delivered + self.retried + self.failed + self.skipped
    }
}
