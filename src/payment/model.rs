//! Payment ledger models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::loan::{InstallmentStatus, LoanStatus, StatusChange};

/// What a ledger entry paid for
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_type", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    DownPayment,
    Installment,
    Manual,
}

/// How the money arrived
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_channel", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentChannel {
    Gateway,
    Cash,
}

#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "payment_status", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Confirmed,
}

/// Append-only ledger entry
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct PaymentTransaction {
    pub id: Uuid,
    pub loan_id: Uuid,
    /// Merchant tenant credited with the collection
    pub merchant_id: Uuid,
    pub amount: i64,
    pub payment_type: PaymentType,
    pub channel: PaymentChannel,
    pub status: PaymentStatus,
    pub reference: String,
    /// Portion credited to installments
    pub applied_amount: i64,
    /// Portion beyond the outstanding balance, never credited
    pub unapplied_amount: i64,
    pub created_at: DateTime<Utc>,
}

/// Request body for a merchant-confirmed cash collection
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RecordPaymentRequest {
    #[validate(range(min = 1))]
    pub amount: i64,
    #[validate(length(min = 1, max = 128))]
    pub reference: Option<String>,
}

/// Confirmed payment pushed by the payment-gateway bridge
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GatewayPaymentNotification {
    pub loan_id: Uuid,
    #[validate(range(min = 1))]
    pub amount: i64,
    #[validate(length(min = 1, max = 128))]
    pub reference: String,
}

/// Validated input to the reconciler
#[derive(Debug, Clone)]
pub struct PaymentCommand {
    pub loan_id: Uuid,
    pub amount: i64,
    pub reference: Option<String>,
    pub channel: PaymentChannel,
}

/// How much of a payment one installment absorbed
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct InstallmentAllocation {
    pub sequence: i32,
    pub applied: i64,
    pub amount_paid: i64,
    pub status: InstallmentStatus,
}

/// Outcome of applying a payment to a loan
#[derive(Debug, Clone, Serialize)]
pub struct ReconciliationResult {
    pub transaction_id: Uuid,
    pub loan_id: Uuid,
    pub reference: String,
    pub payment_type: PaymentType,
    pub amount: i64,
    pub applied_amount: i64,
    pub unapplied_amount: i64,
    pub allocations: Vec<InstallmentAllocation>,
    pub transitions: Vec<StatusChange>,
    pub loan_status: LoanStatus,
    /// True when the reference was already recorded and nothing changed
    pub duplicate: bool,
}
