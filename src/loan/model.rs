//! Loan and installment models

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::device::DeviceStatus;

/// Loan status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq, Hash)]
#[sqlx(type_name = "loan_status", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoanStatus {
    Pending,   // Awaiting down payment
    Active,    // Down payment confirmed, device unlocked
    Completed, // All installments paid
    Defaulted, // Enforcement triggered, device locked
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Pending => "PENDING",
            LoanStatus::Active => "ACTIVE",
            LoanStatus::Completed => "COMPLETED",
            LoanStatus::Defaulted => "DEFAULTED",
        }
    }

    /// Statuses that keep the device bound to this loan
    pub fn is_open(&self) -> bool {
        !matches!(self, LoanStatus::Completed)
    }
}

impl std::fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Loan model
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct Loan {
    pub id: Uuid,
    /// Merchant tenant that originated the loan
    pub merchant_id: Uuid,
    pub customer_id: Uuid,
    /// Hardware identifier of the financed device
    pub device_id: String,
    pub financed_amount: i64,
    pub down_payment: i64,
    pub tenure_months: i32,
    pub interest_rate_bps: i32,
    pub financing_partner_id: Option<Uuid>,
    pub status: LoanStatus,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Loan {
    /// Amount the installment schedule is generated from
    pub fn principal(&self) -> i64 {
        self.financed_amount - self.down_payment
    }
}

/// Installment status
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "installment_status", rename_all = "lowercase")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstallmentStatus {
    Pending,
    Paid,
    Overdue,
}

/// One scheduled repayment. Only `amount_paid` and `status` change after creation.
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct Installment {
    pub id: Uuid,
    pub loan_id: Uuid,
    pub sequence: i32,
    pub due_date: NaiveDate,
    pub amount_due: i64,
    pub amount_paid: i64,
    pub status: InstallmentStatus,
}

impl Installment {
    pub fn outstanding(&self) -> i64 {
        (self.amount_due - self.amount_paid).max(0)
    }

    pub fn is_paid(&self) -> bool {
        self.status == InstallmentStatus::Paid
    }

    /// Unpaid and past its due date plus the grace period
    pub fn is_past_grace(&self, today: NaiveDate, grace_period_days: i64) -> bool {
        !self.is_paid() && self.due_date + chrono::Duration::days(grace_period_days) < today
    }
}

/// Request to create a loan once onboarding and approval are done
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateLoanRequest {
    pub customer_id: Uuid,
    #[validate(length(min = 1, max = 64))]
    pub device_id: String,
    pub financed_amount: i64,
    #[validate(range(min = 0))]
    pub down_payment: i64,
    #[validate(range(max = 120))]
    pub tenure_months: i32,
    #[validate(range(max = 10000))]
    pub interest_rate_bps: i32,
    pub financing_partner_id: Option<Uuid>,
}

/// Read-only projection of a loan for dashboards
#[derive(Debug, Clone, Serialize)]
pub struct LoanStateView {
    pub loan_id: Uuid,
    pub status: LoanStatus,
    pub device_id: String,
    pub device_status: Option<DeviceStatus>,
    pub total_due: i64,
    pub total_paid: i64,
    pub outstanding: i64,
    pub installments: Vec<Installment>,
}

impl LoanStateView {
    pub fn new(loan: &Loan, installments: Vec<Installment>, device_status: Option<DeviceStatus>) -> Self {
        let total_due = installments.iter().map(|i| i.amount_due).sum();
        let total_paid = installments.iter().map(|i| i.amount_paid).sum();
        Self {
            loan_id: loan.id,
            status: loan.status,
            device_id: loan.device_id.clone(),
            device_status,
            total_due,
            total_paid,
            outstanding: installments.iter().map(Installment::outstanding).sum(),
            installments,
        }
    }
}

/// Query for listing a tenant's loans
#[derive(Debug, Deserialize, Default)]
pub struct ListLoansQuery {
    pub status: Option<LoanStatus>,
    pub page: Option<i64>,
    pub limit: Option<i64>,
}

/// A status change performed by the state machine
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct StatusChange {
    pub from: LoanStatus,
    pub to: LoanStatus,
}
