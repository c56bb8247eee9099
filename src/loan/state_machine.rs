//! Loan state machine
//!
//! The only writer of `Loan.status`. Each transition runs inside the caller's
//! unit of work and, in that same unit, updates the loan, syncs the bound
//! device and enqueues one outbox event. The caller commits.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::model::{Installment, InstallmentStatus, Loan, LoanStatus, StatusChange};
use crate::auth::Principal;
use crate::device::{DeviceLockCoordinator, DeviceSync};
use crate::error::LendingError;
use crate::payment::{PaymentTransaction, PaymentType};
use crate::store::UnitOfWork;
use crate::webhook::NewWebhookEvent;

/// What a committed transition did
#[derive(Debug, Clone, Serialize)]
pub struct TransitionRecord {
    pub change: StatusChange,
    pub device: DeviceSync,
    pub event_id: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct LoanStateMachine {
    grace_period_days: i64,
}

impl LoanStateMachine {
    pub fn new(grace_period_days: i64) -> Self {
        Self { grace_period_days }
    }

    pub fn grace_period_days(&self) -> i64 {
        self.grace_period_days
    }

    pub fn is_legal(from: LoanStatus, to: LoanStatus) -> bool {
        matches!(
            (from, to),
            (LoanStatus::Pending, LoanStatus::Active)
                | (LoanStatus::Active, LoanStatus::Completed)
                | (LoanStatus::Active, LoanStatus::Defaulted)
                | (LoanStatus::Defaulted, LoanStatus::Active)
        )
    }

    /// Evaluate the precondition of an edge against the loan's current records.
    pub fn check_guard(
        &self,
        loan: &Loan,
        to: LoanStatus,
        installments: &[Installment],
        transactions: &[PaymentTransaction],
        today: NaiveDate,
    ) -> Result<(), LendingError> {
        let from = loan.status;
        if !Self::is_legal(from, to) {
            return Err(LendingError::TransitionGuardFailed(format!(
                "illegal transition {} -> {}",
                from, to
            )));
        }

        let satisfied = match (from, to) {
            (LoanStatus::Pending, LoanStatus::Active) => transactions.iter().any(|t| {
                t.payment_type == PaymentType::DownPayment && t.amount >= loan.down_payment
            }),
            (LoanStatus::Active, LoanStatus::Completed) => {
                !installments.is_empty() && installments.iter().all(Installment::is_paid)
            }
            (LoanStatus::Active, LoanStatus::Defaulted) => installments
                .iter()
                .any(|i| i.is_past_grace(today, self.grace_period_days)),
            (LoanStatus::Defaulted, LoanStatus::Active) => installments
                .iter()
                .all(|i| i.status != InstallmentStatus::Overdue),
            _ => false,
        };

        if satisfied {
            Ok(())
        } else {
            Err(LendingError::TransitionGuardFailed(guard_reason(from, to).to_string()))
        }
    }

    /// Move `loan` to `to`, updating the in-memory copy on success.
    pub async fn transition(
        &self,
        uow: &mut dyn UnitOfWork,
        principal: &Principal,
        loan: &mut Loan,
        to: LoanStatus,
        now: DateTime<Utc>,
    ) -> Result<TransitionRecord, LendingError> {
        principal.authorize_mutation(loan)?;

        let from = loan.status;
        let installments = uow.installments_for_loan(loan.id).await?;
        let transactions = uow.transactions_for_loan(loan.id).await?;
        self.check_guard(loan, to, &installments, &transactions, now.date_naive())?;

        uow.update_loan_status(loan.id, to, now).await?;

        let device = match DeviceLockCoordinator::sync_to_loan_status(uow, &loan.device_id, to, now)
            .await
        {
            Ok(sync) => sync,
            Err(LendingError::DeviceNotFound(hardware_id)) => {
                warn!(
                    loan_id = %loan.id,
                    hardware_id = %hardware_id,
                    to = %to,
                    "Bound device has no record; loan transition proceeds without device sync"
                );
                DeviceSync::Missing
            }
            Err(e) => return Err(e),
        };

        let event = NewWebhookEvent::transition(loan, from, to, now).ok_or_else(|| {
            LendingError::TransitionGuardFailed(format!("no event for {} -> {}", from, to))
        })?;
        let event_id = uow.enqueue_event(event).await?;

        loan.status = to;
        loan.updated_at = now;
        if to == LoanStatus::Active && loan.approved_at.is_none() {
            loan.approved_at = Some(now);
        }

        info!(
            loan_id = %loan.id,
            from = %from,
            to = %to,
            subject = %principal.subject,
            event_id,
            "Loan transitioned"
        );

        Ok(TransitionRecord {
            change: StatusChange { from, to },
            device,
            event_id,
        })
    }
}

fn guard_reason(from: LoanStatus, to: LoanStatus) -> &'static str {
    match (from, to) {
        (LoanStatus::Pending, LoanStatus::Active) => "down payment has not been received",
        (LoanStatus::Active, LoanStatus::Completed) => "loan has unpaid installments",
        (LoanStatus::Active, LoanStatus::Defaulted) => "no installment is past its grace period",
        (LoanStatus::Defaulted, LoanStatus::Active) => "overdue installments remain unpaid",
        _ => "transition not allowed",
    }
}
