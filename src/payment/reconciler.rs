//! Payment reconciler
//!
//! Applies a confirmed payment to a loan in one unit of work: ledger entry,
//! installment allocation, PAYMENT_RECEIVED event and any status transitions
//! the payment unlocks (activation, redemption, completion).

use chrono::{DateTime, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use super::allocation::{allocate, Allocation};
use super::model::{
    PaymentChannel, PaymentCommand, PaymentStatus, PaymentTransaction, PaymentType,
    ReconciliationResult,
};
use crate::auth::Principal;
use crate::error::LendingError;
use crate::loan::{InstallmentStatus, LoanStateMachine, LoanStatus, StatusChange};
use crate::store::SharedStore;
use crate::webhook::NewWebhookEvent;

#[derive(Clone)]
pub struct PaymentReconciler {
    store: SharedStore,
    state_machine: LoanStateMachine,
}

impl PaymentReconciler {
    pub fn new(store: SharedStore, state_machine: LoanStateMachine) -> Self {
        Self {
            store,
            state_machine,
        }
    }

    pub async fn record_payment(
        &self,
        principal: &Principal,
        command: PaymentCommand,
        now: DateTime<Utc>,
    ) -> Result<ReconciliationResult, LendingError> {
        if command.amount <= 0 {
            return Err(LendingError::Validation(format!(
                "payment amount must be positive, got {}",
                command.amount
            )));
        }

        let mut uow = self.store.begin().await?;
        let mut loan = uow
            .lock_loan(command.loan_id)
            .await?
            .ok_or(LendingError::LoanNotFound(command.loan_id))?;
        principal.authorize_mutation(&loan)?;

        let reference = match command.reference.as_deref().map(str::trim) {
            Some(r) if !r.is_empty() => r.to_string(),
            _ => format!("PAY-{}", Uuid::new_v4()),
        };

        if let Some(previous) = uow.find_transaction_by_reference(loan.id, &reference).await? {
            debug!(loan_id = %loan.id, reference = %reference, "Duplicate payment reference ignored");
            return Ok(ReconciliationResult {
                transaction_id: previous.id,
                loan_id: loan.id,
                reference: previous.reference,
                payment_type: previous.payment_type,
                amount: previous.amount,
                applied_amount: previous.applied_amount,
                unapplied_amount: previous.unapplied_amount,
                allocations: Vec::new(),
                transitions: Vec::new(),
                loan_status: loan.status,
                duplicate: true,
            });
        }

        if loan.status == LoanStatus::Completed {
            return Err(LendingError::LoanAlreadyCompleted(loan.id));
        }

        let (payment_type, allocatable) = if loan.status == LoanStatus::Pending {
            if command.amount < loan.down_payment {
                return Err(LendingError::TransitionGuardFailed(format!(
                    "payment of {} does not cover the required down payment of {}",
                    command.amount, loan.down_payment
                )));
            }
            (PaymentType::DownPayment, command.amount - loan.down_payment)
        } else {
            let payment_type = match command.channel {
                PaymentChannel::Cash => PaymentType::Manual,
                PaymentChannel::Gateway => PaymentType::Installment,
            };
            (payment_type, command.amount)
        };

        let mut installments = uow.installments_for_loan(loan.id).await?;
        let Allocation {
            allocations,
            applied,
            unapplied,
        } = allocate(&mut installments, allocatable);

        for allocation in &allocations {
            if let Some(row) = installments.iter().find(|i| i.sequence == allocation.sequence) {
                uow.update_installment(row).await?;
            }
        }

        let transaction = PaymentTransaction {
            id: Uuid::new_v4(),
            loan_id: loan.id,
            merchant_id: loan.merchant_id,
            amount: command.amount,
            payment_type,
            channel: command.channel,
            status: PaymentStatus::Confirmed,
            reference,
            applied_amount: applied,
            unapplied_amount: unapplied,
            created_at: now,
        };
        uow.insert_transaction(&transaction).await?;
        uow.enqueue_event(NewWebhookEvent::payment_received(&loan, &transaction))
            .await?;

        let mut transitions: Vec<StatusChange> = Vec::new();

        if loan.status == LoanStatus::Pending {
            let record = self
                .state_machine
                .transition(uow.as_mut(), principal, &mut loan, LoanStatus::Active, now)
                .await?;
            transitions.push(record.change);
        }

        let overdue_left = installments
            .iter()
            .any(|i| i.status == InstallmentStatus::Overdue);
        if loan.status == LoanStatus::Defaulted && !overdue_left {
            let record = self
                .state_machine
                .transition(uow.as_mut(), principal, &mut loan, LoanStatus::Active, now)
                .await?;
            transitions.push(record.change);
        }

        let all_paid = !installments.is_empty() && installments.iter().all(|i| i.is_paid());
        if loan.status == LoanStatus::Active && all_paid {
            let record = self
                .state_machine
                .transition(uow.as_mut(), principal, &mut loan, LoanStatus::Completed, now)
                .await?;
            transitions.push(record.change);
        }

        uow.commit().await?;

        info!(
            loan_id = %loan.id,
            transaction_id = %transaction.id,
            reference = %transaction.reference,
            amount = transaction.amount,
            applied,
            unapplied,
            status = %loan.status,
            "Payment reconciled"
        );

        Ok(ReconciliationResult {
            transaction_id: transaction.id,
            loan_id: loan.id,
            reference: transaction.reference,
            payment_type,
            amount: transaction.amount,
            applied_amount: applied,
            unapplied_amount: unapplied,
            allocations,
            transitions,
            loan_status: loan.status,
            duplicate: false,
        })
    }
}
