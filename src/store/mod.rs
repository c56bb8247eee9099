//! Persistence ports
//!
//! Each entity has its own repository trait. A [`UnitOfWork`] implements all
//! of them over a single atomic scope: writes become visible only on
//! [`UnitOfWork::commit`], and dropping an uncommitted unit rolls it back.
//! [`LedgerStore`] opens units and serves the reads and bookkeeping writes
//! that live outside the loan transaction (projections, heartbeats, outbox
//! delivery state, partner registrations).

mod memory;
mod postgres;

pub use memory::InMemoryLedger;
pub use postgres::PgLedger;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::device::{Device, DeviceStatus};
use crate::error::LendingError;
use crate::loan::{Installment, Loan, LoanStatus};
use crate::payment::PaymentTransaction;
use crate::webhook::{NewWebhookEvent, PartnerWebhook, WebhookEvent};

pub type StoreResult<T> = Result<T, LendingError>;

#[async_trait]
pub trait LoanRepository: Send {
    async fn insert_loan(&mut self, loan: &Loan) -> StoreResult<()>;

    /// Fetch a loan and hold its row lock until the unit ends.
    async fn lock_loan(&mut self, loan_id: Uuid) -> StoreResult<Option<Loan>>;

    /// Sets `approved_at` the first time a loan becomes ACTIVE.
    async fn update_loan_status(
        &mut self,
        loan_id: Uuid,
        status: LoanStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// The non-completed loan bound to a device, if any
    async fn open_loan_for_device(&mut self, hardware_id: &str) -> StoreResult<Option<Loan>>;
}

#[async_trait]
pub trait InstallmentRepository: Send {
    async fn insert_installments(&mut self, installments: &[Installment]) -> StoreResult<()>;

    /// Installments of a loan ordered by sequence
    async fn installments_for_loan(&mut self, loan_id: Uuid) -> StoreResult<Vec<Installment>>;

    /// Persists `amount_paid` and `status`; due date and amount due are immutable.
    async fn update_installment(&mut self, installment: &Installment) -> StoreResult<()>;
}

#[async_trait]
pub trait DeviceRepository: Send {
    async fn insert_device(&mut self, device: &Device) -> StoreResult<()>;

    async fn lock_device(&mut self, hardware_id: &str) -> StoreResult<Option<Device>>;

    async fn set_device_status(
        &mut self,
        hardware_id: &str,
        status: DeviceStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<()>;

    async fn delete_device(&mut self, hardware_id: &str) -> StoreResult<bool>;
}

#[async_trait]
pub trait PaymentRepository: Send {
    async fn insert_transaction(&mut self, transaction: &PaymentTransaction) -> StoreResult<()>;

    async fn find_transaction_by_reference(
        &mut self,
        loan_id: Uuid,
        reference: &str,
    ) -> StoreResult<Option<PaymentTransaction>>;

    async fn transactions_for_loan(&mut self, loan_id: Uuid) -> StoreResult<Vec<PaymentTransaction>>;
}

#[async_trait]
pub trait OutboxRepository: Send {
    /// Returns the id, which orders events of one loan.
    async fn enqueue_event(&mut self, event: NewWebhookEvent) -> StoreResult<i64>;
}

/// One atomic scope over the loan, installment, device, ledger and outbox tables.
#[async_trait]
pub trait UnitOfWork:
    LoanRepository + InstallmentRepository + DeviceRepository + PaymentRepository + OutboxRepository
{
    async fn commit(self: Box<Self>) -> StoreResult<()>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>>;

    async fn get_loan(&self, loan_id: Uuid) -> StoreResult<Option<Loan>>;

    async fn list_loans(
        &self,
        merchant_id: Option<Uuid>,
        status: Option<LoanStatus>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Loan>>;

    async fn installments(&self, loan_id: Uuid) -> StoreResult<Vec<Installment>>;

    async fn transactions(&self, loan_id: Uuid) -> StoreResult<Vec<PaymentTransaction>>;

    async fn get_device(&self, hardware_id: &str) -> StoreResult<Option<Device>>;

    /// Writes `last_heartbeat` only. Never touches `status`.
    async fn touch_heartbeat(&self, hardware_id: &str, at: DateTime<Utc>)
        -> StoreResult<Option<Device>>;

    /// ACTIVE loans with a PENDING installment due strictly before `due_before`,
    /// oldest due date first.
    async fn overdue_candidates(&self, due_before: NaiveDate, limit: i64) -> StoreResult<Vec<Uuid>>;

    /// Oldest PENDING event of each loan whose retry time has come.
    async fn deliverable_events(&self, now: DateTime<Utc>, limit: i64)
        -> StoreResult<Vec<WebhookEvent>>;

    async fn events_for_loan(&self, loan_id: Uuid) -> StoreResult<Vec<WebhookEvent>>;

    async fn failed_events(&self, limit: i64) -> StoreResult<Vec<WebhookEvent>>;

    async fn mark_event_delivered(&self, event_id: i64, attempts: i32, at: DateTime<Utc>)
        -> StoreResult<()>;

    async fn mark_event_retry(
        &self,
        event_id: i64,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> StoreResult<()>;

    async fn mark_event_failed(&self, event_id: i64, attempts: i32, error: &str) -> StoreResult<()>;

    async fn mark_event_skipped(&self, event_id: i64, reason: &str) -> StoreResult<()>;

    /// Puts a FAILED event back in the queue with a fresh attempt budget.
    async fn requeue_event(&self, event_id: i64, at: DateTime<Utc>) -> StoreResult<bool>;

    async fn upsert_partner_webhook(&self, webhook: &PartnerWebhook) -> StoreResult<()>;

    async fn partner_webhook(&self, partner_id: Uuid) -> StoreResult<Option<PartnerWebhook>>;

    async fn health_check(&self) -> StoreResult<()>;
}

pub type SharedStore = Arc<dyn LedgerStore>;
