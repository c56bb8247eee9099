//! In-process ledger used by tests and database-less development runs
//!
//! All state sits behind one async mutex. A unit of work holds the guard for
//! its whole lifetime and mutates a private copy of the arena; commit writes
//! the copy back, drop discards it. Units are therefore fully serialized.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::{
    DeviceRepository, InstallmentRepository, LedgerStore, LoanRepository, OutboxRepository,
    PaymentRepository, StoreResult, UnitOfWork,
};
use crate::device::{Device, DeviceStatus};
use crate::error::LendingError;
use crate::loan::{Installment, InstallmentStatus, Loan, LoanStatus};
use crate::payment::PaymentTransaction;
use crate::webhook::{NewWebhookEvent, PartnerWebhook, WebhookEvent, WebhookEventStatus};

#[derive(Debug, Clone, Default)]
struct Arena {
    loans: HashMap<Uuid, Loan>,
    installments: HashMap<Uuid, Vec<Installment>>,
    devices: HashMap<String, Device>,
    transactions: Vec<PaymentTransaction>,
    events: BTreeMap<i64, WebhookEvent>,
    next_event_id: i64,
    partners: HashMap<Uuid, PartnerWebhook>,
    poisoned_loans: HashSet<Uuid>,
}

#[derive(Clone, Default)]
pub struct InMemoryLedger {
    arena: Arc<Mutex<Arena>>,
    fail_outbox: Arc<AtomicBool>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent outbox write fail, for exercising rollback.
    pub fn fail_outbox_writes(&self, fail: bool) {
        self.fail_outbox.store(fail, Ordering::SeqCst);
    }

    /// Makes `lock_loan` fail for one loan, for exercising per-loan isolation.
    pub async fn poison_loan(&self, loan_id: Uuid) {
        self.arena.lock().await.poisoned_loans.insert(loan_id);
    }
}

pub struct MemoryUnit {
    guard: OwnedMutexGuard<Arena>,
    work: Arena,
    fail_outbox: bool,
}

#[async_trait]
impl LoanRepository for MemoryUnit {
    async fn insert_loan(&mut self, loan: &Loan) -> StoreResult<()> {
        if self.work.loans.contains_key(&loan.id) {
            return Err(LendingError::Conflict(format!("loan {} already exists", loan.id)));
        }
        self.work.loans.insert(loan.id, loan.clone());
        Ok(())
    }

    async fn lock_loan(&mut self, loan_id: Uuid) -> StoreResult<Option<Loan>> {
        if self.work.poisoned_loans.contains(&loan_id) {
            return Err(LendingError::Storage(format!("loan {} is unreadable", loan_id)));
        }
        Ok(self.work.loans.get(&loan_id).cloned())
    }

    async fn update_loan_status(
        &mut self,
        loan_id: Uuid,
        status: LoanStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let loan = self
            .work
            .loans
            .get_mut(&loan_id)
            .ok_or(LendingError::LoanNotFound(loan_id))?;
        loan.status = status;
        loan.updated_at = at;
        if status == LoanStatus::Active && loan.approved_at.is_none() {
            loan.approved_at = Some(at);
        }
        Ok(())
    }

    async fn open_loan_for_device(&mut self, hardware_id: &str) -> StoreResult<Option<Loan>> {
        Ok(self
            .work
            .loans
            .values()
            .find(|l| l.device_id == hardware_id && l.status.is_open())
            .cloned())
    }
}

#[async_trait]
impl InstallmentRepository for MemoryUnit {
    async fn insert_installments(&mut self, installments: &[Installment]) -> StoreResult<()> {
        for installment in installments {
            let rows = self.work.installments.entry(installment.loan_id).or_default();
            if rows.iter().any(|i| i.sequence == installment.sequence) {
                return Err(LendingError::Conflict(format!(
                    "installment {} already exists for loan {}",
                    installment.sequence, installment.loan_id
                )));
            }
            rows.push(installment.clone());
            rows.sort_by_key(|i| i.sequence);
        }
        Ok(())
    }

    async fn installments_for_loan(&mut self, loan_id: Uuid) -> StoreResult<Vec<Installment>> {
        Ok(self.work.installments.get(&loan_id).cloned().unwrap_or_default())
    }

    async fn update_installment(&mut self, installment: &Installment) -> StoreResult<()> {
        let row = self
            .work
            .installments
            .get_mut(&installment.loan_id)
            .and_then(|rows| rows.iter_mut().find(|i| i.id == installment.id))
            .ok_or_else(|| LendingError::Storage(format!("installment {} not found", installment.id)))?;
        row.amount_paid = installment.amount_paid;
        row.status = installment.status;
        Ok(())
    }
}

#[async_trait]
impl DeviceRepository for MemoryUnit {
    async fn insert_device(&mut self, device: &Device) -> StoreResult<()> {
        if self.work.devices.contains_key(&device.hardware_id) {
            return Err(LendingError::Conflict(format!(
                "device {} already registered",
                device.hardware_id
            )));
        }
        self.work.devices.insert(device.hardware_id.clone(), device.clone());
        Ok(())
    }

    async fn lock_device(&mut self, hardware_id: &str) -> StoreResult<Option<Device>> {
        Ok(self.work.devices.get(hardware_id).cloned())
    }

    async fn set_device_status(
        &mut self,
        hardware_id: &str,
        status: DeviceStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let device = self
            .work
            .devices
            .get_mut(hardware_id)
            .ok_or_else(|| LendingError::DeviceNotFound(hardware_id.to_string()))?;
        device.status = status;
        device.updated_at = at;
        Ok(())
    }

    async fn delete_device(&mut self, hardware_id: &str) -> StoreResult<bool> {
        Ok(self.work.devices.remove(hardware_id).is_some())
    }
}

#[async_trait]
impl PaymentRepository for MemoryUnit {
    async fn insert_transaction(&mut self, transaction: &PaymentTransaction) -> StoreResult<()> {
        let duplicate = self
            .work
            .transactions
            .iter()
            .any(|t| t.loan_id == transaction.loan_id && t.reference == transaction.reference);
        if duplicate {
            return Err(LendingError::Conflict(format!(
                "reference {} already recorded",
                transaction.reference
            )));
        }
        self.work.transactions.push(transaction.clone());
        Ok(())
    }

    async fn find_transaction_by_reference(
        &mut self,
        loan_id: Uuid,
        reference: &str,
    ) -> StoreResult<Option<PaymentTransaction>> {
        Ok(self
            .work
            .transactions
            .iter()
            .find(|t| t.loan_id == loan_id && t.reference == reference)
            .cloned())
    }

    async fn transactions_for_loan(&mut self, loan_id: Uuid) -> StoreResult<Vec<PaymentTransaction>> {
        Ok(transactions_of(&self.work, loan_id))
    }
}

#[async_trait]
impl OutboxRepository for MemoryUnit {
    async fn enqueue_event(&mut self, event: NewWebhookEvent) -> StoreResult<i64> {
        if self.fail_outbox {
            return Err(LendingError::Storage("outbox write rejected".to_string()));
        }
        self.work.next_event_id += 1;
        let id = self.work.next_event_id;
        let now = Utc::now();
        self.work.events.insert(
            id,
            WebhookEvent {
                id,
                loan_id: event.loan_id,
                partner_id: event.partner_id,
                event_type: event.event_type,
                payload: event.payload,
                status: WebhookEventStatus::Pending,
                attempts: 0,
                next_attempt_at: now,
                last_error: None,
                created_at: now,
                delivered_at: None,
            },
        );
        Ok(id)
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryUnit { mut guard, work, .. } = *self;
        *guard = work;
        Ok(())
    }
}

fn transactions_of(arena: &Arena, loan_id: Uuid) -> Vec<PaymentTransaction> {
    arena
        .transactions
        .iter()
        .filter(|t| t.loan_id == loan_id)
        .cloned()
        .collect()
}

fn event_mut(arena: &mut Arena, event_id: i64) -> StoreResult<&mut WebhookEvent> {
    arena
        .events
        .get_mut(&event_id)
        .ok_or_else(|| LendingError::Storage(format!("webhook event {} not found", event_id)))
}

#[async_trait]
impl LedgerStore for InMemoryLedger {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let guard = self.arena.clone().lock_owned().await;
        let work = guard.clone();
        Ok(Box::new(MemoryUnit {
            guard,
            work,
            fail_outbox: self.fail_outbox.load(Ordering::SeqCst),
        }))
    }

    async fn get_loan(&self, loan_id: Uuid) -> StoreResult<Option<Loan>> {
        Ok(self.arena.lock().await.loans.get(&loan_id).cloned())
    }

    async fn list_loans(
        &self,
        merchant_id: Option<Uuid>,
        status: Option<LoanStatus>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Loan>> {
        let arena = self.arena.lock().await;
        let mut loans: Vec<Loan> = arena
            .loans
            .values()
            .filter(|l| merchant_id.map_or(true, |m| l.merchant_id == m))
            .filter(|l| status.map_or(true, |s| l.status == s))
            .cloned()
            .collect();
        loans.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(loans
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn installments(&self, loan_id: Uuid) -> StoreResult<Vec<Installment>> {
        Ok(self
            .arena
            .lock()
            .await
            .installments
            .get(&loan_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn transactions(&self, loan_id: Uuid) -> StoreResult<Vec<PaymentTransaction>> {
        Ok(transactions_of(&*self.arena.lock().await, loan_id))
    }

    async fn get_device(&self, hardware_id: &str) -> StoreResult<Option<Device>> {
        Ok(self.arena.lock().await.devices.get(hardware_id).cloned())
    }

    async fn touch_heartbeat(
        &self,
        hardware_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Device>> {
        let mut arena = self.arena.lock().await;
        Ok(arena.devices.get_mut(hardware_id).map(|device| {
            device.last_heartbeat = Some(at);
            device.clone()
        }))
    }

    async fn overdue_candidates(&self, due_before: NaiveDate, limit: i64) -> StoreResult<Vec<Uuid>> {
        let arena = self.arena.lock().await;
        let mut candidates: Vec<(NaiveDate, Uuid)> = arena
            .loans
            .values()
            .filter(|l| l.status == LoanStatus::Active)
            .filter_map(|l| {
                arena
                    .installments
                    .get(&l.id)?
                    .iter()
                    .filter(|i| i.status == InstallmentStatus::Pending && i.due_date < due_before)
                    .map(|i| i.due_date)
                    .min()
                    .map(|due| (due, l.id))
            })
            .collect();
        candidates.sort();
        Ok(candidates
            .into_iter()
            .take(limit.max(0) as usize)
            .map(|(_, id)| id)
            .collect())
    }

    async fn deliverable_events(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<WebhookEvent>> {
        let arena = self.arena.lock().await;
        let mut heads: HashMap<Uuid, &WebhookEvent> = HashMap::new();
        // BTreeMap iterates in id order, so the first pending event seen per loan is its head.
        for event in arena.events.values() {
            if event.status == WebhookEventStatus::Pending {
                heads.entry(event.loan_id).or_insert(event);
            }
        }
        let mut ready: Vec<WebhookEvent> = heads
            .into_values()
            .filter(|e| e.next_attempt_at <= now)
            .cloned()
            .collect();
        ready.sort_by_key(|e| e.id);
        ready.truncate(limit.max(0) as usize);
        Ok(ready)
    }

    async fn events_for_loan(&self, loan_id: Uuid) -> StoreResult<Vec<WebhookEvent>> {
        Ok(self
            .arena
            .lock()
            .await
            .events
            .values()
            .filter(|e| e.loan_id == loan_id)
            .cloned()
            .collect())
    }

    async fn failed_events(&self, limit: i64) -> StoreResult<Vec<WebhookEvent>> {
        Ok(self
            .arena
            .lock()
            .await
            .events
            .values()
            .filter(|e| e.status == WebhookEventStatus::Failed)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn mark_event_delivered(
        &self,
        event_id: i64,
        attempts: i32,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut arena = self.arena.lock().await;
        let event = event_mut(&mut arena, event_id)?;
        event.status = WebhookEventStatus::Delivered;
        event.attempts = attempts;
        event.delivered_at = Some(at);
        event.last_error = None;
        Ok(())
    }

    async fn mark_event_retry(
        &self,
        event_id: i64,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> StoreResult<()> {
        let mut arena = self.arena.lock().await;
        let event = event_mut(&mut arena, event_id)?;
        event.attempts = attempts;
        event.next_attempt_at = next_attempt_at;
        event.last_error = Some(error.to_string());
        Ok(())
    }

    async fn mark_event_failed(&self, event_id: i64, attempts: i32, error: &str) -> StoreResult<()> {
        let mut arena = self.arena.lock().await;
        let event = event_mut(&mut arena, event_id)?;
        event.status = WebhookEventStatus::Failed;
        event.attempts = attempts;
        event.last_error = Some(error.to_string());
        Ok(())
    }

    async fn mark_event_skipped(&self, event_id: i64, reason: &str) -> StoreResult<()> {
        let mut arena = self.arena.lock().await;
        let event = event_mut(&mut arena, event_id)?;
        event.status = WebhookEventStatus::Skipped;
        event.last_error = Some(reason.to_string());
        Ok(())
    }

    async fn requeue_event(&self, event_id: i64, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut arena = self.arena.lock().await;
        match arena.events.get_mut(&event_id) {
            Some(event) if event.status == WebhookEventStatus::Failed => {
                event.status = WebhookEventStatus::Pending;
                event.attempts = 0;
                event.next_attempt_at = at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn upsert_partner_webhook(&self, webhook: &PartnerWebhook) -> StoreResult<()> {
        self.arena
            .lock()
            .await
            .partners
            .insert(webhook.partner_id, webhook.clone());
        Ok(())
    }

    async fn partner_webhook(&self, partner_id: Uuid) -> StoreResult<Option<PartnerWebhook>> {
        Ok(self.arena.lock().await.partners.get(&partner_id).cloned())
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}
