//! PostgreSQL ledger
//!
//! A unit of work is one database transaction. `lock_loan` and `lock_device`
//! take row locks (`FOR UPDATE`), so concurrent payments and sweeps on the
//! same loan queue behind each other while different loans proceed in
//! parallel.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use super::{
    DeviceRepository, InstallmentRepository, LedgerStore, LoanRepository, OutboxRepository,
    PaymentRepository, StoreResult, UnitOfWork,
};
use crate::device::{Device, DeviceStatus};
use crate::error::LendingError;
use crate::loan::{Installment, Loan, LoanStatus};
use crate::payment::PaymentTransaction;
use crate::webhook::{NewWebhookEvent, PartnerWebhook, WebhookEvent};

const UNIQUE_VIOLATION: &str = "23505";

/// Unique-key violations surface as conflicts, everything else as storage failures.
fn map_write_err(err: sqlx::Error, what: &str) -> LendingError {
    let unique = err
        .as_database_error()
        .and_then(|db| db.code())
        .map_or(false, |code| code == UNIQUE_VIOLATION);
    if unique {
        LendingError::Conflict(format!("{} already exists", what))
    } else {
        LendingError::from(err)
    }
}

#[derive(Clone)]
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

pub struct PgUnit {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl LoanRepository for PgUnit {
    async fn insert_loan(&mut self, loan: &Loan) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO loans (
                id, merchant_id, customer_id, device_id, financed_amount,
                down_payment, tenure_months, interest_rate_bps, financing_partner_id,
                status, created_at, approved_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(loan.id)
        .bind(loan.merchant_id)
        .bind(loan.customer_id)
        .bind(&loan.device_id)
        .bind(loan.financed_amount)
        .bind(loan.down_payment)
        .bind(loan.tenure_months)
        .bind(loan.interest_rate_bps)
        .bind(loan.financing_partner_id)
        .bind(loan.status)
        .bind(loan.created_at)
        .bind(loan.approved_at)
        .bind(loan.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_err(e, "open loan for device"))?;
        Ok(())
    }

    async fn lock_loan(&mut self, loan_id: Uuid) -> StoreResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1 FOR UPDATE")
            .bind(loan_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(loan)
    }

    async fn update_loan_status(
        &mut self,
        loan_id: Uuid,
        status: LoanStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE loans
            SET status = $1,
                updated_at = $2,
                approved_at = CASE
                    WHEN $1 = 'active'::loan_status AND approved_at IS NULL THEN $2
                    ELSE approved_at
                END
            WHERE id = $3
            "#,
        )
        .bind(status)
        .bind(at)
        .bind(loan_id)
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(LendingError::LoanNotFound(loan_id));
        }
        Ok(())
    }

    async fn open_loan_for_device(&mut self, hardware_id: &str) -> StoreResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>(
            "SELECT * FROM loans WHERE device_id = $1 AND status <> 'completed' LIMIT 1",
        )
        .bind(hardware_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(loan)
    }
}

#[async_trait]
impl InstallmentRepository for PgUnit {
    async fn insert_installments(&mut self, installments: &[Installment]) -> StoreResult<()> {
        for installment in installments {
            sqlx::query(
                r#"
                INSERT INTO installments (id, loan_id, sequence, due_date, amount_due, amount_paid, status)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(installment.id)
            .bind(installment.loan_id)
            .bind(installment.sequence)
            .bind(installment.due_date)
            .bind(installment.amount_due)
            .bind(installment.amount_paid)
            .bind(installment.status)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_write_err(e, "installment"))?;
        }
        Ok(())
    }

    async fn installments_for_loan(&mut self, loan_id: Uuid) -> StoreResult<Vec<Installment>> {
        let rows = sqlx::query_as::<_, Installment>(
            "SELECT * FROM installments WHERE loan_id = $1 ORDER BY sequence",
        )
        .bind(loan_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }

    async fn update_installment(&mut self, installment: &Installment) -> StoreResult<()> {
        sqlx::query("UPDATE installments SET amount_paid = $1, status = $2 WHERE id = $3")
            .bind(installment.amount_paid)
            .bind(installment.status)
            .bind(installment.id)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl DeviceRepository for PgUnit {
    async fn insert_device(&mut self, device: &Device) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO devices (hardware_id, merchant_id, status, last_heartbeat, registered_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&device.hardware_id)
        .bind(device.merchant_id)
        .bind(device.status)
        .bind(device.last_heartbeat)
        .bind(device.registered_at)
        .bind(device.updated_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_err(e, "device"))?;
        Ok(())
    }

    async fn lock_device(&mut self, hardware_id: &str) -> StoreResult<Option<Device>> {
        let device =
            sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE hardware_id = $1 FOR UPDATE")
                .bind(hardware_id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(device)
    }

    async fn set_device_status(
        &mut self,
        hardware_id: &str,
        status: DeviceStatus,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE devices SET status = $1, updated_at = $2 WHERE hardware_id = $3")
                .bind(status)
                .bind(at)
                .bind(hardware_id)
                .execute(&mut *self.tx)
                .await?;
        if result.rows_affected() == 0 {
            return Err(LendingError::DeviceNotFound(hardware_id.to_string()));
        }
        Ok(())
    }

    async fn delete_device(&mut self, hardware_id: &str) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM devices WHERE hardware_id = $1")
            .bind(hardware_id)
            .execute(&mut *self.tx)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl PaymentRepository for PgUnit {
    async fn insert_transaction(&mut self, transaction: &PaymentTransaction) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_transactions (
                id, loan_id, merchant_id, amount, payment_type, channel, status,
                reference, applied_amount, unapplied_amount, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(transaction.id)
        .bind(transaction.loan_id)
        .bind(transaction.merchant_id)
        .bind(transaction.amount)
        .bind(transaction.payment_type)
        .bind(transaction.channel)
        .bind(transaction.status)
        .bind(&transaction.reference)
        .bind(transaction.applied_amount)
        .bind(transaction.unapplied_amount)
        .bind(transaction.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_write_err(e, "payment reference"))?;
        Ok(())
    }

    async fn find_transaction_by_reference(
        &mut self,
        loan_id: Uuid,
        reference: &str,
    ) -> StoreResult<Option<PaymentTransaction>> {
        let row = sqlx::query_as::<_, PaymentTransaction>(
            "SELECT * FROM payment_transactions WHERE loan_id = $1 AND reference = $2",
        )
        .bind(loan_id)
        .bind(reference)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn transactions_for_loan(&mut self, loan_id: Uuid) -> StoreResult<Vec<PaymentTransaction>> {
        let rows = sqlx::query_as::<_, PaymentTransaction>(
            "SELECT * FROM payment_transactions WHERE loan_id = $1 ORDER BY created_at, id",
        )
        .bind(loan_id)
        .fetch_all(&mut *self.tx)
        .await?;
        Ok(rows)
    }
}

#[async_trait]
impl OutboxRepository for PgUnit {
    async fn enqueue_event(&mut self, event: NewWebhookEvent) -> StoreResult<i64> {
        let (id,) = sqlx::query_as::<_, (i64,)>(
            r#"
            INSERT INTO webhook_events (loan_id, partner_id, event_type, payload)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(event.loan_id)
        .bind(event.partner_id)
        .bind(event.event_type)
        .bind(event.payload)
        .fetch_one(&mut *self.tx)
        .await?;
        Ok(id)
    }
}

#[async_trait]
impl UnitOfWork for PgUnit {
    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedger {
    async fn begin(&self) -> StoreResult<Box<dyn UnitOfWork>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgUnit { tx }))
    }

    async fn get_loan(&self, loan_id: Uuid) -> StoreResult<Option<Loan>> {
        let loan = sqlx::query_as::<_, Loan>("SELECT * FROM loans WHERE id = $1")
            .bind(loan_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(loan)
    }

    async fn list_loans(
        &self,
        merchant_id: Option<Uuid>,
        status: Option<LoanStatus>,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<Loan>> {
        let loans = sqlx::query_as::<_, Loan>(
            r#"
            SELECT * FROM loans
            WHERE ($1::uuid IS NULL OR merchant_id = $1)
              AND ($2::loan_status IS NULL OR status = $2)
            ORDER BY created_at DESC, id
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(merchant_id)
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(loans)
    }

    async fn installments(&self, loan_id: Uuid) -> StoreResult<Vec<Installment>> {
        let rows = sqlx::query_as::<_, Installment>(
            "SELECT * FROM installments WHERE loan_id = $1 ORDER BY sequence",
        )
        .bind(loan_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn transactions(&self, loan_id: Uuid) -> StoreResult<Vec<PaymentTransaction>> {
        let rows = sqlx::query_as::<_, PaymentTransaction>(
            "SELECT * FROM payment_transactions WHERE loan_id = $1 ORDER BY created_at, id",
        )
        .bind(loan_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn get_device(&self, hardware_id: &str) -> StoreResult<Option<Device>> {
        let device = sqlx::query_as::<_, Device>("SELECT * FROM devices WHERE hardware_id = $1")
            .bind(hardware_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(device)
    }

    async fn touch_heartbeat(
        &self,
        hardware_id: &str,
        at: DateTime<Utc>,
    ) -> StoreResult<Option<Device>> {
        let device = sqlx::query_as::<_, Device>(
            "UPDATE devices SET last_heartbeat = $1 WHERE hardware_id = $2 RETURNING *",
        )
        .bind(at)
        .bind(hardware_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(device)
    }

    async fn overdue_candidates(&self, due_before: NaiveDate, limit: i64) -> StoreResult<Vec<Uuid>> {
        let rows = sqlx::query_as::<_, (Uuid,)>(
            r#"
            SELECT l.id
            FROM loans l
            JOIN installments i ON i.loan_id = l.id
            WHERE l.status = 'active'
              AND i.status = 'pending'
              AND i.due_date < $1
            GROUP BY l.id
            ORDER BY MIN(i.due_date), l.id
            LIMIT $2
            "#,
        )
        .bind(due_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn deliverable_events(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<WebhookEvent>> {
        let events = sqlx::query_as::<_, WebhookEvent>(
            r#"
            SELECT * FROM (
                SELECT DISTINCT ON (loan_id) *
                FROM webhook_events
                WHERE status = 'pending'
                ORDER BY loan_id, id
            ) heads
            WHERE next_attempt_at <= $1
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn events_for_loan(&self, loan_id: Uuid) -> StoreResult<Vec<WebhookEvent>> {
        let events = sqlx::query_as::<_, WebhookEvent>(
            "SELECT * FROM webhook_events WHERE loan_id = $1 ORDER BY id",
        )
        .bind(loan_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn failed_events(&self, limit: i64) -> StoreResult<Vec<WebhookEvent>> {
        let events = sqlx::query_as::<_, WebhookEvent>(
            "SELECT * FROM webhook_events WHERE status = 'failed' ORDER BY id LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(events)
    }

    async fn mark_event_delivered(
        &self,
        event_id: i64,
        attempts: i32,
        at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = 'delivered', attempts = $1, delivered_at = $2, last_error = NULL
            WHERE id = $3
            "#,
        )
        .bind(attempts)
        .bind(at)
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_event_retry(
        &self,
        event_id: i64,
        attempts: i32,
        next_attempt_at: DateTime<Utc>,
        error: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE webhook_events SET attempts = $1, next_attempt_at = $2, last_error = $3 WHERE id = $4",
        )
        .bind(attempts)
        .bind(next_attempt_at)
        .bind(error)
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_event_failed(&self, event_id: i64, attempts: i32, error: &str) -> StoreResult<()> {
        sqlx::query(
            "UPDATE webhook_events SET status = 'failed', attempts = $1, last_error = $2 WHERE id = $3",
        )
        .bind(attempts)
        .bind(error)
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_event_skipped(&self, event_id: i64, reason: &str) -> StoreResult<()> {
        sqlx::query("UPDATE webhook_events SET status = 'skipped', last_error = $1 WHERE id = $2")
            .bind(reason)
            .bind(event_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn requeue_event(&self, event_id: i64, at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = 'pending', attempts = 0, next_attempt_at = $1
            WHERE id = $2 AND status = 'failed'
            "#,
        )
        .bind(at)
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn upsert_partner_webhook(&self, webhook: &PartnerWebhook) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO partner_webhooks (partner_id, url, secret, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (partner_id)
            DO UPDATE SET url = EXCLUDED.url, secret = EXCLUDED.secret, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(webhook.partner_id)
        .bind(&webhook.url)
        .bind(&webhook.secret)
        .bind(webhook.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn partner_webhook(&self, partner_id: Uuid) -> StoreResult<Option<PartnerWebhook>> {
        let webhook =
            sqlx::query_as::<_, PartnerWebhook>("SELECT * FROM partner_webhooks WHERE partner_id = $1")
                .bind(partner_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(webhook)
    }

    async fn health_check(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
