//! Enforcement sweeper
//!
//! Finds ACTIVE loans with installments past their grace period, marks those
//! installments OVERDUE and defaults the loan, which locks the device. Each
//! loan is handled in its own unit of work so one failure never blocks the
//! rest of the batch. Only PENDING installments are matched, so a re-run over
//! already defaulted loans changes nothing.
//!
//! Loans that failed on earlier runs are moved behind the other candidates,
//! so a handful of broken rows cannot fill every batch.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::auth::Principal;
use crate::config::EnforcementConfig;
use crate::error::LendingError;
use crate::loan::{InstallmentStatus, LoanStateMachine, LoanStatus};
use crate::notification::{CustomerNotifier, DefaultNotice};
use crate::store::SharedStore;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SweepFailure {
    pub loan_id: Uuid,
    pub error: String,
}

/// Outcome of one sweep run
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct SweepReport {
    pub candidates: usize,
    pub defaulted: usize,
    /// Candidates that no longer qualified once locked
    pub skipped: usize,
    pub failures: Vec<SweepFailure>,
    /// Another run held the sweep lock; nothing was done
    pub overlapped: bool,
}

enum LoanOutcome {
    Defaulted(DefaultNotice),
    Skipped,
}

pub struct EnforcementSweeper {
    store: SharedStore,
    state_machine: LoanStateMachine,
    notifier: Arc<dyn CustomerNotifier>,
    config: EnforcementConfig,
    /// Held for the whole run; maps loans to their consecutive failed runs
    run_lock: Mutex<HashMap<Uuid, u32>>,
}

impl EnforcementSweeper {
    pub fn new(
        store: SharedStore,
        state_machine: LoanStateMachine,
        notifier: Arc<dyn CustomerNotifier>,
        config: EnforcementConfig,
    ) -> Self {
        Self {
            store,
            state_machine,
            notifier,
            config,
            run_lock: Mutex::new(HashMap::new()),
        }
    }

    pub async fn run(&self) -> Result<SweepReport, LendingError> {
        self.run_at(Utc::now()).await
    }

    /// Sweep as of `now`.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<SweepReport, LendingError> {
        let Ok(mut failing) = self.run_lock.try_lock() else {
            warn!("Enforcement sweep already running; skipping this run");
            return Ok(SweepReport {
                overlapped: true,
                ..SweepReport::default()
            });
        };

        let cutoff = now.date_naive() - Duration::days(self.config.grace_period_days);
        let batch_size = self.config.batch_size.max(0);
        let mut candidates = self
            .store
            .overdue_candidates(cutoff, batch_size.saturating_add(failing.len() as i64))
            .await?;

        failing.retain(|loan_id, _| candidates.contains(loan_id));
        // Stable sort: store order is kept within each failure count
        candidates.sort_by_key(|loan_id| failing.get(loan_id).copied().unwrap_or(0));
        candidates.truncate(batch_size as usize);

        let mut report = SweepReport {
            candidates: candidates.len(),
            ..SweepReport::default()
        };

        for loan_id in candidates {
            match self.enforce(loan_id, now).await {
                Ok(LoanOutcome::Defaulted(notice)) => {
                    failing.remove(&loan_id);
                    report.defaulted += 1;
                    self.notify(notice);
                }
                Ok(LoanOutcome::Skipped) => {
                    failing.remove(&loan_id);
                    report.skipped += 1;
                }
                Err(e) => {
                    let streak = failing.entry(loan_id).or_insert(0);
                    *streak += 1;
                    error!(
                        loan_id = %loan_id,
                        failed_runs = *streak,
                        error = %e,
                        "Failed to enforce overdue loan"
                    );
                    report.failures.push(SweepFailure {
                        loan_id,
                        error: e.to_string(),
                    });
                }
            }
        }

        info!(
            candidates = report.candidates,
            defaulted = report.defaulted,
            skipped = report.skipped,
            failures = report.failures.len(),
            "Enforcement sweep finished"
        );

        Ok(report)
    }

    async fn enforce(&self, loan_id: Uuid, now: DateTime<Utc>) -> Result<LoanOutcome, LendingError> {
        let mut uow = self.store.begin().await?;
        let mut loan = uow
            .lock_loan(loan_id)
            .await?
            .ok_or(LendingError::LoanNotFound(loan_id))?;

        if loan.status != LoanStatus::Active {
            debug!(loan_id = %loan_id, status = %loan.status, "Loan no longer active; skipping");
            return Ok(LoanOutcome::Skipped);
        }

        let today = now.date_naive();
        let grace = self.config.grace_period_days;
        let mut installments = uow.installments_for_loan(loan_id).await?;
        let mut marked = 0;
        for installment in installments
            .iter_mut()
            .filter(|i| i.status == InstallmentStatus::Pending && i.is_past_grace(today, grace))
        {
            installment.status = InstallmentStatus::Overdue;
            uow.update_installment(installment).await?;
            marked += 1;
        }

        if marked == 0 {
            return Ok(LoanOutcome::Skipped);
        }

        self.state_machine
            .transition(uow.as_mut(), &Principal::system(), &mut loan, LoanStatus::Defaulted, now)
            .await?;
        uow.commit().await?;

        let overdue_amount = installments
            .iter()
            .filter(|i| i.status == InstallmentStatus::Overdue)
            .map(|i| i.outstanding())
            .sum();

        info!(loan_id = %loan_id, overdue_installments = marked, "Loan defaulted");

        Ok(LoanOutcome::Defaulted(DefaultNotice {
            loan_id,
            customer_id: loan.customer_id,
            device_id: loan.device_id,
            overdue_amount,
            defaulted_at: now,
        }))
    }

    fn notify(&self, notice: DefaultNotice) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            let loan_id = notice.loan_id;
            if let Err(e) = notifier.notify_default(notice).await {
                warn!(loan_id = %loan_id, error = %e, "Customer default notice failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::LogNotifier;
    use crate::store::InMemoryLedger;

    fn sweeper() -> EnforcementSweeper {
        EnforcementSweeper::new(
            Arc::new(InMemoryLedger::new()),
            LoanStateMachine::new(5),
            Arc::new(LogNotifier),
            EnforcementConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_overlapping_run_does_nothing() {
        let sweeper = sweeper();
        let held = sweeper.run_lock.lock().await;

        let report = sweeper.run_at(Utc::now()).await.unwrap();
        assert!(report.overlapped);
        assert_eq!(report.candidates, 0);
        assert_eq!(report.defaulted, 0);

        drop(held);
        let report = sweeper.run_at(Utc::now()).await.unwrap();
        assert!(!report.overlapped);
    }
}
