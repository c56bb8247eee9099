//! Loan service layer - loan creation and read projections

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use super::model::{
    CreateLoanRequest, Installment, InstallmentStatus, ListLoansQuery, Loan, LoanStateView, LoanStatus,
};
use crate::auth::{Principal, Role};
use crate::error::LendingError;
use crate::schedule::{generate_schedule, ScheduleInput};
use crate::store::SharedStore;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

/// Loan service for creating loans and serving their state
#[derive(Clone)]
pub struct LoanService {
    store: SharedStore,
    min_down_payment_bps: i64,
}

impl LoanService {
    pub fn new(store: SharedStore, min_down_payment_bps: i64) -> Self {
        Self {
            store,
            min_down_payment_bps,
        }
    }

    /// Create a PENDING loan with its full installment schedule.
    pub async fn create_loan(
        &self,
        principal: &Principal,
        request: CreateLoanRequest,
        now: DateTime<Utc>,
    ) -> Result<Loan, LendingError> {
        if principal.role != Role::Merchant {
            return Err(LendingError::Validation(
                "loans are originated by merchants".to_string(),
            ));
        }
        request.validate()?;
        self.check_terms(&request)?;

        let principal_amount = request.financed_amount - request.down_payment;
        let schedule = generate_schedule(&ScheduleInput {
            principal: principal_amount,
            tenure_months: request.tenure_months,
            monthly_rate_bps: request.interest_rate_bps,
            start_date: now.date_naive(),
        })?;

        let hardware_id = request.device_id.trim().to_string();
        let mut uow = self.store.begin().await?;

        let device = uow
            .lock_device(&hardware_id)
            .await?
            .ok_or_else(|| LendingError::DeviceNotFound(hardware_id.clone()))?;
        if device.merchant_id != principal.tenant_id {
            warn!(
                target: "security",
                subject = %principal.subject,
                hardware_id = %hardware_id,
                "Loan requested against another tenant's device"
            );
            return Err(LendingError::DeviceNotFound(hardware_id));
        }
        if let Some(open) = uow.open_loan_for_device(&hardware_id).await? {
            return Err(LendingError::Conflict(format!(
                "device {} is already bound to loan {}",
                hardware_id, open.id
            )));
        }

        let loan = Loan {
            id: Uuid::new_v4(),
            merchant_id: principal.tenant_id,
            customer_id: request.customer_id,
            device_id: hardware_id,
            financed_amount: request.financed_amount,
            down_payment: request.down_payment,
            tenure_months: request.tenure_months,
            interest_rate_bps: request.interest_rate_bps,
            financing_partner_id: request.financing_partner_id,
            status: LoanStatus::Pending,
            created_at: now,
            approved_at: None,
            updated_at: now,
        };
        let installments: Vec<Installment> = schedule
            .into_iter()
            .map(|planned| Installment {
                id: Uuid::new_v4(),
                loan_id: loan.id,
                sequence: planned.sequence,
                due_date: planned.due_date,
                amount_due: planned.amount_due,
                amount_paid: 0,
                status: InstallmentStatus::Pending,
            })
            .collect();

        uow.insert_loan(&loan).await?;
        uow.insert_installments(&installments).await?;
        uow.commit().await?;

        info!(
            loan_id = %loan.id,
            merchant_id = %loan.merchant_id,
            device_id = %loan.device_id,
            financed_amount = loan.financed_amount,
            tenure_months = loan.tenure_months,
            "Loan created"
        );

        Ok(loan)
    }

    fn check_terms(&self, request: &CreateLoanRequest) -> Result<(), LendingError> {
        if request.financed_amount <= 0 {
            return Err(LendingError::InvalidScheduleInput(
                "financed amount must be positive".to_string(),
            ));
        }
        if request.down_payment < 0 || request.down_payment >= request.financed_amount {
            return Err(LendingError::InvalidScheduleInput(
                "down payment must be at least zero and below the financed amount".to_string(),
            ));
        }
        let required = request.financed_amount as i128 * self.min_down_payment_bps as i128;
        if (request.down_payment as i128) * 10_000 < required {
            return Err(LendingError::InvalidScheduleInput(format!(
                "down payment must cover at least {} bps of the financed amount",
                self.min_down_payment_bps
            )));
        }
        Ok(())
    }

    /// Loan, schedule and device status as one read-only view.
    pub async fn get_loan_state(
        &self,
        principal: &Principal,
        loan_id: Uuid,
    ) -> Result<LoanStateView, LendingError> {
        let loan = self
            .store
            .get_loan(loan_id)
            .await?
            .ok_or(LendingError::LoanNotFound(loan_id))?;
        principal.authorize_read(&loan)?;

        let installments = self.store.installments(loan_id).await?;
        let device_status = self.store.get_device(&loan.device_id).await?.map(|d| d.status);

        Ok(LoanStateView::new(&loan, installments, device_status))
    }

    /// Loans visible to the caller, newest first.
    pub async fn list_loans(
        &self,
        principal: &Principal,
        query: &ListLoansQuery,
    ) -> Result<Vec<Loan>, LendingError> {
        let merchant_scope = match principal.role {
            Role::Merchant => Some(principal.tenant_id),
            Role::Admin | Role::System => None,
            Role::Partner => {
                return Err(LendingError::Validation(
                    "partners read loans individually".to_string(),
                ))
            }
        };

        let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = (query.page.unwrap_or(1).max(1) - 1) * limit;

        self.store
            .list_loans(merchant_scope, query.status, limit, offset)
            .await
    }
}
