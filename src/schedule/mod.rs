//! Installment schedule generation
//!
//! Pure functions, no storage access. Amounts are in the currency's minor unit.

use chrono::{Months, NaiveDate};
use serde::Serialize;

use crate::error::LendingError;

const BPS_DENOMINATOR: i128 = 10_000;

/// Loan terms the schedule is derived from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleInput {
    /// Financed amount minus down payment
    pub principal: i64,
    pub tenure_months: i32,
    /// Flat monthly rate in basis points
    pub monthly_rate_bps: i32,
    pub start_date: NaiveDate,
}

/// One planned installment before it is persisted
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduledInstallment {
    pub sequence: i32,
    pub due_date: NaiveDate,
    pub amount_due: i64,
}

fn overflow() -> LendingError {
    LendingError::InvalidScheduleInput("loan total overflows".to_string())
}

/// Total flat interest over the tenure, rounded half-up to the minor unit.
pub fn total_interest(
    principal: i64,
    monthly_rate_bps: i32,
    tenure_months: i32,
) -> Result<i64, LendingError> {
    let raw = principal as i128 * monthly_rate_bps as i128 * tenure_months as i128;
    i64::try_from((raw + BPS_DENOMINATOR / 2) / BPS_DENOMINATOR).map_err(|_| overflow())
}

/// Build the equal-installment plan for the given terms.
///
/// Every installment is `floor(total / tenure)`; the rounding remainder lands
/// on the last one, so the amounts always sum to principal + interest.
pub fn generate_schedule(input: &ScheduleInput) -> Result<Vec<ScheduledInstallment>, LendingError> {
    if input.tenure_months <= 0 {
        return Err(LendingError::InvalidScheduleInput(format!(
            "tenure must be positive, got {}",
            input.tenure_months
        )));
    }
    if input.principal <= 0 {
        return Err(LendingError::InvalidScheduleInput(format!(
            "principal must be positive, got {}",
            input.principal
        )));
    }
    if input.monthly_rate_bps < 0 {
        return Err(LendingError::InvalidScheduleInput(format!(
            "interest rate must not be negative, got {} bps",
            input.monthly_rate_bps
        )));
    }

    let total = input
        .principal
        .checked_add(total_interest(
            input.principal,
            input.monthly_rate_bps,
            input.tenure_months,
        )?)
        .ok_or_else(overflow)?;

    let tenure = input.tenure_months as i64;
    let base = total / tenure;
    let remainder = total - base * tenure;

    (1..=input.tenure_months)
        .map(|sequence| {
            let due_date = input
                .start_date
                .checked_add_months(Months::new(sequence as u32))
                .ok_or_else(|| {
                    LendingError::InvalidScheduleInput("due date out of range".to_string())
                })?;
            let amount_due = if sequence == input.tenure_months {
                base + remainder
            } else {
                base
            };
            Ok(ScheduledInstallment {
                sequence,
                due_date,
                amount_due,
            })
        })
        .collect()
}
