//! Oldest-first allocation of a payment across installments

use super::model::InstallmentAllocation;
use crate::loan::{Installment, InstallmentStatus};

/// Result of spreading one amount over a schedule
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub allocations: Vec<InstallmentAllocation>,
    pub applied: i64,
    pub unapplied: i64,
}

/// Credit `amount` to `installments` in sequence order.
///
/// Each unpaid installment absorbs up to its outstanding balance and becomes
/// PAID once fully covered; the rest carries forward. Whatever is left after
/// the last installment is returned as `unapplied`. `installments` must be
/// sorted by sequence.
pub fn allocate(installments: &mut [Installment], amount: i64) -> Allocation {
    let mut remaining = amount.max(0);
    let mut allocations = Vec::new();

    for installment in installments.iter_mut().filter(|i| !i.is_paid()) {
        let outstanding = installment.outstanding();
        if outstanding > 0 && remaining == 0 {
            break;
        }

        let applied = remaining.min(outstanding);
        installment.amount_paid += applied;
        remaining -= applied;
        if installment.amount_paid >= installment.amount_due {
            installment.status = InstallmentStatus::Paid;
        }

        allocations.push(InstallmentAllocation {
            sequence: installment.sequence,
            applied,
            amount_paid: installment.amount_paid,
            status: installment.status,
        });
    }

    Allocation {
        allocations,
        applied: amount.max(0) - remaining,
        unapplied: remaining,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn schedule(amounts: &[i64]) -> Vec<Installment> {
        let loan_id = Uuid::new_v4();
        amounts
            .iter()
            .enumerate()
            .map(|(idx, amount)| Installment {
                id: Uuid::new_v4(),
                loan_id,
                sequence: idx as i32 + 1,
                due_date: NaiveDate::from_ymd_opt(2024, idx as u32 + 1, 15).unwrap(),
                amount_due: *amount,
                amount_paid: 0,
                status: InstallmentStatus::Pending,
            })
            .collect()
    }

    #[test]
    fn test_partial_payment_spans_installments() {
        let mut rows = schedule(&[110_000, 110_000, 110_000, 110_000]);
        let result = allocate(&mut rows, 250_000);

        assert_eq!(result.applied, 250_000);
        assert_eq!(result.unapplied, 0);
        assert_eq!(rows[0].status, InstallmentStatus::Paid);
        assert_eq!(rows[1].status, InstallmentStatus::Paid);
        assert_eq!(rows[2].status, InstallmentStatus::Pending);
        assert_eq!(rows[2].amount_paid, 30_000);
        assert_eq!(rows[3].amount_paid, 0);
        assert_eq!(result.allocations.len(), 3);
    }

    #[test]
    fn test_overdue_installment_is_paid_first() {
        let mut rows = schedule(&[100, 100]);
        rows[0].status = InstallmentStatus::Overdue;
        rows[0].amount_paid = 40;

        let result = allocate(&mut rows, 80);
        assert_eq!(rows[0].status, InstallmentStatus::Paid);
        assert_eq!(rows[1].amount_paid, 20);
        assert_eq!(result.applied, 80);
    }

    #[test]
    fn test_partial_overdue_stays_overdue() {
        let mut rows = schedule(&[100, 100]);
        rows[0].status = InstallmentStatus::Overdue;

        allocate(&mut rows, 30);
        assert_eq!(rows[0].status, InstallmentStatus::Overdue);
        assert_eq!(rows[0].amount_paid, 30);
    }

    #[test]
    fn test_overpayment_is_unapplied() {
        let mut rows = schedule(&[100, 100]);
        let result = allocate(&mut rows, 250);

        assert!(rows.iter().all(Installment::is_paid));
        assert_eq!(result.applied, 200);
        assert_eq!(result.unapplied, 50);
    }

    #[test]
    fn test_never_leaves_a_gap() {
        // Any amount leaves a paid prefix, at most one partial, then untouched rows.
        for amount in (0..=450).step_by(7) {
            let mut rows = schedule(&[100, 100, 100, 100]);
            allocate(&mut rows, amount);

            let first_unpaid = rows.iter().position(|i| !i.is_paid()).unwrap_or(rows.len());
            assert!(rows[..first_unpaid].iter().all(Installment::is_paid));
            assert!(rows
                .iter()
                .skip(first_unpaid + 1)
                .all(|i| i.amount_paid == 0));
        }
    }
}
