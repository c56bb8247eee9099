//! Loans, their installment schedules and the state machine that drives them

mod model;
mod service;
mod state_machine;

pub use model::{
    CreateLoanRequest, Installment, InstallmentStatus, ListLoansQuery, Loan, LoanStateView,
    LoanStatus, StatusChange,
};
pub use service::LoanService;
pub use state_machine::{LoanStateMachine, TransitionRecord};
