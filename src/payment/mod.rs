//! Payment ledger and reconciliation

mod allocation;
mod model;
mod reconciler;

pub use allocation::{allocate, Allocation};
pub use model::{
    GatewayPaymentNotification, InstallmentAllocation, PaymentChannel, PaymentCommand,
    PaymentStatus, PaymentTransaction, PaymentType, ReconciliationResult, RecordPaymentRequest,
};
pub use reconciler::PaymentReconciler;
