//! Customer notifications
//!
//! Delivered fire-and-forget after a loan change has committed. A failed
//! notification is logged and never affects loan state.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Default notice sent to the customer when the device is locked
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DefaultNotice {
    pub loan_id: Uuid,
    pub customer_id: Uuid,
    pub device_id: String,
    pub overdue_amount: i64,
    pub defaulted_at: DateTime<Utc>,
}

#[async_trait]
pub trait CustomerNotifier: Send + Sync {
    async fn notify_default(&self, notice: DefaultNotice) -> anyhow::Result<()>;
}

/// Writes notices to the log; stands in for the SMS gateway.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl CustomerNotifier for LogNotifier {
    async fn notify_default(&self, notice: DefaultNotice) -> anyhow::Result<()> {
        tracing::info!(
            loan_id = %notice.loan_id,
            customer_id = %notice.customer_id,
            device_id = %notice.device_id,
            overdue_amount = notice.overdue_amount,
            "Default notice queued for customer"
        );
        Ok(())
    }
}
