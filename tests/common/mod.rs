//! Shared fixtures for the integration tests

#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use devicelend_server::auth::Principal;
use devicelend_server::config::Config;
use devicelend_server::device::{Device, RegisterDeviceRequest};
use devicelend_server::error::LendingError;
use devicelend_server::loan::{CreateLoanRequest, Loan};
use devicelend_server::notification::{CustomerNotifier, DefaultNotice};
use devicelend_server::payment::{PaymentChannel, PaymentCommand, ReconciliationResult};
use devicelend_server::state::AppState;
use devicelend_server::store::{InMemoryLedger, SharedStore};

pub fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap()
}

/// Collects default notices instead of sending them
#[derive(Default)]
pub struct RecordingNotifier {
    pub notices: Mutex<Vec<DefaultNotice>>,
}

#[async_trait::async_trait]
impl CustomerNotifier for RecordingNotifier {
    async fn notify_default(&self, notice: DefaultNotice) -> anyhow::Result<()> {
        self.notices.lock().await.push(notice);
        Ok(())
    }
}

pub struct Harness {
    pub ledger: Arc<InMemoryLedger>,
    pub store: SharedStore,
    pub state: AppState,
    pub config: Config,
    pub notifier: Arc<RecordingNotifier>,
    pub merchant: Principal,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let store: SharedStore = ledger.clone();
        let notifier = Arc::new(RecordingNotifier::default());
        let state = AppState::new(&config, store.clone(), notifier.clone());
        Self {
            ledger,
            store,
            state,
            config,
            notifier,
            merchant: Principal::merchant(Uuid::new_v4()),
        }
    }

    pub async fn register_device(&self, hardware_id: &str) -> Device {
        self.state
            .devices
            .register_device(
                &self.merchant,
                RegisterDeviceRequest {
                    hardware_id: hardware_id.to_string(),
                },
                at(2024, 1, 10),
            )
            .await
            .unwrap()
    }

    /// 500 000 financed, 100 000 down, 4 months at 250 bps: four installments of 110 000
    /// due on the 15th of February through May 2024.
    pub fn standard_terms(hardware_id: &str, partner: Option<Uuid>) -> CreateLoanRequest {
        CreateLoanRequest {
            customer_id: Uuid::new_v4(),
            device_id: hardware_id.to_string(),
            financed_amount: 500_000,
            down_payment: 100_000,
            tenure_months: 4,
            interest_rate_bps: 250,
            financing_partner_id: partner,
        }
    }

    pub async fn standard_loan(&self, hardware_id: &str, partner: Option<Uuid>) -> Loan {
        self.register_device(hardware_id).await;
        self.state
            .loan_service
            .create_loan(
                &self.merchant,
                Self::standard_terms(hardware_id, partner),
                at(2024, 1, 15),
            )
            .await
            .unwrap()
    }

    /// A standard loan with its down payment received on January 16th
    pub async fn active_loan(&self, hardware_id: &str, partner: Option<Uuid>) -> Loan {
        let loan = self.standard_loan(hardware_id, partner).await;
        self.pay(loan.id, 100_000, Some("DP-1"), at(2024, 1, 16))
            .await
            .unwrap();
        loan
    }

    pub async fn pay(
        &self,
        loan_id: Uuid,
        amount: i64,
        reference: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ReconciliationResult, LendingError> {
        self.pay_as(&self.merchant, loan_id, amount, reference, now).await
    }

    pub async fn pay_as(
        &self,
        principal: &Principal,
        loan_id: Uuid,
        amount: i64,
        reference: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ReconciliationResult, LendingError> {
        self.state
            .reconciler
            .record_payment(
                principal,
                PaymentCommand {
                    loan_id,
                    amount,
                    reference: reference.map(str::to_string),
                    channel: PaymentChannel::Cash,
                },
                now,
            )
            .await
    }
}
