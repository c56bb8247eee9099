//! Application state shared across handlers

use std::sync::Arc;

use axum::extract::FromRef;

use crate::auth::TokenVerifier;
use crate::config::Config;
use crate::device::DeviceLockCoordinator;
use crate::enforcement::EnforcementSweeper;
use crate::loan::{LoanService, LoanStateMachine};
use crate::notification::CustomerNotifier;
use crate::payment::PaymentReconciler;
use crate::store::SharedStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub loan_service: Arc<LoanService>,
    pub reconciler: Arc<PaymentReconciler>,
    pub devices: Arc<DeviceLockCoordinator>,
    pub sweeper: Arc<EnforcementSweeper>,
    pub token_verifier: Arc<TokenVerifier>,
    pub gateway_secret: Option<String>,
    pub device_api_key: Option<String>,
}

impl AppState {
    /// Wire every service over one store.
    pub fn new(config: &Config, store: SharedStore, notifier: Arc<dyn CustomerNotifier>) -> Self {
        let state_machine = LoanStateMachine::new(config.enforcement.grace_period_days);

        Self {
            loan_service: Arc::new(LoanService::new(store.clone(), config.min_down_payment_bps)),
            reconciler: Arc::new(PaymentReconciler::new(store.clone(), state_machine)),
            devices: Arc::new(DeviceLockCoordinator::new(store.clone())),
            sweeper: Arc::new(EnforcementSweeper::new(
                store.clone(),
                state_machine,
                notifier,
                config.enforcement.clone(),
            )),
            token_verifier: Arc::new(TokenVerifier::new(config.jwt_secret.clone())),
            gateway_secret: config.gateway_secret.clone(),
            device_api_key: config.device_api_key.clone(),
            store,
        }
    }
}

impl FromRef<AppState> for Arc<TokenVerifier> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.token_verifier.clone()
    }
}

impl FromRef<AppState> for Arc<LoanService> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.loan_service.clone()
    }
}

impl FromRef<AppState> for Arc<PaymentReconciler> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.reconciler.clone()
    }
}

impl FromRef<AppState> for Arc<DeviceLockCoordinator> {
    fn from_ref(app_state: &AppState) -> Self {
        app_state.devices.clone()
    }
}
