//! Device lock coordinator
//!
//! Derives the required device status from the loan status and persists it.
//! The stored status is what the on-device agent obeys; agents only ever read
//! it (status query or heartbeat), they never write it.

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use super::model::{Device, DeviceStatus, DeviceStatusResponse, DeviceSync, RegisterDeviceRequest};
use crate::auth::{Principal, Role};
use crate::error::LendingError;
use crate::loan::LoanStatus;
use crate::store::{SharedStore, UnitOfWork};

#[derive(Clone)]
pub struct DeviceLockCoordinator {
    store: SharedStore,
}

impl DeviceLockCoordinator {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Device status a loan status demands. PENDING loans leave the device alone.
    pub fn target_status(loan_status: LoanStatus) -> Option<DeviceStatus> {
        match loan_status {
            LoanStatus::Active | LoanStatus::Completed => Some(DeviceStatus::Unlocked),
            LoanStatus::Defaulted => Some(DeviceStatus::Locked),
            LoanStatus::Pending => None,
        }
    }

    /// Bring the device in line with `loan_status` inside the caller's unit.
    ///
    /// Writes only when the stored status differs, so re-running after a
    /// partial failure is harmless. Fails with `DeviceNotFound` when the
    /// device has no record.
    pub async fn sync_to_loan_status(
        uow: &mut dyn UnitOfWork,
        hardware_id: &str,
        loan_status: LoanStatus,
        now: DateTime<Utc>,
    ) -> Result<DeviceSync, LendingError> {
        let device = uow
            .lock_device(hardware_id)
            .await?
            .ok_or_else(|| LendingError::DeviceNotFound(hardware_id.to_string()))?;

        let Some(target) = Self::target_status(loan_status) else {
            return Ok(DeviceSync::NoTarget);
        };

        if device.status == target {
            return Ok(DeviceSync::Unchanged { status: target });
        }

        uow.set_device_status(hardware_id, target, now).await?;
        info!(
            hardware_id = %hardware_id,
            from = %device.status,
            to = %target,
            loan_status = %loan_status,
            "Device status updated"
        );

        Ok(DeviceSync::Changed {
            from: device.status,
            to: target,
        })
    }

    /// Register a device for the calling merchant in PENDING_SETUP.
    pub async fn register_device(
        &self,
        principal: &Principal,
        request: RegisterDeviceRequest,
        now: DateTime<Utc>,
    ) -> Result<Device, LendingError> {
        if principal.role != Role::Merchant {
            return Err(LendingError::Validation(
                "devices are registered by merchants".to_string(),
            ));
        }

        let device = Device {
            hardware_id: request.hardware_id.trim().to_string(),
            merchant_id: principal.tenant_id,
            status: DeviceStatus::PendingSetup,
            last_heartbeat: None,
            registered_at: now,
            updated_at: now,
        };

        let mut uow = self.store.begin().await?;
        uow.insert_device(&device).await?;
        uow.commit().await?;

        info!(hardware_id = %device.hardware_id, merchant_id = %device.merchant_id, "Device registered");
        Ok(device)
    }

    /// Record liveness and return the status the agent must apply.
    pub async fn record_heartbeat(
        &self,
        hardware_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DeviceStatusResponse, LendingError> {
        let device = self
            .store
            .touch_heartbeat(hardware_id, now)
            .await?
            .ok_or_else(|| LendingError::DeviceNotFound(hardware_id.to_string()))?;
        Ok(device.into())
    }

    pub async fn device_status(&self, hardware_id: &str) -> Result<DeviceStatusResponse, LendingError> {
        let device = self
            .store
            .get_device(hardware_id)
            .await?
            .ok_or_else(|| LendingError::DeviceNotFound(hardware_id.to_string()))?;
        Ok(device.into())
    }

    /// Remove a device that is not bound to any open loan.
    pub async fn deregister_device(
        &self,
        principal: &Principal,
        hardware_id: &str,
    ) -> Result<(), LendingError> {
        let mut uow = self.store.begin().await?;
        let device = uow
            .lock_device(hardware_id)
            .await?
            .ok_or_else(|| LendingError::DeviceNotFound(hardware_id.to_string()))?;

        if !principal.is_privileged() && principal.tenant_id != device.merchant_id {
            warn!(
                target: "security",
                subject = %principal.subject,
                hardware_id = %hardware_id,
                "Cross-tenant device deregistration rejected"
            );
            return Err(LendingError::DeviceNotFound(hardware_id.to_string()));
        }

        if let Some(loan) = uow.open_loan_for_device(hardware_id).await? {
            return Err(LendingError::Conflict(format!(
                "device {} is bound to open loan {}",
                hardware_id, loan.id
            )));
        }

        uow.delete_device(hardware_id).await?;
        uow.commit().await?;
        info!(hardware_id = %hardware_id, "Device deregistered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryLedger, LedgerStore};
    use std::sync::Arc;
    use uuid::Uuid;

    #[test]
    fn test_target_mapping() {
        assert_eq!(
            DeviceLockCoordinator::target_status(LoanStatus::Active),
            Some(DeviceStatus::Unlocked)
        );
        assert_eq!(
            DeviceLockCoordinator::target_status(LoanStatus::Completed),
            Some(DeviceStatus::Unlocked)
        );
        assert_eq!(
            DeviceLockCoordinator::target_status(LoanStatus::Defaulted),
            Some(DeviceStatus::Locked)
        );
        assert_eq!(DeviceLockCoordinator::target_status(LoanStatus::Pending), None);
    }

    #[tokio::test]
    async fn test_sync_is_idempotent() {
        let store = Arc::new(InMemoryLedger::new());
        let coordinator = DeviceLockCoordinator::new(store.clone());
        let merchant = Principal::merchant(Uuid::new_v4());
        coordinator
            .register_device(
                &merchant,
                RegisterDeviceRequest {
                    hardware_id: "IMEI-9".to_string(),
                },
                Utc::now(),
            )
            .await
            .unwrap();

        let mut uow = store.begin().await.unwrap();
        let first = DeviceLockCoordinator::sync_to_loan_status(
            uow.as_mut(),
            "IMEI-9",
            LoanStatus::Defaulted,
            Utc::now(),
        )
        .await
        .unwrap();
        let second = DeviceLockCoordinator::sync_to_loan_status(
            uow.as_mut(),
            "IMEI-9",
            LoanStatus::Defaulted,
            Utc::now(),
        )
        .await
        .unwrap();
        uow.commit().await.unwrap();

        assert_eq!(
            first,
            DeviceSync::Changed {
                from: DeviceStatus::PendingSetup,
                to: DeviceStatus::Locked
            }
        );
        assert_eq!(second, DeviceSync::Unchanged { status: DeviceStatus::Locked });
        assert_eq!(
            coordinator.device_status("IMEI-9").await.unwrap().status,
            DeviceStatus::Locked
        );
    }

    #[tokio::test]
    async fn test_duplicate_registration_conflicts() {
        let coordinator = DeviceLockCoordinator::new(Arc::new(InMemoryLedger::new()));
        let merchant = Principal::merchant(Uuid::new_v4());
        let request = RegisterDeviceRequest {
            hardware_id: "IMEI-3".to_string(),
        };

        coordinator
            .register_device(&merchant, request.clone(), Utc::now())
            .await
            .unwrap();
        let err = coordinator
            .register_device(&merchant, request, Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, LendingError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_heartbeat_for_unknown_device() {
        let coordinator = DeviceLockCoordinator::new(Arc::new(InMemoryLedger::new()));
        let err = coordinator.record_heartbeat("ghost", Utc::now()).await.unwrap_err();
        assert_eq!(err, LendingError::DeviceNotFound("ghost".to_string()));
    }
}
