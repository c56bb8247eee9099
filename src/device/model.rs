//! Device models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Lock status of a financed device
#[derive(Debug, Serialize, Deserialize, sqlx::Type, Clone, Copy, PartialEq, Eq)]
#[sqlx(type_name = "device_status", rename_all = "snake_case")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    PendingSetup,
    Unlocked,
    Locked,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::PendingSetup => "PENDING_SETUP",
            DeviceStatus::Unlocked => "UNLOCKED",
            DeviceStatus::Locked => "LOCKED",
        }
    }
}

impl std::fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device keyed by its hardware identifier (IMEI or serial)
#[derive(Debug, Serialize, Deserialize, sqlx::FromRow, Clone, PartialEq, Eq)]
pub struct Device {
    pub hardware_id: String,
    pub merchant_id: Uuid,
    pub status: DeviceStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to register a device before it is financed
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RegisterDeviceRequest {
    #[validate(length(min = 1, max = 64))]
    pub hardware_id: String,
}

/// What the device agent sees on a status query or heartbeat
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeviceStatusResponse {
    pub hardware_id: String,
    pub status: DeviceStatus,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl From<Device> for DeviceStatusResponse {
    fn from(device: Device) -> Self {
        Self {
            hardware_id: device.hardware_id,
            status: device.status,
            last_heartbeat: device.last_heartbeat,
        }
    }
}

/// Outcome of a coordinator sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeviceSync {
    Changed { from: DeviceStatus, to: DeviceStatus },
    Unchanged { status: DeviceStatus },
    /// Loan status has no device counterpart (PENDING)
    NoTarget,
    /// Device record absent; tolerated during loan transitions
    Missing,
}
