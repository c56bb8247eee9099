//! Financed devices and their lock state

mod coordinator;
mod model;

pub use coordinator::DeviceLockCoordinator;
pub use model::{Device, DeviceStatus, DeviceStatusResponse, DeviceSync, RegisterDeviceRequest};
