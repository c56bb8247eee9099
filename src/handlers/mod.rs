//! API handlers

mod admin;
mod devices;
mod health;
mod loans;
mod payments;

pub use admin::*;
pub use devices::*;
pub use health::health_check;
pub use loans::*;
pub use payments::gateway_payment;
