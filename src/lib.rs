//! Device-financing loan engine
//!
//! Loan lifecycle, installment schedules, payment reconciliation, overdue
//! enforcement with remote device locking, and signed partner webhooks.

pub mod auth;
pub mod config;
pub mod db;
pub mod device;
pub mod enforcement;
pub mod error;
pub mod handlers;
pub mod loan;
pub mod middleware;
pub mod models;
pub mod notification;
pub mod payment;
pub mod routes;
pub mod schedule;
pub mod state;
pub mod store;
pub mod webhook;
