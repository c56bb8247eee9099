//! HTTP middleware
//!
//! Request tracing and authentication extractors.

pub mod auth;
mod tracing;

pub use auth::{require_shared_key, AdminPrincipal, AuthenticatedPrincipal};
pub use tracing::request_tracing;
