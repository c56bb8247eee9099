//! Authentication and tenant authorization
//!
//! - JWT bearer tokens naming a tenant and a role
//! - `Principal` checks applied by every lending operation

mod jwt;
mod principal;

pub use jwt::{generate_token, verify_token, Claims, JwtError, TokenVerifier};
pub use principal::{Principal, Role};
