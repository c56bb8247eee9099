//! JWT token generation and validation
//!
//! Bearer tokens carry the caller's tenant and role. They are minted by the
//! upstream identity service; `generate_token` exists for operators and tests.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::principal::{Principal, Role};

/// JWT-related errors
#[derive(Error, Debug)]
pub enum JwtError {
    #[error("Token encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Token decoding failed: {0}")]
    DecodingFailed(String),

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// JWT claims
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user or service account)
    pub sub: String,
    /// Tenant the caller acts for: merchant id, partner id, or the operator org
    pub tenant: String,
    /// merchant, partner or admin
    pub role: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

impl Claims {
    pub fn into_principal(self) -> Result<Principal, JwtError> {
        let tenant_id = Uuid::parse_str(&self.tenant)
            .map_err(|e| JwtError::InvalidToken(format!("tenant: {}", e)))?;
        let role = Role::from_claim(&self.role)
            .ok_or_else(|| JwtError::InvalidToken(format!("unknown role {}", self.role)))?;
        Ok(Principal {
            subject: self.sub,
            tenant_id,
            role,
        })
    }
}

/// Verifies bearer tokens against the shared signing secret
#[derive(Clone)]
pub struct TokenVerifier {
    secret: String,
}

impl TokenVerifier {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Principal, JwtError> {
        verify_token(token, &self.secret)?.into_principal()
    }
}

/// Sign a token for a principal
pub fn generate_token(
    principal: &Principal,
    secret: &str,
    ttl_seconds: i64,
) -> Result<String, JwtError> {
    let now = Utc::now();
    let exp = now + Duration::seconds(ttl_seconds);

    let claims = Claims {
        sub: principal.subject.clone(),
        tenant: principal.tenant_id.to_string(),
        role: principal.role.as_str().to_string(),
        iat: now.timestamp(),
        exp: exp.timestamp(),
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| JwtError::EncodingFailed(e.to_string()))
}

/// Verify and decode a JWT token
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, JwtError> {
    let mut validation = Validation::default();
    validation.validate_exp = true;

    let token_data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::TokenExpired,
        _ => JwtError::DecodingFailed(e.to_string()),
    })?;

    Ok(token_data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_round_trips_principal() {
        let principal = Principal::merchant(Uuid::new_v4());
        let token = generate_token(&principal, "test-secret-key", 900).unwrap();

        let decoded = verify_token(&token, "test-secret-key")
            .unwrap()
            .into_principal()
            .unwrap();
        assert_eq!(decoded, principal);
    }

    #[test]
    fn test_wrong_secret() {
        let token = generate_token(&Principal::merchant(Uuid::new_v4()), "secret1", 900).unwrap();
        assert!(verify_token(&token, "secret2").is_err());
    }

    #[test]
    fn test_expired_token() {
        let token = generate_token(&Principal::merchant(Uuid::new_v4()), "secret", -3600).unwrap();
        assert!(matches!(verify_token(&token, "secret"), Err(JwtError::TokenExpired)));
    }

    #[test]
    fn test_system_role_cannot_be_claimed() {
        let token = generate_token(&Principal::system(), "secret", 900).unwrap();
        let claims = verify_token(&token, "secret").unwrap();
        assert!(claims.into_principal().is_err());
    }
}
