//! Authentication extractors
//!
//! Bearer-token verification yielding the caller's [`Principal`], plus the
//! shared-key check used by device agents.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use serde::Serialize;
use std::sync::Arc;

use crate::auth::{JwtError, Principal, Role, TokenVerifier};
use crate::error::ApiError;

/// Error response for authentication failures
#[derive(Debug, Serialize)]
struct AuthError {
    error: AuthErrorDetails,
}

#[derive(Debug, Serialize)]
struct AuthErrorDetails {
    code: String,
    message: String,
}

impl AuthError {
    fn new(code: &str, message: &str) -> Self {
        Self {
            error: AuthErrorDetails {
                code: code.to_string(),
                message: message.to_string(),
            },
        }
    }

    fn with_status(self, status: StatusCode) -> Response {
        (status, Json(self)).into_response()
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        self.with_status(StatusCode::UNAUTHORIZED)
    }
}

/// Caller identified by a verified bearer token
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedPrincipal
where
    Arc<TokenVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    AuthError::new(
                        "MISSING_TOKEN",
                        "Authorization header with Bearer token required",
                    )
                    .into_response()
                })?;

        let verifier = Arc::<TokenVerifier>::from_ref(state);
        let principal = verifier.verify(bearer.token()).map_err(|e| {
            let (code, message) = match e {
                JwtError::TokenExpired => ("TOKEN_EXPIRED", "Token has expired"),
                _ => ("INVALID_TOKEN", "Invalid token"),
            };
            AuthError::new(code, message).into_response()
        })?;

        Ok(AuthenticatedPrincipal(principal))
    }
}

/// Caller holding the admin role
#[derive(Debug, Clone)]
pub struct AdminPrincipal(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for AdminPrincipal
where
    Arc<TokenVerifier>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthenticatedPrincipal(principal) =
            AuthenticatedPrincipal::from_request_parts(parts, state).await?;

        if principal.role != Role::Admin {
            tracing::warn!(
                target: "security",
                subject = %principal.subject,
                role = principal.role.as_str(),
                "Admin endpoint called without admin role"
            );
            return Err(AuthError::new("FORBIDDEN", "Admin access required")
                .with_status(StatusCode::FORBIDDEN));
        }

        Ok(AdminPrincipal(principal))
    }
}

/// Check a shared-key header. Fails closed when no key is configured.
pub fn require_shared_key(
    headers: &HeaderMap,
    header: &str,
    configured: Option<&str>,
) -> Result<(), ApiError> {
    match configured {
        Some(key) if !key.is_empty() => {
            let presented = headers
                .get(header)
                .and_then(|h| h.to_str().ok())
                .unwrap_or_default();
            if presented != key {
                return Err(ApiError::Unauthorized(format!("invalid {}", header)));
            }
            Ok(())
        }
        _ => {
            tracing::error!("{} not configured - rejecting request", header);
            Err(ApiError::ServiceUnavailable(format!(
                "{} authentication is not configured",
                header
            )))
        }
    }
}
