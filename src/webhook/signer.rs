//! HMAC-SHA256 request signing
//!
//! Outgoing partner webhooks and the incoming gateway callback share one
//! scheme: hex HMAC-SHA256 of the raw body, sent as `sha256=<hex>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SCHEME_PREFIX: &str = "sha256=";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("signing key rejected")]
pub struct SigningKeyError;

fn mac_for(secret: &str) -> Result<HmacSha256, SigningKeyError> {
    HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SigningKeyError)
}

/// Hex-encoded HMAC of `body`
pub fn sign(secret: &str, body: &[u8]) -> Result<String, SigningKeyError> {
    let mut mac = mac_for(secret)?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Value for a signature header
pub fn signature_header(secret: &str, body: &[u8]) -> Result<String, SigningKeyError> {
    Ok(format!("{}{}", SCHEME_PREFIX, sign(secret, body)?))
}

/// Constant-time check of a `sha256=<hex>` (or bare hex) signature.
pub fn verify(secret: &str, body: &[u8], signature: &str) -> bool {
    let hex_part = signature.trim().trim_start_matches(SCHEME_PREFIX);
    let Ok(expected) = hex::decode(hex_part) else {
        return false;
    };
    let Ok(mut mac) = mac_for(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}
