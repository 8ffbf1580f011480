//! HMAC-SHA256 request signing shared by callers and the validation middleware.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// `method|path|timestamp|nonce|hex(sha256(body))`
pub fn canonical_payload(method: &str, path: &str, timestamp: i64, nonce: &str, body: &str) -> String {
    let body_hash = hex::encode(Sha256::digest(body.as_bytes()));
    format!("{}|{}|{}|{}|{}", method, path, timestamp, nonce, body_hash)
}

pub fn generate_signature(
    secret: &str,
    method: &str,
    path: &str,
    timestamp: i64,
    nonce: &str,
    body: &str,
) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;
    mac.update(canonical_payload(method, path, timestamp, nonce, body).as_bytes());

    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time check of a hex signature.
pub fn verify_signature(
    secret: &str,
    method: &str,
    path: &str,
    timestamp: i64,
    nonce: &str,
    body: &str,
    signature: &str,
) -> Result<bool, anyhow::Error> {
    let expected = generate_signature(secret, method, path, timestamp, nonce, body)?;

    if expected.len() != signature.len() {
        return Ok(false);
    }

    Ok(expected.as_bytes().ct_eq(signature.as_bytes()).into())
}
