use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Zoom rejects requests whose timestamp drifts further than this.
pub const MAX_TIMESTAMP_SKEW_SECS: i64 = 300;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("webhook secret is not configured")]
    NotConfigured,
    #[error("missing signature headers")]
    MissingHeaders,
    #[error("request timestamp is malformed")]
    BadTimestamp,
    #[error("request timestamp is outside the allowed window")]
    Expired,
    #[error("signature does not match")]
    Mismatch,
}

/// Checks `x-zm-signature` (`v0=<hex>`) over `v0:{timestamp}:{body}`.
pub fn verify_zoom_signature(
    secret: &str,
    timestamp: &str,
    body: &[u8],
    signature_header: &str,
    now_unix: i64,
) -> Result<(), SignatureError> {
    let ts: i64 = timestamp
        .trim()
        .parse()
        .map_err(|_| SignatureError::BadTimestamp)?;
    if (now_unix - ts).abs() > MAX_TIMESTAMP_SKEW_SECS {
        return Err(SignatureError::Expired);
    }

    let expected = signature_header
        .strip_prefix("v0=")
        .and_then(|hex_sig| hex::decode(hex_sig).ok())
        .ok_or(SignatureError::Mismatch)?;

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::NotConfigured)?;
    mac.update(b"v0:");
    mac.update(timestamp.trim().as_bytes());
    mac.update(b":");
    mac.update(body);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Mismatch)
}

/// Answers Zoom's `endpoint.url_validation` challenge.
pub fn zoom_encrypted_token(secret: &str, plain_token: &str) -> String {
    hex::encode(hmac_sha256(secret.as_bytes(), plain_token.as_bytes()))
}

pub fn zoom_signature_header(secret: &str, timestamp: &str, body: &[u8]) -> String {
    let mut message = format!("v0:{timestamp}:").into_bytes();
    message.extend_from_slice(body);
    format!("v0={}", hex::encode(hmac_sha256(secret.as_bytes(), &message)))
}

/// Compares shared secrets (Teams clientState, cron secret) without
/// short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> Vec<u8> {
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return Vec::new(),
    };
    mac.update(message);
    mac.finalize().into_bytes().to_vec()
}
