use serde_json::Value;
use sha2::{Digest, Sha256};

/// Stable hash of a webhook payload for ledger deduplication.
///
/// `serde_json::Map` keeps keys sorted, so two payloads that differ only in
/// key order hash identically.
pub fn payload_fingerprint(platform: &str, event_type: &str, payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(platform.as_bytes());
    hasher.update(b"|");
    hasher.update(event_type.as_bytes());
    hasher.update(b"|");
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}
