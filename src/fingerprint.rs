//! Signal fingerprint computation.
//!
//! SHA-256 of the canonical JSON payload plus the current UTC minute,
//! first 16 lowercase hex characters. Two requests with identical payloads
//! arriving in the same UTC minute collide by design; this is the intended
//! deduplication granularity and is not "fixed" to a pure rolling window.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::models::SignalPayload;

/// Renders the payload as deterministic JSON: fixed key order, lowercase
/// side, trimmed symbol, size as a plain decimal string with no trailing
/// zeros and no scientific notation.
fn canonical_payload(payload: &SignalPayload) -> String {
    let symbol = payload.symbol.trim();
    let side = payload.side.as_str();
    let size = payload.size.normalize().to_string();
    format!(
        "{{\"symbol\":\"{}\",\"side\":\"{}\",\"size\":\"{}\"}}",
        symbol, side, size
    )
}

pub fn compute(payload: &SignalPayload, received_at: DateTime<Utc>) -> String {
    let minute = received_at.format("%Y-%m-%dT%H:%M").to_string();
    let input = format!("{}:{}", canonical_payload(payload), minute);

    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();

    hex::encode(digest)[..16].to_string()
}
