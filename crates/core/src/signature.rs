//! Request signature verification for both inbound webhook sources.
//!
//! GitHub signs the raw body: `X-Hub-Signature-256: sha256=<hex>`.
//! Slack signs a timestamp-salted base string: `v0:<timestamp>:<body>`, sent as
//! `X-Slack-Signature: v0=<hex>`, and requests older than the freshness window
//! are rejected even with a valid signature.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

pub const SLACK_SIGNATURE_VERSION: &str = "v0";
pub const DEFAULT_SLACK_TOLERANCE_SECS: i64 = 300;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SignatureError {
    #[error("signature header is malformed")]
    Malformed,
    #[error("signature does not match payload")]
    Mismatch,
    #[error("request timestamp is not a unix timestamp")]
    InvalidTimestamp,
    #[error("request timestamp is {age_secs}s away from now (tolerance {tolerance_secs}s)")]
    Stale { age_secs: u64, tolerance_secs: i64 },
}

pub fn compute_github_signature(payload: &[u8], secret: &[u8]) -> String {
    format!("sha256={}", hmac_hex(secret, &[payload]))
}

/// Verifies a GitHub `sha256=<hex>` signature with constant-time comparison.
pub fn verify_github_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &[u8],
) -> Result<(), SignatureError> {
    let hex_sig = signature_header.trim().strip_prefix("sha256=").ok_or(SignatureError::Malformed)?;
    let expected = hex::decode(hex_sig).map_err(|_| SignatureError::Malformed)?;
    verify_parts(secret, &[payload], &expected)
}

pub fn compute_slack_signature(timestamp: &str, body: &[u8], signing_secret: &[u8]) -> String {
    let prefix = format!("{SLACK_SIGNATURE_VERSION}:{timestamp}:");
    format!("{SLACK_SIGNATURE_VERSION}={}", hmac_hex(signing_secret, &[prefix.as_bytes(), body]))
}

/// Verifies a Slack request signature. `now_unix` is injected so callers and
/// tests control the clock.
pub fn verify_slack_signature(
    timestamp: &str,
    body: &[u8],
    signature_header: &str,
    signing_secret: &[u8],
    now_unix: i64,
    tolerance_secs: i64,
) -> Result<(), SignatureError> {
    let sent_at = timestamp.trim().parse::<i64>().map_err(|_| SignatureError::InvalidTimestamp)?;
    let age_secs = now_unix.abs_diff(sent_at);
    if age_secs > tolerance_secs.max(0).unsigned_abs() {
        return Err(SignatureError::Stale { age_secs, tolerance_secs });
    }

    let hex_sig = signature_header
        .trim()
        .strip_prefix(SLACK_SIGNATURE_VERSION)
        .and_then(|rest| rest.strip_prefix('='))
        .ok_or(SignatureError::Malformed)?;
    let expected = hex::decode(hex_sig).map_err(|_| SignatureError::Malformed)?;
    let prefix = format!("{SLACK_SIGNATURE_VERSION}:{}:", timestamp.trim());
    verify_parts(signing_secret, &[prefix.as_bytes(), body], &expected)
}

fn verify_parts(secret: &[u8], parts: &[&[u8]], expected: &[u8]) -> Result<(), SignatureError> {
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::Mismatch)?;
    for part in parts {
        mac.update(part);
    }
    mac.verify_slice(expected).map_err(|_| SignatureError::Mismatch)
}

fn hmac_hex(secret: &[u8], parts: &[&[u8]]) -> String {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return String::new();
    };
    for part in parts {
        mac.update(part);
    }
    hex::encode(mac.finalize().into_bytes())
}
