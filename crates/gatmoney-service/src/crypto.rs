//! Webhook signing primitives.
//!
//! Payment webhooks carry a `t=<unix-ts>,v1=<hex>` header whose `v1` value is
//! HMAC-SHA256 over `"{t}.{body}"`. Several `v1` values may be present while a
//! secret is being rotated.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// A parsed signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader<'a> {
    /// The `t=` value, as sent.
    pub timestamp: &'a str,
    /// Every `v1=` value.
    pub signatures: Vec<&'a str>,
}

/// Split a `t=...,v1=...` header. Unknown parts are ignored.
///
/// Returns `None` when the timestamp or all signatures are missing.
#[must_use]
pub fn parse_signature_header(header: &str) -> Option<SignatureHeader<'_>> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", ts)) => timestamp = Some(ts),
            Some(("v1", sig)) => signatures.push(sig),
            _ => {}
        }
    }

    if signatures.is_empty() {
        return None;
    }
    Some(SignatureHeader {
        timestamp: timestamp?,
        signatures,
    })
}

/// Compute HMAC-SHA256 and return it hex-encoded (64 characters).
///
/// # Panics
///
/// Never in practice: HMAC accepts keys of any length.
#[must_use]
pub fn hmac_sha256_hex(secret: &str, message: &str) -> String {
    // INVARIANT: HMAC-SHA256 accepts keys of any size per RFC 2104.
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC-SHA256 accepts any key size");
    mac.update(message.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Build the signature header a sender would attach to `payload`.
#[must_use]
pub fn sign_payload(secret: &str, timestamp: i64, payload: &str) -> String {
    let signature = hmac_sha256_hex(secret, &format!("{timestamp}.{payload}"));
    format!("t={timestamp},v1={signature}")
}

/// Check `payload` against a signature header.
#[must_use]
pub fn verify_payload(secret: &str, header: &str, payload: &str) -> bool {
    let Some(parsed) = parse_signature_header(header) else {
        return false;
    };
    let expected = hmac_sha256_hex(secret, &format!("{}.{payload}", parsed.timestamp));
    parsed
        .signatures
        .iter()
        .any(|sig| constant_time_eq(&expected, sig))
}

/// Compare two strings without short-circuiting on the first difference.
#[must_use]
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
