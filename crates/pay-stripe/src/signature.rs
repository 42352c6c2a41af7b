//! # Webhook Signature Verification
//!
//! Stripe signs every webhook with `Stripe-Signature: t=<unix>,v1=<hex>`,
//! where `v1` is HMAC-SHA256 over `"{t}.{raw body}"` keyed by the endpoint
//! secret. A payload is accepted only if one `v1` matches and `t` is within
//! the tolerance window.

use hmac::{Hmac, Mac};
use pay_core::{constant_time_compare, PaymentError, PaymentResult};
use sha2::Sha256;

/// Replay window in seconds
pub const DEFAULT_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug)]
pub(crate) struct SignatureHeader {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

pub(crate) fn parse_signature_header(header: &str) -> PaymentResult<SignatureHeader> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => timestamp = value.parse().ok(),
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| PaymentError::rejected("stripe", "missing timestamp in signature"))?;

    if signatures.is_empty() {
        return Err(PaymentError::rejected("stripe", "no v1 signature found"));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

pub(crate) fn compute_hmac_sha256(secret: &str, message: &[u8]) -> PaymentResult<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| PaymentError::Configuration(format!("invalid webhook secret: {}", e)))?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a raw webhook body against its `Stripe-Signature` header.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> PaymentResult<()> {
    let parsed = parse_signature_header(header)?;

    if (now - parsed.timestamp).abs() > tolerance_secs {
        return Err(PaymentError::rejected("stripe", "timestamp outside tolerance"));
    }

    let mut signed = parsed.timestamp.to_string().into_bytes();
    signed.push(b'.');
    signed.extend_from_slice(payload);
    let expected = compute_hmac_sha256(secret, &signed)?;

    if parsed
        .signatures
        .iter()
        .any(|sig| constant_time_compare(sig, &expected))
    {
        Ok(())
    } else {
        Err(PaymentError::rejected("stripe", "signature mismatch"))
    }
}

/// Build a valid header for `payload` (used by tests and local tooling)
pub fn sign_payload(payload: &[u8], secret: &str, timestamp: i64) -> PaymentResult<String> {
    let mut signed = timestamp.to_string().into_bytes();
    signed.push(b'.');
    signed.extend_from_slice(payload);
    Ok(format!(
        "t={},v1={}",
        timestamp,
        compute_hmac_sha256(secret, &signed)?
    ))
}
