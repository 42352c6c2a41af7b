//! # Request Signing
//!
//! Requests and callbacks carry a `sign` field: hex HMAC-SHA256, keyed by
//! the merchant private key, over the remaining fields sorted by name and
//! joined as `key=value&key=value`.

use hmac::{Hmac, Mac};
use pay_core::{constant_time_compare, PaymentError, PaymentResult};
use sha2::Sha256;
use std::collections::BTreeMap;

pub const SIGN_FIELD: &str = "sign";

type HmacSha256 = Hmac<Sha256>;

/// Canonical string over every field except `sign`
fn canonical(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .filter(|(k, _)| k.as_str() != SIGN_FIELD)
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// Compute the signature for a set of fields
pub fn sign(fields: &BTreeMap<String, String>, private_key: &str) -> PaymentResult<String> {
    let mut mac = HmacSha256::new_from_slice(private_key.as_bytes())
        .map_err(|e| PaymentError::Configuration(format!("invalid private key: {}", e)))?;
    mac.update(canonical(fields).as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check the `sign` field of a received set of fields
pub fn verify(fields: &BTreeMap<String, String>, private_key: &str) -> PaymentResult<()> {
    let provided = fields
        .get(SIGN_FIELD)
        .ok_or_else(|| PaymentError::rejected("spectrocoin", "missing sign field"))?;

    let expected = sign(fields, private_key)?;
    if !constant_time_compare(&expected, &provided.to_ascii_lowercase()) {
        return Err(PaymentError::rejected("spectrocoin", "signature mismatch"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> BTreeMap<String, String> {
        [("orderId", "cart_1"), ("merchantId", "m-1"), ("status", "3")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_canonical_is_sorted_and_skips_sign() {
        let mut f = fields();
        f.insert(SIGN_FIELD.to_string(), "whatever".to_string());
        assert_eq!(canonical(&f), "merchantId=m-1&orderId=cart_1&status=3");
    }

    #[test]
    fn test_verify() {
        let mut f = fields();
        let signature = sign(&f, "key").unwrap();
        f.insert(SIGN_FIELD.to_string(), signature.to_uppercase());
        assert!(verify(&f, "key").is_ok());
        assert!(verify(&f, "other-key").is_err());

        f.insert("status".to_string(), "4".to_string());
        assert!(matches!(
            verify(&f, "key"),
            Err(PaymentError::ProviderRejected { .. })
        ));

        assert!(verify(&fields(), "key").is_err());
    }
}
