//! Stripe webhook signature verification.
//!
//! Verifies the `Stripe-Signature` header (`t=timestamp,v1=signature`)
//! against the raw request body with HMAC-SHA256. Verification happens
//! before any database write; a mismatch is rejected outright and left to
//! the provider's own retry mechanism.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use time::OffsetDateTime;

use crate::error::{EventError, EventResult};

type HmacSha256 = Hmac<Sha256>;

/// Maximum accepted distance between the signature timestamp and now.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Verify a webhook signature against the raw body.
pub fn verify_signature(secret: &str, payload: &[u8], signature_header: &str) -> EventResult<()> {
    verify_signature_at(
        secret,
        payload,
        signature_header,
        OffsetDateTime::now_utc().unix_timestamp(),
    )
}

/// Verification with an explicit clock, for tests.
pub fn verify_signature_at(
    secret: &str,
    payload: &[u8],
    signature_header: &str,
    now: i64,
) -> EventResult<()> {
    // Parse the signature header: t=timestamp,v1=signature,v0=signature
    let mut timestamp: Option<i64> = None;
    let mut v1_signature: Option<&str> = None;

    for part in signature_header.split(',') {
        let mut kv = part.trim().splitn(2, '=');
        match (kv.next(), kv.next()) {
            (Some("t"), Some(value)) => timestamp = value.parse().ok(),
            (Some("v1"), Some(value)) => v1_signature = Some(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| {
        tracing::warn!("Missing timestamp in signature header");
        EventError::SignatureInvalid
    })?;

    let v1_signature = v1_signature.ok_or_else(|| {
        tracing::warn!("Missing v1 signature in signature header");
        EventError::SignatureInvalid
    })?;

    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(
            timestamp = timestamp,
            now = now,
            "Webhook timestamp outside tolerance"
        );
        return Err(EventError::SignatureInvalid);
    }

    // The secret starts with "whsec_"; the remainder is the signing key.
    let secret_key = secret.strip_prefix("whsec_").unwrap_or(secret);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes()).map_err(|_| {
        tracing::error!("Invalid webhook secret key");
        EventError::SignatureInvalid
    })?;
    mac.update(format!("{timestamp}.").as_bytes());
    mac.update(payload);
    let computed = mac.finalize().into_bytes();

    let received = hex::decode(v1_signature).map_err(|_| EventError::SignatureInvalid)?;

    // Constant-time comparison prevents timing attacks on the signature.
    if computed.ct_eq(received.as_slice()).into() {
        Ok(())
    } else {
        tracing::warn!("Webhook signature mismatch");
        Err(EventError::SignatureInvalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test_signing_key";

    fn sign(payload: &[u8], timestamp: i64) -> String {
        let key = SECRET.strip_prefix("whsec_").unwrap();
        let mut mac = HmacSha256::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.").as_bytes());
        mac.update(payload);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn accepts_valid_signature() {
        let payload = br#"{"id":"evt_1","type":"account.updated"}"#;
        let now = 1_700_000_000;
        let header = format!("t={now},v1={}", sign(payload, now));

        assert!(verify_signature_at(SECRET, payload, &header, now).is_ok());
    }

    #[test]
    fn accepts_header_with_extra_schemes() {
        let payload = b"{}";
        let now = 1_700_000_000;
        let header = format!("t={now},v1={},v0=deadbeef", sign(payload, now));

        assert!(verify_signature_at(SECRET, payload, &header, now).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let now = 1_700_000_000;
        let header = format!("t={now},v1={}", sign(b"original", now));

        let err = verify_signature_at(SECRET, b"tampered", &header, now).unwrap_err();
        assert!(matches!(err, EventError::SignatureInvalid));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let payload = b"{}";
        let signed_at = 1_700_000_000;
        let header = format!("t={signed_at},v1={}", sign(payload, signed_at));

        let now = signed_at + SIGNATURE_TOLERANCE_SECS + 1;
        let err = verify_signature_at(SECRET, payload, &header, now).unwrap_err();
        assert!(matches!(err, EventError::SignatureInvalid));
    }

    #[test]
    fn rejects_malformed_header() {
        let err = verify_signature_at(SECRET, b"{}", "garbage", 1_700_000_000).unwrap_err();
        assert!(matches!(err, EventError::SignatureInvalid));

        let err = verify_signature_at(SECRET, b"{}", "t=notanumber,v1=aa", 1_700_000_000)
            .unwrap_err();
        assert!(matches!(err, EventError::SignatureInvalid));
    }

    #[test]
    fn rejects_wrong_secret() {
        let payload = b"{}";
        let now = 1_700_000_000;
        let header = format!("t={now},v1={}", sign(payload, now));

        let err = verify_signature_at("whsec_other_key", payload, &header, now).unwrap_err();
        assert!(matches!(err, EventError::SignatureInvalid));
    }
}
