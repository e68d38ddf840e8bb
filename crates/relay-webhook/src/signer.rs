//! HMAC-SHA256 signing and verification for webhook payloads.
//!
//! Outbound deliveries are signed over the exact canonical JSON bytes and
//! the hex signature travels in the `X-Webhook-Signature` header. Inbound
//! verification (when this system receives provider webhooks) accepts the
//! common prefixed formats and always compares in constant time to
//! prevent timing side-channels.

use std::fmt;

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signature errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    /// Signature string was empty.
    MissingSignature,
    /// Signature was not raw hex or a known prefixed format.
    InvalidFormat(String),
    /// Secret key was empty or unusable.
    InvalidSecret,
}

impl fmt::Display for SignatureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingSignature => write!(f, "signature is missing"),
            Self::InvalidFormat(format) => write!(f, "invalid signature format: {format}"),
            Self::InvalidSecret => write!(f, "invalid secret key"),
        }
    }
}

impl std::error::Error for SignatureError {}

/// Computes the hex-encoded HMAC-SHA256 signature of a payload.
///
/// # Errors
///
/// Returns [`SignatureError::InvalidSecret`] when the secret is empty.
pub fn sign(payload: &[u8], secret: &str) -> Result<String, SignatureError> {
    if secret.is_empty() {
        return Err(SignatureError::InvalidSecret);
    }
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| SignatureError::InvalidSecret)?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verifies a payload signature using constant-time comparison.
///
/// Accepts `sha256=<hex>` (GitHub style), `v1=<hex>` (Stripe style), or
/// raw hex. Any parse or signing failure verifies as false rather than
/// erroring, so callers get a single boolean decision.
pub fn verify(payload: &[u8], signature: &str, secret: &str) -> bool {
    let Ok(provided) = parse_signature_format(signature) else {
        return false;
    };
    let Ok(expected) = sign(payload, secret) else {
        return false;
    };
    constant_time_eq(&provided, &expected)
}

/// Extracts the raw hex from the supported signature formats.
fn parse_signature_format(signature: &str) -> Result<String, SignatureError> {
    if signature.is_empty() {
        return Err(SignatureError::MissingSignature);
    }

    if let Some(hex) = signature.strip_prefix("sha256=") {
        return Ok(hex.to_string());
    }
    if let Some(hex) = signature.strip_prefix("v1=") {
        return Ok(hex.to_string());
    }
    if signature.len() == 64 && signature.chars().all(|c| c.is_ascii_hexdigit()) {
        return Ok(signature.to_string());
    }

    Err(SignatureError::InvalidFormat(format!(
        "expected 'sha256=<hex>', 'v1=<hex>', or raw hex, got: {signature}"
    )))
}

/// Constant-time string comparison.
///
/// XORs every byte pair so the comparison cost does not depend on where
/// the strings first differ.
fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut diff = 0u8;
    for (a_byte, b_byte) in a.as_bytes().iter().zip(b.as_bytes()) {
        diff |= a_byte ^ b_byte;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_is_deterministic_hex() {
        let first = sign(b"payload", "secret").unwrap();
        let second = sign(b"payload", "secret").unwrap();

        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn verify_round_trip() {
        let payload = b"{\"event_type\":\"payment.updated\"}";
        let signature = sign(payload, "secret").unwrap();

        assert!(verify(payload, &signature, "secret"));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let payload = b"payload";
        let signature = sign(payload, "secret").unwrap();

        assert!(!verify(payload, &signature, "other-secret"));
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let payload = b"payload".to_vec();
        let signature = sign(&payload, "secret").unwrap();

        let mut tampered = payload.clone();
        tampered[0] ^= 0x01;

        assert!(verify(&payload, &signature, "secret"));
        assert!(!verify(&tampered, &signature, "secret"));
    }

    #[test]
    fn verify_accepts_prefixed_formats() {
        let payload = b"payload";
        let hex = sign(payload, "secret").unwrap();

        assert!(verify(payload, &format!("sha256={hex}"), "secret"));
        assert!(verify(payload, &format!("v1={hex}"), "secret"));
    }

    #[test]
    fn verify_rejects_garbage_formats() {
        assert!(!verify(b"payload", "", "secret"));
        assert!(!verify(b"payload", "not-a-signature", "secret"));
    }

    #[test]
    fn empty_secret_rejected() {
        assert_eq!(sign(b"payload", ""), Err(SignatureError::InvalidSecret));
        let signature = sign(b"payload", "secret").unwrap();
        assert!(!verify(b"payload", &signature, ""));
    }

    #[test]
    fn constant_time_eq_basics() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }
}
