//! HMAC-SHA-256 webhook signature verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Verifies a `X-Hub-Signature-256` header against `payload` using `secret`.
///
/// Rejects, in order, a missing secret, a missing header, a wrong prefix, a
/// hex digest of the wrong length, and finally a constant-time comparison
/// mismatch. No part of `payload` is trusted until this returns `true`.
#[must_use]
pub fn verify_signature(secret: Option<&str>, header: Option<&str>, payload: &[u8]) -> bool {
    let Some(secret) = secret else { return false };
    let Some(header) = header else { return false };
    let Some(hex_digest) = header.strip_prefix(SIGNATURE_PREFIX) else {
        return false;
    };

    let Ok(expected_bytes) = hex::decode(hex_digest) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(payload);

    mac.verify_slice(&expected_bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_correctly_signed_payload() {
        let payload = br#"{"hello":"world"}"#;
        let header = sign("topsecret", payload);
        assert!(verify_signature(Some("topsecret"), Some(&header), payload));
    }

    #[test]
    fn rejects_missing_secret() {
        let payload = b"{}";
        let header = sign("topsecret", payload);
        assert!(!verify_signature(None, Some(&header), payload));
    }

    #[test]
    fn rejects_missing_header() {
        assert!(!verify_signature(Some("topsecret"), None, b"{}"));
    }

    #[test]
    fn rejects_wrong_prefix() {
        assert!(!verify_signature(Some("topsecret"), Some("md5=deadbeef"), b"{}"));
    }

    #[test]
    fn rejects_tampered_payload() {
        let payload = b"original";
        let header = sign("topsecret", payload);
        assert!(!verify_signature(Some("topsecret"), Some(&header), b"tampered"));
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!(!verify_signature(Some("topsecret"), Some("sha256=not-hex"), b"{}"));
    }
}
