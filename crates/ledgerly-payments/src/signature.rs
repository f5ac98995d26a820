//! HMAC-SHA256 signing and constant-time verification.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac_over(secret: &[u8], parts: &[&[u8]]) -> Option<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    for part in parts {
        mac.update(part);
    }
    Some(mac)
}

/// Hex HMAC-SHA256 of the concatenated parts.
pub fn sign_hex(secret: &[u8], parts: &[&[u8]]) -> String {
    mac_over(secret, parts)
        .map(|mac| hex::encode(mac.finalize().into_bytes()))
        .unwrap_or_default()
}

/// Whether `signature_hex` is the HMAC of the parts. Comparison is constant-time.
pub fn verify_hex(secret: &[u8], parts: &[&[u8]], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        return false;
    };
    mac_over(secret, parts)
        .map(|mac| mac.verify_slice(&expected).is_ok())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let sig = sign_hex(b"Jefe", &[b"what do ya want ", b"for nothing?"]);
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_verify_accepts_matching_signature() {
        let sig = sign_hex(b"key", &[b"body"]);
        assert!(verify_hex(b"key", &[b"body"], &sig));
        assert!(verify_hex(b"key", &[b"body"], &sig.to_uppercase()));
    }

    #[test]
    fn test_verify_rejects_tampering() {
        let sig = sign_hex(b"key", &[b"body"]);
        assert!(!verify_hex(b"key", &[b"body!"], &sig));
        assert!(!verify_hex(b"other", &[b"body"], &sig));
        assert!(!verify_hex(b"key", &[b"body"], "not-hex"));
        assert!(!verify_hex(b"key", &[b"body"], ""));
    }
}
