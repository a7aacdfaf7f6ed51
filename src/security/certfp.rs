//! TLS certificate fingerprint handling.
//!
//! Fingerprints are SHA-256 over the peer's DER certificate, carried as
//! uppercase hex. The colon-separated presentation form is accepted on
//! input; comparison always happens on the normalized form with
//! constant-time equality.

use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Compute the normalized fingerprint of a DER certificate.
pub fn fingerprint_der(der: &[u8]) -> String {
    let digest = Sha256::digest(der);
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{b:02X}"));
    }
    out
}

/// Normalize a fingerprint: strip colons, uppercase hex.
pub fn normalize(fp: &str) -> String {
    fp.chars()
        .filter(|c| *c != ':')
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Constant-time comparison of two fingerprints in any accepted form.
pub fn eq(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    a.len() == b.len() && a.as_bytes().ct_eq(b.as_bytes()).unwrap_u8() == 1
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_strips_colons_and_uppercases() {
        assert_eq!(normalize("ab:cd:0f"), "ABCD0F");
        assert_eq!(normalize("ABCD0F"), "ABCD0F");
    }

    #[test]
    fn comparison_accepts_both_forms() {
        assert!(eq("AB:CD:0F", "abcd0f"));
        assert!(!eq("ABCD0F", "ABCD0E"));
        assert!(!eq("ABCD", "ABCD0F"));
    }

    #[test]
    fn der_fingerprint_is_uppercase_hex() {
        let fp = fingerprint_der(b"not-actually-der");
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
    }
}
