//! EXTERNAL SASL mechanism (RFC 4422 Appendix A).
//!
//! The client proves identity via its TLS certificate; the single payload
//! is an optional authorization identity.

use super::SaslError;

/// Parse a decoded EXTERNAL payload into the optional authzid.
pub fn parse_external(payload: &[u8]) -> Result<Option<String>, SaslError> {
    if payload.is_empty() {
        return Ok(None);
    }
    std::str::from_utf8(payload)
        .map(|s| Some(s.to_owned()))
        .map_err(|_| SaslError::InvalidEncoding)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_is_no_authzid() {
        assert_eq!(parse_external(b"").unwrap(), None);
    }

    #[test]
    fn payload_is_authzid() {
        assert_eq!(parse_external(b"alice").unwrap(), Some("alice".into()));
    }

    #[test]
    fn rejects_non_utf8() {
        assert!(parse_external(b"\xff\xfe").is_err());
    }
}
