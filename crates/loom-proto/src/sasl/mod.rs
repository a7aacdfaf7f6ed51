//! Server-side SASL mechanisms.
//!
//! The AUTHENTICATE subprotocol carries base64 payloads in 400-byte
//! chunks; this module provides the chunking rules plus verifier state
//! machines for the mechanisms this server offers: PLAIN, EXTERNAL, and
//! SCRAM-SHA-256.

mod external;
mod plain;
mod scram;

pub use external::parse_external;
pub use plain::{parse_plain, PlainCredentials};
pub use scram::{ScramCredentials, ScramServer};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use thiserror::Error;

/// Maximum characters per AUTHENTICATE argument line.
pub const CHUNK_LEN: usize = 400;

/// Errors shared by all SASL mechanisms.
///
/// Failing proofs, unknown accounts, and probe payloads all surface as
/// [`SaslError::AuthenticationFailed`] so the wire answer cannot be used to
/// enumerate accounts.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SaslError {
    /// Payload was not valid base64 (or not valid UTF-8 where required).
    #[error("invalid encoding")]
    InvalidEncoding,
    /// The GS2 header was not the plain `n,,` form.
    #[error("invalid GS2 header")]
    InvalidGs2Header,
    /// The channel-binding token of the final message was not `biws`.
    #[error("invalid channel binding")]
    InvalidChannelBinding,
    /// Nonce missing from a client message, or it did not echo ours.
    #[error("missing or mismatched nonce")]
    NonceMismatch,
    /// A message did not follow the mechanism grammar.
    #[error("malformed mechanism message")]
    InvalidMessage,
    /// The client proof was not exactly 32 bytes.
    #[error("invalid proof length")]
    InvalidProofLength,
    /// Credentials did not verify.
    #[error("authentication failed")]
    AuthenticationFailed,
    /// A step arrived out of order for the mechanism state machine.
    #[error("mechanism step out of order")]
    OutOfOrder,
    /// Crypto primitive failure (key length, RNG).
    #[error("crypto failure")]
    Crypto,
}

/// SASL mechanisms offered by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mechanism {
    /// RFC 4616 PLAIN.
    Plain,
    /// RFC 4422 EXTERNAL (TLS client certificate).
    External,
    /// RFC 5802 / RFC 7677 SCRAM-SHA-256.
    ScramSha256,
}

impl Mechanism {
    /// All offered mechanisms, in advertisement order.
    pub const ALL: &'static [Mechanism] =
        &[Mechanism::Plain, Mechanism::External, Mechanism::ScramSha256];

    /// Wire name.
    pub const fn name(self) -> &'static str {
        match self {
            Mechanism::Plain => "PLAIN",
            Mechanism::External => "EXTERNAL",
            Mechanism::ScramSha256 => "SCRAM-SHA-256",
        }
    }

    /// Whether this mechanism is only offered on TLS connections.
    pub const fn requires_tls(self) -> bool {
        match self {
            Mechanism::Plain | Mechanism::External | Mechanism::ScramSha256 => true,
        }
    }

    /// Parse a wire name (case-sensitive per RFC 4422).
    pub fn from_name(name: &str) -> Option<Mechanism> {
        Mechanism::ALL.iter().copied().find(|m| m.name() == name)
    }

    /// Names of all mechanisms for the `sasl=` capability value.
    pub fn names() -> Vec<&'static str> {
        Mechanism::ALL.iter().map(|m| m.name()).collect()
    }
}

/// Decode one AUTHENTICATE argument: `+` is the empty payload, anything
/// else is strict base64.
pub fn decode_payload(arg: &str) -> Result<Vec<u8>, SaslError> {
    if arg == "+" {
        return Ok(Vec::new());
    }
    BASE64
        .decode(arg.as_bytes())
        .map_err(|_| SaslError::InvalidEncoding)
}

/// Encode a payload into AUTHENTICATE argument lines of at most
/// [`CHUNK_LEN`] characters. An empty payload (and a payload whose base64
/// form is a multiple of the chunk size) is terminated with a bare `+`.
pub fn encode_payload(payload: &[u8]) -> Vec<String> {
    let encoded = BASE64.encode(payload);
    if encoded.is_empty() {
        return vec!["+".to_string()];
    }

    let mut chunks: Vec<String> = encoded
        .as_bytes()
        .chunks(CHUNK_LEN)
        .map(|c| String::from_utf8_lossy(c).into_owned())
        .collect();
    if encoded.len() % CHUNK_LEN == 0 {
        chunks.push("+".to_string());
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mechanism_names() {
        assert_eq!(Mechanism::from_name("PLAIN"), Some(Mechanism::Plain));
        assert_eq!(
            Mechanism::from_name("SCRAM-SHA-256"),
            Some(Mechanism::ScramSha256)
        );
        // Case-sensitive.
        assert_eq!(Mechanism::from_name("plain"), None);
        assert_eq!(Mechanism::names(), vec!["PLAIN", "EXTERNAL", "SCRAM-SHA-256"]);
    }

    #[test]
    fn decode_plus_is_empty() {
        assert_eq!(decode_payload("+").unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(decode_payload("!!!"), Err(SaslError::InvalidEncoding));
    }

    #[test]
    fn encode_empty_is_plus() {
        assert_eq!(encode_payload(b""), vec!["+"]);
    }

    #[test]
    fn encode_roundtrip() {
        let data = vec![7u8; 900];
        let chunks = encode_payload(&data);
        assert!(chunks.iter().all(|c| c.len() <= CHUNK_LEN));
        let rejoined: String = chunks
            .iter()
            .filter(|c| c.as_str() != "+")
            .cloned()
            .collect();
        assert_eq!(decode_payload(&rejoined).unwrap(), data);
    }

    #[test]
    fn encode_exact_multiple_gets_plus_terminator() {
        // 300 bytes -> 400 base64 chars -> one full chunk plus "+".
        let data = vec![1u8; 300];
        let chunks = encode_payload(&data);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1], "+");
    }
}
