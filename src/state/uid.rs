//! Connection and user identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque identifier of an accepted connection.
///
/// Remote users introduced over S2S links are assigned a synthetic id from
/// the same sequence so the repositories stay uniformly keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    /// Allocate the next id in the process-wide sequence.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw value, for logging.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// UID alphabet: `A` encodes zero, TS6-style.
const UID_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Length of the per-user UID suffix.
const UID_SUFFIX_LEN: usize = 6;

/// Generator of network-unique user IDs: the local SID followed by a
/// 6-character base-36 suffix.
#[derive(Debug)]
pub struct UidGenerator {
    sid: String,
    counter: AtomicU64,
}

impl UidGenerator {
    /// Create a generator for this server's SID.
    pub fn new(sid: impl Into<String>) -> Self {
        Self {
            sid: sid.into(),
            counter: AtomicU64::new(0),
        }
    }

    /// Produce the next UID. Wraps after 36^6 allocations, which outlives
    /// any realistic process.
    pub fn next_uid(&self) -> String {
        let mut n = self.counter.fetch_add(1, Ordering::Relaxed) % 36u64.pow(6);
        let mut suffix = [0u8; UID_SUFFIX_LEN];
        for slot in suffix.iter_mut().rev() {
            *slot = UID_ALPHABET[(n % 36) as usize];
            n /= 36;
        }
        let mut uid = String::with_capacity(self.sid.len() + UID_SUFFIX_LEN);
        uid.push_str(&self.sid);
        uid.push_str(std::str::from_utf8(&suffix).expect("uid alphabet is ascii"));
        uid
    }
}

/// UID of a services pseudo-client: `SID || "AAAAA" || letter`.
///
/// The scheme is fixed for interop with services already deployed on the
/// network.
pub fn service_uid(sid: &str, letter: char) -> String {
    format!("{sid}AAAAA{letter}")
}

/// Validate a server ID: `[0-9][A-Z0-9][A-Z0-9]`.
pub fn is_valid_sid(sid: &str) -> bool {
    let bytes = sid.as_bytes();
    bytes.len() == 3
        && bytes[0].is_ascii_digit()
        && bytes[1..]
            .iter()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique() {
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        assert_ne!(a, b);
    }

    #[test]
    fn uid_shape() {
        let g = UidGenerator::new("00A");
        let first = g.next_uid();
        assert_eq!(first, "00AAAAAAA");
        let second = g.next_uid();
        assert_eq!(second, "00AAAAAAB");
        assert_eq!(first.len(), 9);
    }

    #[test]
    fn uid_suffix_counts_in_base36() {
        let g = UidGenerator::new("00A");
        for _ in 0..36 {
            g.next_uid();
        }
        // 36 decimal = "BA" in the A=0 alphabet.
        assert_eq!(g.next_uid(), "00AAAAABA");
    }

    #[test]
    fn service_uid_scheme() {
        assert_eq!(service_uid("00A", 'N'), "00AAAAAAN");
    }

    #[test]
    fn sid_validation() {
        assert!(is_valid_sid("001"));
        assert!(is_valid_sid("0AB"));
        assert!(is_valid_sid("9ZZ"));
        assert!(!is_valid_sid("A01"));
        assert!(!is_valid_sid("00"));
        assert!(!is_valid_sid("00a"));
        assert!(!is_valid_sid("0000"));
    }
}
