//! IRCv3 client capability names and negotiation sets.
//!
//! Capabilities are tracked as a compact bitset: ACK/NAK decisions are
//! atomic on the whole requested vector, so a set type with cheap
//! union/containment is the natural shape.

use bitflags::bitflags;

bitflags! {
    /// A set of negotiated (or requested) capabilities.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct CapSet: u32 {
        const CAP_NOTIFY        = 1 << 0;
        const MULTI_PREFIX      = 1 << 1;
        const SERVER_TIME       = 1 << 2;
        const AWAY_NOTIFY       = 1 << 3;
        const EXTENDED_JOIN     = 1 << 4;
        const ECHO_MESSAGE      = 1 << 5;
        const BATCH             = 1 << 6;
        const LABELED_RESPONSE  = 1 << 7;
        const ACCOUNT_TAG       = 1 << 8;
        const ACCOUNT_NOTIFY    = 1 << 9;
        const MESSAGE_TAGS      = 1 << 10;
        const SETNAME           = 1 << 11;
        const CHGHOST           = 1 << 12;
        const INVITE_NOTIFY     = 1 << 13;
        const STANDARD_REPLIES  = 1 << 14;
        const CHATHISTORY       = 1 << 15;
        const EVENT_PLAYBACK    = 1 << 16;
        const USERHOST_IN_NAMES = 1 << 17;
        const SASL              = 1 << 18;
    }
}

/// Wire name ↔ flag table, in advertisement order.
pub const CAP_NAMES: &[(&str, CapSet)] = &[
    ("cap-notify", CapSet::CAP_NOTIFY),
    ("multi-prefix", CapSet::MULTI_PREFIX),
    ("server-time", CapSet::SERVER_TIME),
    ("away-notify", CapSet::AWAY_NOTIFY),
    ("extended-join", CapSet::EXTENDED_JOIN),
    ("echo-message", CapSet::ECHO_MESSAGE),
    ("batch", CapSet::BATCH),
    ("labeled-response", CapSet::LABELED_RESPONSE),
    ("account-tag", CapSet::ACCOUNT_TAG),
    ("account-notify", CapSet::ACCOUNT_NOTIFY),
    ("message-tags", CapSet::MESSAGE_TAGS),
    ("setname", CapSet::SETNAME),
    ("chghost", CapSet::CHGHOST),
    ("invite-notify", CapSet::INVITE_NOTIFY),
    ("standard-replies", CapSet::STANDARD_REPLIES),
    ("draft/chathistory", CapSet::CHATHISTORY),
    ("draft/event-playback", CapSet::EVENT_PLAYBACK),
    ("userhost-in-names", CapSet::USERHOST_IN_NAMES),
    ("sasl", CapSet::SASL),
];

impl CapSet {
    /// Look up a capability flag by wire name. Any `=value` suffix in a
    /// request token must be stripped by the caller.
    pub fn from_wire_name(name: &str) -> Option<CapSet> {
        CAP_NAMES
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, flag)| *flag)
    }

    /// Wire names of all capabilities present in this set, in
    /// advertisement order.
    pub fn names(self) -> Vec<&'static str> {
        CAP_NAMES
            .iter()
            .filter(|(_, flag)| self.contains(*flag))
            .map(|(n, _)| *n)
            .collect()
    }
}

/// Render the `CAP LS` token list. With version ≥ 302, value-carrying
/// capabilities render as `name=value` (currently `sasl=<mechs>`).
pub fn ls_tokens(version: u32, sasl_mechs: &[&str]) -> String {
    CAP_NAMES
        .iter()
        .map(|(name, flag)| {
            if version >= 302 && *flag == CapSet::SASL && !sasl_mechs.is_empty() {
                format!("{name}={}", sasl_mechs.join(","))
            } else {
                (*name).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_lookup_roundtrip() {
        for (name, flag) in CAP_NAMES {
            assert_eq!(CapSet::from_wire_name(name), Some(*flag));
        }
        assert_eq!(CapSet::from_wire_name("draft/nonexistent"), None);
    }

    #[test]
    fn names_in_advertisement_order() {
        let set = CapSet::SASL | CapSet::MULTI_PREFIX | CapSet::BATCH;
        assert_eq!(set.names(), vec!["multi-prefix", "batch", "sasl"]);
    }

    #[test]
    fn ls_302_carries_sasl_value() {
        let tokens = ls_tokens(302, &["PLAIN", "EXTERNAL", "SCRAM-SHA-256"]);
        assert!(tokens.contains("sasl=PLAIN,EXTERNAL,SCRAM-SHA-256"));
        assert!(tokens.contains("draft/chathistory"));
    }

    #[test]
    fn ls_301_is_bare_names() {
        let tokens = ls_tokens(301, &["PLAIN"]);
        assert!(tokens.split(' ').any(|t| t == "sasl"));
        assert!(!tokens.contains('='));
    }
}
