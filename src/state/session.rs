//! Per-connection session state during and after registration.
//!
//! The session drives the handshake:
//!
//! ```text
//! Accepted ──CAP LS 302──► CapNegotiating ──AUTHENTICATE──► AuthInProgress
//!    │                          │  ▲                              │
//!    │ NICK/USER/PASS           │  └────── success / fail ────────┘
//!    ▼                          ▼ CAP END
//! (NICK+USER received, CAP done) ──► Registered ──QUIT/error──► Quit
//! ```

use std::net::IpAddr;
use std::time::Instant;

use loom_proto::sasl::{Mechanism, ScramServer};
use loom_proto::CapSet;

use crate::state::uid::ConnectionId;

/// Registration phase of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Accepted, nothing negotiated yet.
    Accepted,
    /// `CAP LS`/`CAP REQ` seen, welcome suspended until `CAP END`.
    CapNegotiating,
    /// AUTHENTICATE exchange in flight.
    AuthInProgress,
    /// Welcome burst sent; full command set available.
    Registered,
    /// Terminal.
    Quit,
}

/// An in-flight SASL exchange.
#[derive(Debug)]
pub struct SaslExchange {
    pub mechanism: Mechanism,
    /// Verifier state for SCRAM.
    pub scram: Option<ScramServer>,
    /// Reassembly buffer for 400-byte AUTHENTICATE chunks.
    pub buffer: String,
    /// Start of the current step, for the step timeout.
    pub started_at: Instant,
}

impl SaslExchange {
    pub fn new(mechanism: Mechanism) -> Self {
        Self {
            mechanism,
            scram: None,
            buffer: String::new(),
            started_at: Instant::now(),
        }
    }
}

/// Mutable per-connection handshake and capability state.
///
/// Owned by the connection task; handlers receive `&mut Session` and are the
/// only writers.
#[derive(Debug)]
pub struct Session {
    pub conn_id: ConnectionId,
    /// Peer address (spoofable once, by a trusted WEBIRC gateway).
    pub ip: IpAddr,
    /// TLS transport (spoofable by WEBIRC `secure` option).
    pub secure: bool,
    /// Normalized client certificate fingerprint.
    pub certfp: Option<String>,
    /// Displayed host.
    pub host: String,
    pub phase: SessionPhase,
    pub nick: Option<String>,
    pub username: Option<String>,
    pub realname: Option<String>,
    /// PASS argument, held until registration.
    pub password: Option<String>,
    pub caps: CapSet,
    /// CAP LS version requested (301 when unspecified).
    pub cap_version: u32,
    /// True between the first CAP and CAP END.
    pub cap_negotiating: bool,
    pub sasl: Option<SaslExchange>,
    /// Account from a completed SASL exchange.
    pub account: Option<String>,
    /// Name of the WEBIRC gateway that introduced this connection.
    pub webirc_gateway: Option<String>,
    /// Bonus penalty accrued by handlers (failed OPER attempts); drained
    /// into the connection's penalty meter after each dispatch.
    pub pending_penalty_ms: u64,
    /// Set when a DNSBL hit with the `require-auth` action admitted this
    /// connection: registration demands a SASL account.
    pub dnsbl_require_auth: bool,
}

impl Session {
    pub fn new(
        conn_id: ConnectionId,
        ip: IpAddr,
        secure: bool,
        certfp: Option<String>,
        host: String,
    ) -> Self {
        Self {
            conn_id,
            ip,
            secure,
            certfp,
            host,
            phase: SessionPhase::Accepted,
            nick: None,
            username: None,
            realname: None,
            password: None,
            caps: CapSet::default(),
            cap_version: 301,
            cap_negotiating: false,
            sasl: None,
            account: None,
            webirc_gateway: None,
            pending_penalty_ms: 0,
            dnsbl_require_auth: false,
        }
    }

    /// Whether NICK and USER have both arrived and nothing suspends the
    /// welcome burst.
    pub fn can_register(&self) -> bool {
        self.phase != SessionPhase::Registered
            && self.phase != SessionPhase::Quit
            && self.nick.is_some()
            && self.username.is_some()
            && !self.cap_negotiating
            && self.sasl.is_none()
    }

    pub fn is_registered(&self) -> bool {
        self.phase == SessionPhase::Registered
    }

    /// Nick for numeric targets: the claimed nick or `*`.
    pub fn display_nick(&self) -> &str {
        self.nick.as_deref().unwrap_or("*")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::new(
            ConnectionId::next(),
            "127.0.0.1".parse().unwrap(),
            false,
            None,
            "localhost".into(),
        )
    }

    #[test]
    fn registration_gated_on_nick_user_and_cap() {
        let mut s = session();
        assert!(!s.can_register());

        s.nick = Some("Alice".into());
        assert!(!s.can_register());

        s.username = Some("alice".into());
        assert!(s.can_register());

        s.cap_negotiating = true;
        s.phase = SessionPhase::CapNegotiating;
        assert!(!s.can_register());

        s.cap_negotiating = false;
        assert!(s.can_register());

        s.phase = SessionPhase::Registered;
        assert!(!s.can_register());
    }

    #[test]
    fn sasl_suspends_registration() {
        let mut s = session();
        s.nick = Some("Alice".into());
        s.username = Some("alice".into());
        s.sasl = Some(SaslExchange::new(Mechanism::Plain));
        assert!(!s.can_register());
    }

    #[test]
    fn display_nick_falls_back_to_star() {
        let mut s = session();
        assert_eq!(s.display_nick(), "*");
        s.nick = Some("Alice".into());
        assert_eq!(s.display_nick(), "Alice");
    }
}
