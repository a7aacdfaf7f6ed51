//! User-related types and state.

use std::collections::HashMap;
use std::net::IpAddr;

use loom_proto::CapSet;

use crate::state::channel::MemberModes;
use crate::state::uid::ConnectionId;

/// A connected user (local) or a user learned over an S2S link (remote).
#[derive(Debug)]
pub struct User {
    /// Repository key; synthetic for remote users.
    pub conn_id: ConnectionId,
    /// Network-unique id: SID + 6-char base-36 suffix.
    pub uid: String,
    /// Current nickname (case-preserved).
    pub nick: String,
    /// Username from USER (truncated to 10).
    pub user: String,
    /// Realname from USER.
    pub realname: String,
    /// Real peer address. Remote users carry the unspecified address.
    pub ip: IpAddr,
    /// Host shown to other users.
    pub host: String,
    /// SID of the server this user is attached to.
    pub server: String,
    /// Account name once authenticated.
    pub account: Option<String>,
    /// Away message, if away.
    pub away: Option<String>,
    /// TLS certificate fingerprint (uppercase hex, no colons).
    pub certfp: Option<String>,
    /// Negotiated IRCv3 capabilities.
    pub caps: CapSet,
    /// User modes.
    pub modes: UserModes,
    /// Folded channel name → member modes; mirror of each channel's
    /// member map.
    pub channels: HashMap<String, MemberModes>,
    /// Connect time (collision resolution: oldest wins).
    pub connected_at: i64,
    /// Advances on any inbound command; drives ping/idle handling.
    pub last_activity: i64,
}

impl User {
    /// `nick!user@host` identity string used in prefixes and ban matching.
    pub fn hostmask(&self) -> String {
        format!("{}!{}@{}", self.nick, self.user, self.host)
    }

    /// Prefix for messages originating from this user.
    pub fn prefix(&self) -> loom_proto::Prefix {
        loom_proto::Prefix::new(self.nick.clone(), self.user.clone(), self.host.clone())
    }

    /// Whether this user is attached to the given local server.
    pub fn is_local_to(&self, sid: &str) -> bool {
        self.server == sid
    }
}

/// User modes: `i w s o r B Z`.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct UserModes {
    /// +i — hidden from WHO of strangers.
    pub invisible: bool,
    /// +w — receives WALLOPS.
    pub wallops: bool,
    /// +s — receives server notices.
    pub snotices: bool,
    /// +o — IRC operator. Only removable by the user, grantable via OPER.
    pub oper: bool,
    /// +r — identified to an account. Server-managed.
    pub registered: bool,
    /// +B — marked as a bot.
    pub bot: bool,
    /// +Z — TLS connection. Reflects transport state, read-only.
    pub secure: bool,
}

impl UserModes {
    /// Render as a `+...` mode string.
    pub fn as_mode_string(&self) -> String {
        let mut s = String::from("+");
        if self.invisible {
            s.push('i');
        }
        if self.wallops {
            s.push('w');
        }
        if self.snotices {
            s.push('s');
        }
        if self.oper {
            s.push('o');
        }
        if self.registered {
            s.push('r');
        }
        if self.bot {
            s.push('B');
        }
        if self.secure {
            s.push('Z');
        }
        s
    }
}

/// An entry in the WHOWAS history for a departed user.
#[derive(Debug, Clone)]
pub struct WhowasEntry {
    pub nick: String,
    pub user: String,
    pub host: String,
    pub realname: String,
    pub server: String,
    /// Unix timestamp of departure.
    pub logout_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_string_default_is_bare_plus() {
        assert_eq!(UserModes::default().as_mode_string(), "+");
    }

    #[test]
    fn mode_string_ordering() {
        let modes = UserModes {
            invisible: true,
            wallops: true,
            oper: true,
            secure: true,
            ..Default::default()
        };
        assert_eq!(modes.as_mode_string(), "+iwoZ");
    }

    #[test]
    fn mode_string_all() {
        let modes = UserModes {
            invisible: true,
            wallops: true,
            snotices: true,
            oper: true,
            registered: true,
            bot: true,
            secure: true,
        };
        assert_eq!(modes.as_mode_string(), "+iwsorBZ");
    }
}
