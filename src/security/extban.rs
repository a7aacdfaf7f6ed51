//! Extended ban types.
//!
//! An extended ban replaces the `nick!user@host` mask with a typed
//! predicate: `~t:value` (the `$t:value` spelling is accepted on input).
//! The registered types are advertised as `EXTBAN=~,arcRszoqfT`:
//!
//! - `~a:<account>` — logged into a matching account
//! - `~r:<pattern>` — realname matches
//! - `~c:<#chan>` — currently on a matching channel
//! - `~R` — not identified to any account
//! - `~s:<server>` — attached to a matching server
//! - `~z` — not on a TLS connection
//! - `~o` — IRC operator
//! - `~q:<mask>` — quiet: may stay, may not speak
//! - `~f:<fingerprint>` — certificate fingerprint matches
//! - `~T:<pattern>` — drops messages whose text matches (non-ops only)

use loom_proto::{matches_hostmask, wildcard_match};

/// A parsed extended ban.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtBan {
    Account(String),
    Realname(String),
    OnChannel(String),
    Unregistered,
    Server(String),
    Insecure,
    Oper,
    Quiet(String),
    CertFp(String),
    Text(String),
}

impl ExtBan {
    /// Parse `~t:value` / `$t:value`. Returns `None` for plain hostmasks
    /// and unknown type characters.
    pub fn parse(mask: &str) -> Option<ExtBan> {
        let body = mask
            .strip_prefix('~')
            .or_else(|| mask.strip_prefix('$'))?;

        let mut chars = body.chars();
        let type_char = chars.next()?;
        let value = match chars.next() {
            Some(':') => chars.as_str(),
            Some(_) => return None,
            None => "",
        };

        match type_char {
            'a' => Some(ExtBan::Account(value.to_string())),
            'r' => Some(ExtBan::Realname(value.to_string())),
            'c' => Some(ExtBan::OnChannel(value.to_string())),
            'R' => Some(ExtBan::Unregistered),
            's' => Some(ExtBan::Server(value.to_string())),
            'z' => Some(ExtBan::Insecure),
            'o' => Some(ExtBan::Oper),
            'q' => Some(ExtBan::Quiet(value.to_string())),
            'f' => Some(ExtBan::CertFp(value.to_string())),
            'T' => Some(ExtBan::Text(value.to_string())),
            _ => None,
        }
    }
}

/// User attributes an extended ban can match on.
#[derive(Debug, Clone)]
pub struct BanContext<'a> {
    pub nick: &'a str,
    pub user: &'a str,
    pub host: &'a str,
    pub realname: &'a str,
    pub account: Option<&'a str>,
    /// SID or name of the user's server.
    pub server: &'a str,
    /// Folded names of joined channels.
    pub channels: &'a [String],
    pub is_oper: bool,
    pub secure: bool,
    pub certfp: Option<&'a str>,
}

impl BanContext<'_> {
    fn matches_identity(&self, mask: &str) -> bool {
        matches_hostmask(mask, self.nick, self.user, self.host)
    }
}

fn extban_matches(ban: &ExtBan, ctx: &BanContext<'_>) -> bool {
    match ban {
        ExtBan::Account(pattern) => ctx
            .account
            .is_some_and(|acct| wildcard_match(pattern, acct)),
        ExtBan::Realname(pattern) => wildcard_match(pattern, ctx.realname),
        ExtBan::OnChannel(pattern) => {
            ctx.channels.iter().any(|ch| wildcard_match(pattern, ch))
        }
        ExtBan::Unregistered => ctx.account.is_none(),
        ExtBan::Server(pattern) => wildcard_match(pattern, ctx.server),
        ExtBan::Insecure => !ctx.secure,
        ExtBan::Oper => ctx.is_oper,
        ExtBan::CertFp(pattern) => ctx
            .certfp
            .is_some_and(|fp| wildcard_match(pattern, fp)),
        // Quiet and Text do not bar a user as such; they gate speaking.
        ExtBan::Quiet(_) | ExtBan::Text(_) => false,
    }
}

/// Whether a ban-list mask bars this user (JOIN enforcement, pre-exception).
/// Quiet and text bans never bar presence.
pub fn user_matches_mask(mask: &str, ctx: &BanContext<'_>) -> bool {
    match ExtBan::parse(mask) {
        Some(ban) => extban_matches(&ban, ctx),
        None => ctx.matches_identity(mask),
    }
}

/// Whether a ban-list mask mutes this user in the channel: a matching
/// plain ban or extban mutes members, and `~q:<mask>` quiets without
/// barring.
pub fn user_muted_by_mask(mask: &str, ctx: &BanContext<'_>) -> bool {
    match ExtBan::parse(mask) {
        Some(ExtBan::Quiet(inner)) => ctx.matches_identity(&inner),
        Some(ban) => extban_matches(&ban, ctx),
        None => ctx.matches_identity(mask),
    }
}

/// Whether a `~T` mask blocks this message text.
pub fn text_blocked_by_mask(mask: &str, text: &str) -> bool {
    matches!(ExtBan::parse(mask), Some(ExtBan::Text(pattern)) if wildcard_match(&pattern, text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(channels: &'a [String]) -> BanContext<'a> {
        BanContext {
            nick: "alice",
            user: "al",
            host: "example.org",
            realname: "Alice Example",
            account: Some("alice"),
            server: "001",
            channels,
            is_oper: false,
            secure: true,
            certfp: Some("ABCD"),
        }
    }

    #[test]
    fn parses_both_sigils() {
        assert_eq!(
            ExtBan::parse("~a:alice"),
            Some(ExtBan::Account("alice".into()))
        );
        assert_eq!(
            ExtBan::parse("$a:alice"),
            Some(ExtBan::Account("alice".into()))
        );
        assert_eq!(ExtBan::parse("~R"), Some(ExtBan::Unregistered));
        assert_eq!(ExtBan::parse("~z"), Some(ExtBan::Insecure));
        assert_eq!(ExtBan::parse("*!*@host"), None);
        assert_eq!(ExtBan::parse("~x:nope"), None);
    }

    #[test]
    fn account_and_realname() {
        let chans = Vec::new();
        let c = ctx(&chans);
        assert!(user_matches_mask("~a:alice", &c));
        assert!(user_matches_mask("~a:ali*", &c));
        assert!(!user_matches_mask("~a:bob", &c));
        assert!(user_matches_mask("~r:*Example*", &c));
    }

    #[test]
    fn registered_and_secure() {
        let chans = Vec::new();
        let mut c = ctx(&chans);
        assert!(!user_matches_mask("~R", &c));
        c.account = None;
        assert!(user_matches_mask("~R", &c));

        assert!(!user_matches_mask("~z", &c));
        c.secure = false;
        assert!(user_matches_mask("~z", &c));
    }

    #[test]
    fn channel_membership() {
        let chans = vec!["#dev".to_string(), "#ops".to_string()];
        let c = ctx(&chans);
        assert!(user_matches_mask("~c:#dev", &c));
        assert!(user_matches_mask("~c:#o*", &c));
        assert!(!user_matches_mask("~c:#lobby", &c));
    }

    #[test]
    fn quiet_mutes_without_barring() {
        let chans = Vec::new();
        let c = ctx(&chans);
        assert!(!user_matches_mask("~q:alice!*@*", &c));
        assert!(user_muted_by_mask("~q:alice!*@*", &c));
        assert!(!user_muted_by_mask("~q:bob!*@*", &c));
    }

    #[test]
    fn plain_ban_mutes_members_too() {
        let chans = Vec::new();
        let c = ctx(&chans);
        assert!(user_muted_by_mask("*!*@example.org", &c));
    }

    #[test]
    fn text_filter() {
        assert!(text_blocked_by_mask("~T:*spam*", "buy spam here"));
        assert!(!text_blocked_by_mask("~T:*spam*", "hello world"));
        // Only ~T masks filter text.
        assert!(!text_blocked_by_mask("*!*@*", "buy spam here"));
    }

    #[test]
    fn certfp_match() {
        let chans = Vec::new();
        let c = ctx(&chans);
        assert!(user_matches_mask("~f:ABCD", &c));
        assert!(!user_matches_mask("~f:FFFF", &c));
    }
}
