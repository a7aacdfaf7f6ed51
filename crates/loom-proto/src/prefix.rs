//! IRC message prefix types.
//!
//! An IRC message prefix identifies the origin of a message: a server name
//! or a user's `nick!user@host` mask.

use std::fmt;
use std::str::FromStr;

/// IRC message prefix.
///
/// A prefix is a server name (containing a dot, or a bare 3-char SID on
/// server links) or a user's `nick!user@host` identifier.
#[derive(Clone, Eq, PartialEq, Debug, Hash)]
pub enum Prefix {
    /// Server name (e.g., `irc.example.com`) or SID.
    ServerName(String),
    /// User prefix: (nickname, username, hostname).
    Nickname(String, String, String),
}

impl Prefix {
    /// Parse a prefix string. Lenient: does not validate components.
    pub fn new_from_str(s: &str) -> Self {
        #[derive(Copy, Clone, Eq, PartialEq)]
        enum Part {
            Name,
            User,
            Host,
        }

        let mut name = String::new();
        let mut user = String::new();
        let mut host = String::new();
        let mut part = Part::Name;
        let mut is_server = false;

        for c in s.chars() {
            // A dot in the name part (before ! or @) suggests a server name.
            if c == '.' && part == Part::Name {
                is_server = true;
            }

            match c {
                '!' if part == Part::Name => {
                    is_server = false;
                    part = Part::User;
                }
                '@' if part != Part::Host => {
                    is_server = false;
                    part = Part::Host;
                }
                _ => {
                    match part {
                        Part::Name => &mut name,
                        Part::User => &mut user,
                        Part::Host => &mut host,
                    }
                    .push(c);
                }
            }
        }

        if is_server {
            Prefix::ServerName(name)
        } else {
            Prefix::Nickname(name, user, host)
        }
    }

    /// Create a user prefix from nick, user, and host components.
    pub fn new(nick: impl Into<String>, user: impl Into<String>, host: impl Into<String>) -> Self {
        Prefix::Nickname(nick.into(), user.into(), host.into())
    }

    /// Get the nickname if this is a user prefix.
    pub fn nick(&self) -> Option<&str> {
        match self {
            Prefix::Nickname(nick, _, _) if !nick.is_empty() => Some(nick),
            _ => None,
        }
    }

    /// Get the hostname of the prefix, if any.
    pub fn host(&self) -> Option<&str> {
        match self {
            Prefix::ServerName(name) => Some(name),
            Prefix::Nickname(_, _, host) if !host.is_empty() => Some(host),
            _ => None,
        }
    }
}

impl FromStr for Prefix {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Prefix::new_from_str(s))
    }
}

impl fmt::Display for Prefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prefix::ServerName(name) => write!(f, "{name}"),
            Prefix::Nickname(nick, user, host) => {
                write!(f, "{nick}")?;
                if !user.is_empty() {
                    write!(f, "!{user}")?;
                }
                if !host.is_empty() {
                    write!(f, "@{host}")?;
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_names() {
        assert_eq!(
            Prefix::new_from_str("irc.example.com"),
            Prefix::ServerName("irc.example.com".into())
        );
    }

    #[test]
    fn parses_full_user_prefix() {
        assert_eq!(
            Prefix::new_from_str("nick!user@host"),
            Prefix::Nickname("nick".into(), "user".into(), "host".into())
        );
    }

    #[test]
    fn parses_bare_nick() {
        assert_eq!(
            Prefix::new_from_str("nick"),
            Prefix::Nickname("nick".into(), String::new(), String::new())
        );
    }

    #[test]
    fn dotted_host_does_not_make_user_prefix_a_server() {
        assert_eq!(
            Prefix::new_from_str("nick!user@host.example.com"),
            Prefix::Nickname("nick".into(), "user".into(), "host.example.com".into())
        );
    }

    #[test]
    fn display_roundtrip() {
        for s in ["irc.example.com", "nick!user@host", "nick", "nick@host"] {
            assert_eq!(Prefix::new_from_str(s).to_string(), s);
        }
    }
}
