//! IRC message types and parsing.
//!
//! A message line follows the IRCv3 grammar:
//!
//! ```text
//! line    = [ '@' tags SPACE ] [ ':' source SPACE ] command { SPACE param } CRLF
//! tags    = tag { ';' tag }
//! tag     = [ '+' ] [ vendor '/' ] key [ '=' escaped-value ]
//! param   = ( no-space-no-colon { no-space } ) | ( ':' trailing )
//! ```
//!
//! Parsing is strict about the command (a missing command is an error the
//! caller discards silently) but lenient about tags: a malformed tags
//! section is dropped while the rest of the message is kept.

use std::fmt;
use std::str::FromStr;

use nom::bytes::complete::take_while1;
use nom::character::complete::char;
use nom::IResult;

use crate::error::{MessageParseError, ProtocolError};
use crate::prefix::Prefix;
use crate::tags::{escape_tag_value, unescape_tag_value};

/// A single IRCv3 message tag: key and optional decoded value.
///
/// Client-only tags keep their `+` prefix as part of the key, and vendored
/// keys keep their `vendor/` prefix.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Tag(pub String, pub Option<String>);

/// An owned, parsed IRC message.
#[derive(Clone, PartialEq, Debug)]
pub struct Message {
    /// IRCv3 message tags (e.g., `time`, `msgid`), decoded.
    pub tags: Option<Vec<Tag>>,
    /// Message prefix/source (e.g., `nick!user@host`).
    pub prefix: Option<Prefix>,
    /// The command token, uppercased (`PRIVMSG`, `001`).
    pub command: String,
    /// Positional parameters, trailing included as the last element.
    pub params: Vec<String>,
}

impl Message {
    /// Create a message with no tags and no prefix.
    pub fn new(command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            tags: None,
            prefix: None,
            command: command.into(),
            params,
        }
    }

    /// Create a message carrying a source prefix.
    pub fn with_prefix(prefix: Prefix, command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            tags: None,
            prefix: Some(prefix),
            command: command.into(),
            params,
        }
    }

    /// Get a positional parameter.
    pub fn param(&self, idx: usize) -> Option<&str> {
        self.params.get(idx).map(String::as_str)
    }

    /// Get the decoded value of a tag by key.
    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags
            .as_ref()?
            .iter()
            .find(|Tag(k, _)| k == key)
            .and_then(|Tag(_, v)| v.as_deref())
    }

    /// Insert or replace a tag.
    pub fn set_tag(&mut self, key: impl Into<String>, value: Option<String>) {
        let key = key.into();
        let tags = self.tags.get_or_insert_with(Vec::new);
        if let Some(existing) = tags.iter_mut().find(|Tag(k, _)| *k == key) {
            existing.1 = value;
        } else {
            tags.push(Tag(key, value));
        }
    }

    /// The `label` tag of a labeled-response request, if present.
    pub fn label(&self) -> Option<&str> {
        self.tag_value("label")
    }

    /// The `batch` reference tag, if present.
    pub fn batch_ref(&self) -> Option<&str> {
        self.tag_value("batch")
    }
}

fn tags_section(i: &str) -> IResult<&str, &str> {
    let (i, _) = char('@')(i)?;
    let (i, raw) = take_while1(|c| c != ' ')(i)?;
    let (i, _) = take_while1(|c| c == ' ')(i)?;
    Ok((i, raw))
}

fn prefix_section(i: &str) -> IResult<&str, &str> {
    let (i, _) = char(':')(i)?;
    let (i, raw) = take_while1(|c| c != ' ')(i)?;
    let (i, _) = take_while1(|c| c == ' ')(i)?;
    Ok((i, raw))
}

fn command_token(i: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric())(i)
}

/// Parse a raw tags string (without the leading `@`) into decoded tags.
///
/// Returns `None` when the section is malformed (an empty key); the caller
/// then drops the tags but keeps the message.
fn parse_tags(raw: &str) -> Option<Vec<Tag>> {
    let mut tags = Vec::new();
    for part in raw.split(';') {
        if part.is_empty() {
            continue;
        }
        let mut iter = part.splitn(2, '=');
        let key = iter.next().unwrap_or("");
        if key.is_empty() || key == "+" {
            return None;
        }
        let value = iter.next().map(unescape_tag_value);
        tags.push(Tag(key.to_string(), value));
    }
    if tags.is_empty() {
        None
    } else {
        Some(tags)
    }
}

fn parse_line(line: &str) -> Result<Message, MessageParseError> {
    if line.is_empty() {
        return Err(MessageParseError::EmptyMessage);
    }

    let original_len = line.len();
    let (rest, raw_tags) = match tags_section(line) {
        Ok((rest, raw)) => (rest, Some(raw)),
        Err(_) => (line, None),
    };

    let (rest, raw_prefix) = match prefix_section(rest) {
        Ok((rest, raw)) => (rest, Some(raw)),
        Err(_) => (rest, None),
    };

    let (mut rest, command) =
        command_token(rest).map_err(|_: nom::Err<nom::error::Error<&str>>| {
            if rest.is_empty() {
                MessageParseError::MissingCommand
            } else {
                MessageParseError::ParseContext {
                    position: original_len - rest.len(),
                    context: "expected command token".into(),
                }
            }
        })?;

    let mut params = Vec::new();
    loop {
        let trimmed = rest.trim_start_matches(' ');
        if trimmed.len() == rest.len() {
            // No separator consumed: end of line (the command matcher never
            // leaves a non-space character here).
            if !rest.is_empty() {
                return Err(MessageParseError::ParseContext {
                    position: original_len - rest.len(),
                    context: "expected space before parameter".into(),
                });
            }
            break;
        }
        rest = trimmed;
        if rest.is_empty() {
            break;
        }
        if let Some(trailing) = rest.strip_prefix(':') {
            params.push(trailing.to_string());
            rest = "";
            break;
        }
        let end = rest.find(' ').unwrap_or(rest.len());
        params.push(rest[..end].to_string());
        rest = &rest[end..];
    }

    Ok(Message {
        tags: raw_tags.and_then(parse_tags),
        prefix: raw_prefix.map(Prefix::new_from_str),
        command: command.to_ascii_uppercase(),
        params,
    })
}

impl FromStr for Message {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Message, Self::Err> {
        let line = s.trim_end_matches(['\r', '\n']);
        parse_line(line).map_err(|cause| ProtocolError::InvalidMessage {
            string: s.to_owned(),
            cause,
        })
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(tags) = &self.tags {
            if !tags.is_empty() {
                f.write_str("@")?;
                for (i, Tag(key, value)) in tags.iter().enumerate() {
                    if i > 0 {
                        f.write_str(";")?;
                    }
                    f.write_str(key)?;
                    if let Some(value) = value {
                        f.write_str("=")?;
                        escape_tag_value(f, value)?;
                    }
                }
                f.write_str(" ")?;
            }
        }

        if let Some(prefix) = &self.prefix {
            write!(f, ":{prefix} ")?;
        }

        f.write_str(&self.command)?;

        if let Some((last, middles)) = self.params.split_last() {
            for p in middles {
                write!(f, " {p}")?;
            }
            if last.is_empty() || last.contains(' ') || last.starts_with(':') {
                write!(f, " :{last}")?;
            } else {
                write!(f, " {last}")?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_ping() {
        let msg: Message = "PING :server\r\n".parse().unwrap();
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.params, vec!["server"]);
    }

    #[test]
    fn parse_privmsg_with_prefix() {
        let msg: Message = ":nick!user@host PRIVMSG #channel :Hello, world!\r\n"
            .parse()
            .unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(
            msg.prefix,
            Some(Prefix::Nickname("nick".into(), "user".into(), "host".into()))
        );
        assert_eq!(msg.params, vec!["#channel", "Hello, world!"]);
    }

    #[test]
    fn parse_with_tags() {
        let msg: Message = "@time=2023-01-01T00:00:00Z;msgid=abc123 :nick PRIVMSG #ch :Hi\r\n"
            .parse()
            .unwrap();
        assert_eq!(msg.tag_value("time"), Some("2023-01-01T00:00:00Z"));
        assert_eq!(msg.tag_value("msgid"), Some("abc123"));
    }

    #[test]
    fn parse_escaped_tag_value() {
        let msg: Message = "@key=value\\swith\\sspace PING :test\r\n".parse().unwrap();
        assert_eq!(msg.tag_value("key"), Some("value with space"));
    }

    #[test]
    fn malformed_tags_dropped_message_kept() {
        let msg: Message = "@=bad PRIVMSG #ch :hi".parse().unwrap();
        assert!(msg.tags.is_none());
        assert_eq!(msg.command, "PRIVMSG");
    }

    #[test]
    fn empty_message_is_error() {
        assert!("".parse::<Message>().is_err());
        assert!("\r\n".parse::<Message>().is_err());
    }

    #[test]
    fn missing_command_is_error() {
        assert!(":prefix.only".parse::<Message>().is_err());
    }

    #[test]
    fn command_is_uppercased() {
        let msg: Message = "privmsg #ch :hi".parse().unwrap();
        assert_eq!(msg.command, "PRIVMSG");
    }

    #[test]
    fn numeric_command_accepted() {
        let msg: Message = ":server 001 nick :Welcome to IRC".parse().unwrap();
        assert_eq!(msg.command, "001");
        assert_eq!(msg.params[0], "nick");
    }

    #[test]
    fn trailing_may_be_empty_or_contain_colons() {
        let msg: Message = "AWAY :".parse().unwrap();
        assert_eq!(msg.params, vec![""]);

        let msg: Message = "PRIVMSG #ch ::)".parse().unwrap();
        assert_eq!(msg.params, vec!["#ch", ":)"]);
    }

    #[test]
    fn middle_params_then_trailing() {
        let msg: Message = "KICK #dev troll :be nice".parse().unwrap();
        assert_eq!(msg.params, vec!["#dev", "troll", "be nice"]);
    }

    #[test]
    fn format_emits_colon_when_required() {
        let msg = Message::new("PRIVMSG", vec!["#ch".into(), "two words".into()]);
        assert_eq!(msg.to_string(), "PRIVMSG #ch :two words");

        let msg = Message::new("AWAY", vec!["".into()]);
        assert_eq!(msg.to_string(), "AWAY :");

        let msg = Message::new("PRIVMSG", vec!["#ch".into(), ":)".into()]);
        assert_eq!(msg.to_string(), "PRIVMSG #ch ::)");

        let msg = Message::new("PRIVMSG", vec!["#ch".into(), "one".into()]);
        assert_eq!(msg.to_string(), "PRIVMSG #ch one");
    }

    #[test]
    fn roundtrip_canonical_strings() {
        for s in [
            "PING server1",
            "PING :token with space",
            ":nick!user@host PRIVMSG #channel :Hello, world!",
            "@time=2023-01-01T00:00:00.000Z :srv.example 001 nick :Welcome",
            ":irc.example.com 005 nick CHANTYPES=# PREFIX=(qaohv)~&@%+ :are supported by this server",
            "MODE #dev +ov alice bob",
            "@label=abc123 PONG :token",
        ] {
            let msg: Message = s.parse().unwrap();
            assert_eq!(msg.to_string(), s, "canonical round-trip failed");
        }
    }

    #[test]
    fn roundtrip_parse_format_parse() {
        let original: Message =
            "@msgid=x;+draft/reply=y :a!b@c PRIVMSG #ch :hi there".parse().unwrap();
        let reparsed: Message = original.to_string().parse().unwrap();
        assert_eq!(original, reparsed);
    }

    #[test]
    fn multiple_spaces_tolerated_on_input() {
        let msg: Message = "PRIVMSG  #ch   :hi".parse().unwrap();
        assert_eq!(msg.params, vec!["#ch", "hi"]);
    }
}
