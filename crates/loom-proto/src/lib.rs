//! A protocol library for IRC servers with IRCv3 support.
//!
//! `loom-proto` provides the pieces an IRC daemon needs to speak the wire
//! protocol without owning any server state:
//!
//! - [`Message`] parsing and canonical serialization (tags, prefix, command,
//!   params) with the RFC 1459 / IRCv3 line grammar
//! - [`LineCodec`] for framed reads/writes over tokio streams
//! - RFC 1459 case mapping ([`irc_to_lower`], [`irc_eq`]) and token
//!   validation for nicknames and channel names
//! - Hostmask wildcard matching for bans, exceptions, and invite masks
//! - [`Numeric`] reply identifiers and ISUPPORT token assembly
//! - The MODE string grammar with parameter binding
//! - IRCv3 capability names as a compact [`CapSet`] bitset
//! - Server-side SASL mechanism state machines (PLAIN, EXTERNAL,
//!   SCRAM-SHA-256)

pub mod caps;
pub mod casemap;
pub mod chan;
pub mod codec;
pub mod error;
pub mod hostmask;
pub mod isupport;
pub mod message;
pub mod mode;
pub mod nick;
pub mod numeric;
pub mod prefix;
pub mod sasl;
pub mod tags;

pub use caps::CapSet;
pub use casemap::{irc_eq, irc_to_lower};
pub use chan::ChannelExt;
pub use codec::LineCodec;
pub use error::{ProtocolError, Result};
pub use hostmask::{matches_hostmask, wildcard_match};
pub use message::{Message, Tag};
pub use mode::{ModeArg, ModeChange, MAX_MODES};
pub use nick::NickExt;
pub use numeric::Numeric;
pub use prefix::Prefix;

/// Maximum length in bytes of a message line excluding the tags section,
/// including the trailing CRLF.
pub const MAX_CONTENT_LEN: usize = 512;

/// Maximum length in bytes of the tags section, including the leading `@`
/// and the trailing space.
pub const MAX_TAGS_LEN: usize = 8191;

/// Format a `chrono` UTC timestamp as an IRCv3 `server-time` tag value.
pub fn server_time(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
