//! Channel-related types and state.

use std::collections::{HashMap, HashSet};

use bitflags::bitflags;

use crate::state::uid::ConnectionId;

bitflags! {
    /// Channel flag modes (the parameterless letters of `CHANMODES`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChannelModes: u16 {
        /// +n — no external messages.
        const NO_EXTERNAL    = 1 << 0;
        /// +t — topic settable by ops only.
        const TOPIC_PROTECTED = 1 << 1;
        /// +i — invite only.
        const INVITE_ONLY    = 1 << 2;
        /// +m — moderated.
        const MODERATED      = 1 << 3;
        /// +s — secret.
        const SECRET         = 1 << 4;
        /// +p — private.
        const PRIVATE        = 1 << 5;
        /// +r — registered channel.
        const REGISTERED     = 1 << 6;
    }
}

impl ChannelModes {
    /// Flag for a mode letter, if it is a channel flag mode.
    pub fn from_letter(c: char) -> Option<ChannelModes> {
        match c {
            'n' => Some(ChannelModes::NO_EXTERNAL),
            't' => Some(ChannelModes::TOPIC_PROTECTED),
            'i' => Some(ChannelModes::INVITE_ONLY),
            'm' => Some(ChannelModes::MODERATED),
            's' => Some(ChannelModes::SECRET),
            'p' => Some(ChannelModes::PRIVATE),
            'r' => Some(ChannelModes::REGISTERED),
            _ => None,
        }
    }

    /// Letters of all set flags, in CHANMODES order.
    pub fn letters(self) -> String {
        let mut s = String::new();
        for (letter, flag) in [
            ('i', ChannelModes::INVITE_ONLY),
            ('m', ChannelModes::MODERATED),
            ('n', ChannelModes::NO_EXTERNAL),
            ('p', ChannelModes::PRIVATE),
            ('s', ChannelModes::SECRET),
            ('t', ChannelModes::TOPIC_PROTECTED),
            ('r', ChannelModes::REGISTERED),
        ] {
            if self.contains(flag) {
                s.push(letter);
            }
        }
        s
    }
}

/// An entry in a mask list (bans `+b`, exceptions `+e`, invites `+I`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListEntry {
    pub mask: String,
    pub set_by: String,
    pub set_at: i64,
}

/// Channel topic with metadata.
#[derive(Debug, Clone)]
pub struct Topic {
    pub text: String,
    pub set_by: String,
    pub set_at: i64,
}

/// Member modes (owner, admin, op, halfop, voice).
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemberModes {
    pub owner: bool,  // +q (~)
    pub admin: bool,  // +a (&)
    pub op: bool,     // +o (@)
    pub halfop: bool, // +h (%)
    pub voice: bool,  // +v (+)
}

impl MemberModes {
    /// Highest prefix character for this member.
    /// Priority: ~ > & > @ > % > +
    pub fn prefix_char(&self) -> Option<char> {
        if self.owner {
            Some('~')
        } else if self.admin {
            Some('&')
        } else if self.op {
            Some('@')
        } else if self.halfop {
            Some('%')
        } else if self.voice {
            Some('+')
        } else {
            None
        }
    }

    /// All prefix characters, highest to lowest, for multi-prefix clients.
    pub fn all_prefix_chars(&self) -> String {
        let mut s = String::with_capacity(5);
        if self.owner {
            s.push('~');
        }
        if self.admin {
            s.push('&');
        }
        if self.op {
            s.push('@');
        }
        if self.halfop {
            s.push('%');
        }
        if self.voice {
            s.push('+');
        }
        s
    }

    pub fn has_op_or_higher(&self) -> bool {
        self.owner || self.admin || self.op
    }

    pub fn has_halfop_or_higher(&self) -> bool {
        self.owner || self.admin || self.op || self.halfop
    }

    pub fn has_voice_or_higher(&self) -> bool {
        self.owner || self.admin || self.op || self.halfop || self.voice
    }

    /// Get a member mode bit by its letter.
    pub fn get(&self, letter: char) -> bool {
        match letter {
            'q' => self.owner,
            'a' => self.admin,
            'o' => self.op,
            'h' => self.halfop,
            'v' => self.voice,
            _ => false,
        }
    }

    /// Set a member mode bit by its letter.
    pub fn set(&mut self, letter: char, value: bool) {
        match letter {
            'q' => self.owner = value,
            'a' => self.admin = value,
            'o' => self.op = value,
            'h' => self.halfop = value,
            'v' => self.voice = value,
            _ => {}
        }
    }
}

/// One channel member.
#[derive(Debug, Clone)]
pub struct Member {
    /// Case-preserved nickname at last observation.
    pub nick: String,
    pub joined_at: i64,
    pub modes: MemberModes,
}

/// A channel: created lazily on first JOIN, destroyed when the last member
/// parts unless registered.
#[derive(Debug)]
pub struct Channel {
    /// Case-preserved name.
    pub name: String,
    /// Creation timestamp; the tiebreaker in S2S TS collisions.
    pub created_at: i64,
    pub topic: Option<Topic>,
    /// +k key.
    pub key: Option<String>,
    /// +l member limit.
    pub limit: Option<u32>,
    pub modes: ChannelModes,
    pub bans: Vec<ListEntry>,
    pub excepts: Vec<ListEntry>,
    pub invex: Vec<ListEntry>,
    /// Transient invitations from INVITE; cleared on join.
    pub invited: HashSet<ConnectionId>,
    pub members: HashMap<ConnectionId, Member>,
}

impl Channel {
    /// New empty channel.
    pub fn new(name: impl Into<String>, created_at: i64) -> Self {
        Self {
            name: name.into(),
            created_at,
            topic: None,
            key: None,
            limit: None,
            modes: ChannelModes::NO_EXTERNAL | ChannelModes::TOPIC_PROTECTED,
            bans: Vec::new(),
            excepts: Vec::new(),
            invex: Vec::new(),
            invited: HashSet::new(),
            members: HashMap::new(),
        }
    }

    /// Whether the channel survives with zero members.
    pub fn is_registered(&self) -> bool {
        self.modes.contains(ChannelModes::REGISTERED)
    }

    /// Mode string (`+ntk`) plus parameters for RPL_CHANNELMODEIS.
    /// The key itself is only disclosed to members.
    pub fn mode_string(&self, show_params: bool) -> (String, Vec<String>) {
        let mut letters = String::from("+");
        letters.push_str(&self.modes.letters());
        let mut params = Vec::new();
        if self.key.is_some() {
            letters.push('k');
            if show_params {
                if let Some(key) = &self.key {
                    params.push(key.clone());
                }
            }
        }
        if let Some(limit) = self.limit {
            letters.push('l');
            if show_params {
                params.push(limit.to_string());
            }
        }
        (letters, params)
    }

    /// Add a mask to a list, keeping masks unique. Returns false when the
    /// mask was already present.
    pub fn add_list_entry(list: &mut Vec<ListEntry>, entry: ListEntry) -> bool {
        if list
            .iter()
            .any(|e| loom_proto::irc_eq(&e.mask, &entry.mask))
        {
            return false;
        }
        list.push(entry);
        true
    }

    /// Remove a mask from a list. Returns false when absent.
    pub fn remove_list_entry(list: &mut Vec<ListEntry>, mask: &str) -> bool {
        let before = list.len();
        list.retain(|e| !loom_proto::irc_eq(&e.mask, mask));
        list.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_channel_defaults_nt() {
        let chan = Channel::new("#dev", 0);
        assert!(chan.modes.contains(ChannelModes::NO_EXTERNAL));
        assert!(chan.modes.contains(ChannelModes::TOPIC_PROTECTED));
        assert_eq!(chan.mode_string(false).0, "+nt");
    }

    #[test]
    fn prefix_precedence() {
        let mut m = MemberModes {
            voice: true,
            ..Default::default()
        };
        assert_eq!(m.prefix_char(), Some('+'));
        m.op = true;
        assert_eq!(m.prefix_char(), Some('@'));
        m.owner = true;
        assert_eq!(m.prefix_char(), Some('~'));
        assert_eq!(m.all_prefix_chars(), "~@+");
    }

    #[test]
    fn mode_string_with_key_and_limit() {
        let mut chan = Channel::new("#dev", 0);
        chan.key = Some("sekrit".into());
        chan.limit = Some(25);
        let (letters, params) = chan.mode_string(true);
        assert_eq!(letters, "+ntkl");
        assert_eq!(params, vec!["sekrit", "25"]);

        let (_, hidden) = chan.mode_string(false);
        assert!(hidden.is_empty());
    }

    #[test]
    fn list_entries_stay_unique() {
        let mut list = Vec::new();
        let entry = ListEntry {
            mask: "*!*@evil.host".into(),
            set_by: "oper".into(),
            set_at: 0,
        };
        assert!(Channel::add_list_entry(&mut list, entry.clone()));
        // Same mask in different case is a duplicate under the fold.
        let dup = ListEntry {
            mask: "*!*@EVIL.host".into(),
            ..entry
        };
        assert!(!Channel::add_list_entry(&mut list, dup));
        assert_eq!(list.len(), 1);

        assert!(Channel::remove_list_entry(&mut list, "*!*@Evil.Host"));
        assert!(list.is_empty());
    }
}
