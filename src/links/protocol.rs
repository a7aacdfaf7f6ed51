//! S2S wire forms.
//!
//! Link traffic uses ordinary codec lines with SID/UID prefixes,
//! TS6-flavored: servers are introduced with `SID`, users with `UID`,
//! channels merge through `SJOIN`, and timestamps ride along wherever
//! collision resolution needs them.

use loom_proto::{Message, Prefix};

use crate::links::topology::LinkedServer;
use crate::security::bans::BanKind;
use crate::state::user::User;

/// `PASS <password> TS 6 :<sid>` — link handshake, first line.
pub fn pass_line(password: &str, sid: &str) -> Message {
    Message::new(
        "PASS",
        vec![
            password.to_string(),
            "TS".to_string(),
            "6".to_string(),
            sid.to_string(),
        ],
    )
}

/// `SERVER <name> 1 :<description>` — link handshake, second line.
pub fn server_line(name: &str, description: &str) -> Message {
    Message::new(
        "SERVER",
        vec![name.to_string(), "1".to_string(), description.to_string()],
    )
}

/// `:<via> SID <name> <hop> <sid> :<desc>` — introduce a remote server.
pub fn sid_intro(via: &str, server: &LinkedServer) -> Message {
    Message::with_prefix(
        Prefix::ServerName(via.to_string()),
        "SID",
        vec![
            server.name.clone(),
            server.hop_count.to_string(),
            server.sid.clone(),
            server.description.clone(),
        ],
    )
}

/// `:<sid> UID <nick> <hop> <ts> <modes> <user> <host> <ip> <uid> :<real>`.
pub fn uid_introduction(user: &User) -> Message {
    Message::with_prefix(
        Prefix::ServerName(user.server.clone()),
        "UID",
        vec![
            user.nick.clone(),
            "1".to_string(),
            user.connected_at.to_string(),
            user.modes.as_mode_string(),
            user.user.clone(),
            user.host.clone(),
            user.ip.to_string(),
            user.uid.clone(),
            user.realname.clone(),
        ],
    )
}

/// `:<uid> NICK <new> <ts>`.
pub fn nick_change(uid: &str, new_nick: &str) -> Message {
    Message::with_prefix(
        Prefix::ServerName(uid.to_string()),
        "NICK",
        vec![
            new_nick.to_string(),
            chrono::Utc::now().timestamp().to_string(),
        ],
    )
}

/// `:<uid> JOIN <ts> <chan> +`.
pub fn user_join(uid: &str, ts: i64, channel: &str) -> Message {
    Message::with_prefix(
        Prefix::ServerName(uid.to_string()),
        "JOIN",
        vec![ts.to_string(), channel.to_string(), "+".to_string()],
    )
}

/// `:<uid> PART <chan> [:reason]`.
pub fn user_part(uid: &str, channel: &str, reason: &str) -> Message {
    let mut params = vec![channel.to_string()];
    if !reason.is_empty() {
        params.push(reason.to_string());
    }
    Message::with_prefix(Prefix::ServerName(uid.to_string()), "PART", params)
}

/// `:<uid> TOPIC <chan> :<text>`.
pub fn topic_change(uid: &str, channel: &str, text: &str) -> Message {
    Message::with_prefix(
        Prefix::ServerName(uid.to_string()),
        "TOPIC",
        vec![channel.to_string(), text.to_string()],
    )
}

/// `:<uid> KICK <chan> <target> :<reason>`.
pub fn kick(uid: &str, channel: &str, target: &str, reason: &str) -> Message {
    Message::with_prefix(
        Prefix::ServerName(uid.to_string()),
        "KICK",
        vec![
            channel.to_string(),
            target.to_string(),
            reason.to_string(),
        ],
    )
}

/// `:<uid> MODE <uid> :<flags>` — user mode change.
pub fn user_mode(uid: &str, flags: &str) -> Message {
    Message::with_prefix(
        Prefix::ServerName(uid.to_string()),
        "MODE",
        vec![uid.to_string(), flags.to_string()],
    )
}

/// `:<uid> TMODE <ts> <chan> <flags> [args...]` — channel mode change.
pub fn channel_mode(
    uid: &str,
    ts: i64,
    channel: &str,
    flags: &str,
    args: &[String],
) -> Message {
    let mut params = vec![ts.to_string(), channel.to_string(), flags.to_string()];
    params.extend(args.iter().cloned());
    Message::with_prefix(Prefix::ServerName(uid.to_string()), "TMODE", params)
}

/// `:<uid> PRIVMSG|NOTICE <target> :<text>` — target is a UID or channel.
pub fn user_message(uid: &str, command: &str, target: &str, text: &str) -> Message {
    Message::with_prefix(
        Prefix::ServerName(uid.to_string()),
        command,
        vec![target.to_string(), text.to_string()],
    )
}

/// `:<uid> AWAY [:reason]`.
pub fn away_change(uid: &str, reason: Option<&str>) -> Message {
    let params = match reason {
        Some(r) => vec![r.to_string()],
        None => Vec::new(),
    };
    Message::with_prefix(Prefix::ServerName(uid.to_string()), "AWAY", params)
}

/// `:<uid> WALLOPS :<text>`.
pub fn wallops(uid: &str, text: &str) -> Message {
    Message::with_prefix(
        Prefix::ServerName(uid.to_string()),
        "WALLOPS",
        vec![text.to_string()],
    )
}

/// `:<source> KILL <target-uid> :<reason>`.
pub fn kill(source: &str, target_uid: &str, reason: &str) -> Message {
    Message::with_prefix(
        Prefix::ServerName(source.to_string()),
        "KILL",
        vec![target_uid.to_string(), reason.to_string()],
    )
}

/// `SQUIT <sid> :<reason>`.
pub fn squit(sid: &str, reason: &str) -> Message {
    Message::new("SQUIT", vec![sid.to_string(), reason.to_string()])
}

/// `:<uid> BAN <kind-letter> <pattern> <expires|0> :<reason>` — network
/// ban classes (G-line, Jupe) flooded to peers.
pub fn global_ban(
    uid: &str,
    kind: BanKind,
    pattern: &str,
    reason: &str,
    expires_at: Option<i64>,
) -> Message {
    let letter = match kind {
        BanKind::KLine => "K",
        BanKind::GLine => "G",
        BanKind::ZLine => "Z",
        BanKind::Jupe => "J",
    };
    Message::with_prefix(
        Prefix::ServerName(uid.to_string()),
        "BAN",
        vec![
            letter.to_string(),
            pattern.to_string(),
            expires_at.unwrap_or(0).to_string(),
            reason.to_string(),
        ],
    )
}

/// `:<sid> SJOIN <ts> <chan> <modes> [args] :<prefixed-uids>`.
pub fn sjoin(
    sid: &str,
    ts: i64,
    channel: &str,
    mode_letters: &str,
    mode_args: &[String],
    members: &[(String, String)],
) -> Message {
    let mut params = vec![ts.to_string(), channel.to_string(), mode_letters.to_string()];
    params.extend(mode_args.iter().cloned());
    let roster = members
        .iter()
        .map(|(prefixes, uid)| format!("{prefixes}{uid}"))
        .collect::<Vec<_>>()
        .join(" ");
    params.push(roster);
    Message::with_prefix(Prefix::ServerName(sid.to_string()), "SJOIN", params)
}

/// `:<sid> TB <chan> <ts> <setter> :<text>` — topic burst.
pub fn topic_burst(sid: &str, channel: &str, ts: i64, set_by: &str, text: &str) -> Message {
    Message::with_prefix(
        Prefix::ServerName(sid.to_string()),
        "TB",
        vec![
            channel.to_string(),
            ts.to_string(),
            set_by.to_string(),
            text.to_string(),
        ],
    )
}

/// `:<sid> PING :<token>` / `:<sid> PONG :<token>` — link liveness.
pub fn link_ping(sid: &str, token: &str) -> Message {
    Message::with_prefix(
        Prefix::ServerName(sid.to_string()),
        "PING",
        vec![token.to_string()],
    )
}

pub fn link_pong(sid: &str, token: &str) -> Message {
    Message::with_prefix(
        Prefix::ServerName(sid.to_string()),
        "PONG",
        vec![token.to_string()],
    )
}

/// Whether events on this channel cross server links. `&` channels are
/// server-local.
pub fn crosses_links(channel: &str) -> bool {
    channel.starts_with('#')
}

/// Member-mode letters for SJOIN prefixes: `~&@%+` ⇄ `qaohv`.
pub fn prefix_chars_to_letters(prefixes: &str) -> String {
    prefixes
        .chars()
        .filter_map(|c| match c {
            '~' => Some('q'),
            '&' => Some('a'),
            '@' => Some('o'),
            '%' => Some('h'),
            '+' => Some('v'),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handshake_lines() {
        assert_eq!(
            pass_line("hunter2", "001").to_string(),
            "PASS hunter2 TS 6 001"
        );
        assert_eq!(
            server_line("hub.loom.example", "The hub").to_string(),
            "SERVER hub.loom.example 1 :The hub"
        );
    }

    #[test]
    fn sjoin_roster() {
        let msg = sjoin(
            "001",
            12345,
            "#dev",
            "+nt",
            &[],
            &[("@".to_string(), "001AAAAAA".to_string()), (String::new(), "001AAAAAB".to_string())],
        );
        assert_eq!(
            msg.to_string(),
            ":001 SJOIN 12345 #dev +nt :@001AAAAAA 001AAAAAB"
        );
    }

    #[test]
    fn prefix_letter_mapping() {
        assert_eq!(prefix_chars_to_letters("~@+"), "qov");
        assert_eq!(prefix_chars_to_letters(""), "");
    }
}
