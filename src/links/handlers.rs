//! Applying S2S traffic to local state.
//!
//! Every message arriving on an established link lands here. Rules:
//! events that change shared state are applied locally, fanned out to
//! affected local clients, and flooded to every other direct link; traffic
//! addressed to a single remote target is forwarded toward its next hop
//! and never echoed back to the link it came from.

use std::collections::HashMap;
use std::sync::Arc;

use loom_proto::mode::parse_channel_modes;
use loom_proto::{irc_to_lower, Message, Prefix};
use tracing::{debug, warn};

use crate::error::LinkError;
use crate::links::topology::LinkedServer;
use crate::links::{protocol, split};
use crate::security::bans::BanKind;
use crate::state::channel::{Member, MemberModes};
use crate::state::uid::ConnectionId;
use crate::state::user::{User, UserModes};
use crate::state::Fabric;

/// The raw name in the message prefix: a SID, a UID, or a server name.
fn prefix_name(msg: &Message) -> Option<&str> {
    match msg.prefix.as_ref()? {
        Prefix::ServerName(name) => Some(name),
        Prefix::Nickname(name, _, _) => Some(name),
    }
}

/// SID a UID belongs to.
fn sid_of(uid: &str) -> &str {
    uid.get(..3).unwrap_or(uid)
}

/// Apply one message from peer `origin_sid`.
pub async fn handle_link_message(
    fabric: &Arc<Fabric>,
    origin_sid: &str,
    msg: Message,
) -> Result<(), LinkError> {
    match msg.command.as_str() {
        "PING" => {
            let token = msg.param(0).unwrap_or(&fabric.server_info.sid).to_string();
            fabric.links.send_to_server(
                origin_sid,
                Arc::new(protocol::link_pong(&fabric.server_info.sid, &token)),
            );
            Ok(())
        }
        "PONG" => Ok(()),
        "SID" => handle_sid(fabric, origin_sid, &msg).await,
        "UID" => handle_uid(fabric, origin_sid, &msg).await,
        "NICK" => handle_nick(fabric, origin_sid, &msg).await,
        "QUIT" => handle_quit(fabric, origin_sid, &msg).await,
        "SJOIN" => handle_sjoin(fabric, origin_sid, &msg).await,
        "JOIN" => handle_join(fabric, origin_sid, &msg).await,
        "PART" => handle_part(fabric, origin_sid, &msg).await,
        "TMODE" => handle_tmode(fabric, origin_sid, &msg).await,
        "MODE" => handle_umode(fabric, origin_sid, &msg).await,
        "TOPIC" | "TB" => handle_topic(fabric, origin_sid, &msg).await,
        "PRIVMSG" | "NOTICE" => handle_message(fabric, origin_sid, &msg).await,
        "AWAY" => handle_away(fabric, origin_sid, &msg).await,
        "WALLOPS" => handle_wallops(fabric, origin_sid, &msg).await,
        "KILL" => handle_kill(fabric, origin_sid, &msg).await,
        "SQUIT" => handle_squit(fabric, origin_sid, &msg).await,
        "BAN" => handle_ban(fabric, origin_sid, &msg).await,
        "ERROR" => Err(LinkError::Protocol(
            msg.param(0).unwrap_or("peer sent ERROR").to_string(),
        )),
        other => {
            debug!(command = %other, origin = %origin_sid, "ignoring unknown link command");
            Ok(())
        }
    }
}

/// Flood a state-changing event onward, skipping the link it arrived on.
fn propagate_except(fabric: &Arc<Fabric>, origin_sid: &str, msg: &Message) {
    fabric
        .links
        .broadcast(Arc::new(msg.clone()), Some(origin_sid));
}

async fn handle_sid(
    fabric: &Arc<Fabric>,
    origin_sid: &str,
    msg: &Message,
) -> Result<(), LinkError> {
    if msg.params.len() < 4 {
        return Err(LinkError::Protocol("short SID introduction".into()));
    }
    let name = msg.params[0].clone();
    let hop: u32 = msg.params[1].parse().unwrap_or(2);
    let sid = msg.params[2].clone();
    let description = msg.params[3].clone();

    if fabric.server_bans.find_jupe(&name).is_some() {
        return Err(LinkError::HandshakeRejected(format!(
            "juped server {name} introduced"
        )));
    }

    let learned_from = prefix_name(msg)
        .map(str::to_owned)
        .unwrap_or_else(|| origin_sid.to_string());

    // A duplicate SID introduction is a fatal error for this link.
    let inserted = fabric.links.topology.insert(LinkedServer {
        sid: sid.clone(),
        name,
        description,
        version: String::new(),
        hop_count: hop,
        learned_from: Some(learned_from),
    });
    if !inserted || sid == fabric.server_info.sid {
        return Err(LinkError::DuplicateSid(sid));
    }

    propagate_except(fabric, origin_sid, msg);
    Ok(())
}

async fn handle_uid(
    fabric: &Arc<Fabric>,
    origin_sid: &str,
    msg: &Message,
) -> Result<(), LinkError> {
    if msg.params.len() < 9 {
        return Err(LinkError::Protocol("short UID introduction".into()));
    }
    let nick = msg.params[0].clone();
    let ts: i64 = msg.params[2].parse().unwrap_or_else(|_| chrono::Utc::now().timestamp());
    let umodes = msg.params[3].clone();
    let username = msg.params[4].clone();
    let host = msg.params[5].clone();
    let ip = msg.params[6]
        .parse()
        .unwrap_or(std::net::IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED));
    let uid = msg.params[7].clone();
    let realname = msg.params[8].clone();

    // Nick collision: oldest ConnectedAt wins, the loser is killed.
    if let Some(existing_conn) = fabric.users.nick_owner(&nick) {
        let existing = match fabric.users.get(existing_conn) {
            Some(arc) => arc,
            None => return Ok(()),
        };
        let (existing_ts, existing_uid) = {
            let u = existing.read().await;
            (u.connected_at, u.uid.clone())
        };
        if existing_uid == uid {
            return Ok(());
        }
        if existing_ts <= ts {
            // Incoming user loses: tell its server.
            warn!(nick = %nick, "nick collision, rejecting newcomer");
            fabric.links.send_to_server(
                sid_of(&uid),
                Arc::new(protocol::kill(
                    &fabric.server_info.sid,
                    &uid,
                    "Nick collision",
                )),
            );
            return Ok(());
        }
        // Our user loses.
        warn!(nick = %nick, "nick collision, dropping incumbent");
        fabric
            .disconnect_user(existing_conn, "Nick collision", true)
            .await;
    }

    let mut modes = UserModes::default();
    for (add, letter) in loom_proto::mode::parse_user_modes(&umodes) {
        match letter {
            'i' => modes.invisible = add,
            'w' => modes.wallops = add,
            's' => modes.snotices = add,
            'o' => modes.oper = add,
            'r' => modes.registered = add,
            'B' => modes.bot = add,
            'Z' => modes.secure = add,
            _ => {}
        }
    }

    fabric.users.insert(User {
        conn_id: ConnectionId::next(),
        uid: uid.clone(),
        nick,
        user: username,
        realname,
        ip,
        host,
        server: sid_of(&uid).to_string(),
        account: None,
        away: None,
        certfp: None,
        caps: Default::default(),
        modes,
        channels: HashMap::new(),
        connected_at: ts,
        last_activity: ts,
    });

    propagate_except(fabric, origin_sid, msg);
    Ok(())
}

async fn handle_nick(
    fabric: &Arc<Fabric>,
    origin_sid: &str,
    msg: &Message,
) -> Result<(), LinkError> {
    let Some(uid) = prefix_name(msg) else {
        return Ok(());
    };
    if msg.params.is_empty() {
        return Ok(());
    }
    let Some((conn, user_arc)) = fabric.users.get_by_uid(uid) else {
        return Ok(());
    };
    let new_nick = msg.params[0].clone();
    let ts: i64 = msg
        .param(1)
        .and_then(|t| t.parse().ok())
        .unwrap_or_else(|| chrono::Utc::now().timestamp());

    if let Some(owner) = fabric.users.nick_owner(&new_nick) {
        if owner != conn {
            // Collision on rename: the younger claim dies.
            let owner_arc = fabric.users.get(owner);
            let owner_ts = match &owner_arc {
                Some(arc) => arc.read().await.connected_at,
                None => i64::MAX,
            };
            if owner_ts <= ts {
                fabric.links.send_to_server(
                    sid_of(uid),
                    Arc::new(protocol::kill(
                        &fabric.server_info.sid,
                        uid,
                        "Nick collision",
                    )),
                );
                return Ok(());
            }
            fabric.disconnect_user(owner, "Nick collision", true).await;
        }
    }

    let (old_prefix, old_nick, channels) = {
        let user = user_arc.read().await;
        (
            user.prefix(),
            user.nick.clone(),
            user.channels.keys().cloned().collect::<Vec<_>>(),
        )
    };

    fabric.users.claim_nick(&new_nick, conn);
    if irc_to_lower(&old_nick) != irc_to_lower(&new_nick) {
        fabric.users.release_nick(&old_nick, conn);
    }
    {
        let mut user = user_arc.write().await;
        user.nick = new_nick.clone();
    }
    for name in &channels {
        if let Some(chan_arc) = fabric.channels.get(name) {
            let mut chan = chan_arc.write().await;
            if let Some(member) = chan.members.get_mut(&conn) {
                member.nick = new_nick.clone();
            }
        }
    }

    let change = Arc::new(Message::with_prefix(
        old_prefix,
        "NICK",
        vec![new_nick],
    ));
    fabric
        .broker
        .send_to_channels(channels.iter(), &change, Some(conn))
        .await;

    propagate_except(fabric, origin_sid, msg);
    Ok(())
}

async fn handle_quit(
    fabric: &Arc<Fabric>,
    origin_sid: &str,
    msg: &Message,
) -> Result<(), LinkError> {
    let Some(uid) = prefix_name(msg) else {
        return Ok(());
    };
    let Some((conn, _)) = fabric.users.get_by_uid(uid) else {
        return Ok(());
    };
    let reason = msg.param(0).unwrap_or("Client Quit").to_string();
    fabric.disconnect_user(conn, &reason, false).await;
    propagate_except(fabric, origin_sid, msg);
    Ok(())
}

/// Add a remote member to a channel and announce the JOIN locally.
async fn add_remote_member(
    fabric: &Arc<Fabric>,
    chan_arc: &Arc<tokio::sync::RwLock<crate::state::channel::Channel>>,
    conn: ConnectionId,
    modes: MemberModes,
    ts: i64,
) {
    let Some(user_arc) = fabric.users.get(conn) else {
        return;
    };

    let (canonical, already) = {
        let chan = chan_arc.read().await;
        (chan.name.clone(), chan.members.contains_key(&conn))
    };
    if already {
        return;
    }

    let prefix = {
        let mut chan = chan_arc.write().await;
        let mut user = user_arc.write().await;
        chan.members.insert(
            conn,
            Member {
                nick: user.nick.clone(),
                joined_at: ts,
                modes,
            },
        );
        user.channels.insert(irc_to_lower(&canonical), modes);
        user.prefix()
    };

    let join = Arc::new(Message::with_prefix(
        prefix,
        "JOIN",
        vec![canonical.clone()],
    ));
    fabric
        .broker
        .send_to_channel(&canonical, &join, Some(conn))
        .await;
}

async fn handle_join(
    fabric: &Arc<Fabric>,
    origin_sid: &str,
    msg: &Message,
) -> Result<(), LinkError> {
    let Some(uid) = prefix_name(msg) else {
        return Ok(());
    };
    if msg.params.len() < 2 {
        return Ok(());
    }
    let ts: i64 = msg.params[0].parse().unwrap_or(0);
    let channel = msg.params[1].clone();

    let Some((conn, _)) = fabric.users.get_by_uid(uid) else {
        return Ok(());
    };
    let (chan_arc, _) = fabric.channels.get_or_create(&channel, ts);
    add_remote_member(fabric, &chan_arc, conn, MemberModes::default(), ts).await;

    propagate_except(fabric, origin_sid, msg);
    Ok(())
}

async fn handle_part(
    fabric: &Arc<Fabric>,
    origin_sid: &str,
    msg: &Message,
) -> Result<(), LinkError> {
    let Some(uid) = prefix_name(msg) else {
        return Ok(());
    };
    if msg.params.is_empty() {
        return Ok(());
    }
    let Some((conn, user_arc)) = fabric.users.get_by_uid(uid) else {
        return Ok(());
    };
    let channel = msg.params[0].clone();
    let Some(chan_arc) = fabric.channels.get(&channel) else {
        return Ok(());
    };

    let (prefix, canonical) = {
        let chan = chan_arc.read().await;
        let user = user_arc.read().await;
        (user.prefix(), chan.name.clone())
    };

    let mut params = vec![canonical.clone()];
    if let Some(reason) = msg.param(1) {
        params.push(reason.to_string());
    }
    let part = Arc::new(Message::with_prefix(prefix, "PART", params));
    fabric
        .broker
        .send_to_channel(&canonical, &part, Some(conn))
        .await;

    {
        let mut chan = chan_arc.write().await;
        chan.members.remove(&conn);
    }
    {
        let mut user = user_arc.write().await;
        user.channels.remove(&irc_to_lower(&canonical));
    }
    fabric.channels.remove_if_dead(&canonical).await;

    propagate_except(fabric, origin_sid, msg);
    Ok(())
}

async fn handle_sjoin(
    fabric: &Arc<Fabric>,
    origin_sid: &str,
    msg: &Message,
) -> Result<(), LinkError> {
    if msg.params.len() < 4 {
        return Err(LinkError::Protocol("short SJOIN".into()));
    }
    let ts: i64 = msg.params[0].parse().unwrap_or(0);
    let channel = msg.params[1].clone();
    let mode_letters = msg.params[2].clone();
    let mode_args: Vec<String> = msg.params[3..msg.params.len() - 1].to_vec();
    let roster = msg.params.last().cloned().unwrap_or_default();

    let (chan_arc, created) = fabric.channels.get_or_create(&channel, ts);

    // Channel TS resolution: the older creation time wins.
    let we_lose = {
        let chan = chan_arc.read().await;
        !created && ts < chan.created_at
    };
    let they_lose = {
        let chan = chan_arc.read().await;
        !created && ts > chan.created_at
    };

    if we_lose {
        let mut chan = chan_arc.write().await;
        chan.created_at = ts;
        chan.modes = Default::default();
        chan.key = None;
        chan.limit = None;
        for member in chan.members.values_mut() {
            member.modes = MemberModes::default();
        }
        // Mirrors follow.
        let members: Vec<ConnectionId> = chan.members.keys().copied().collect();
        let folded = irc_to_lower(&chan.name);
        drop(chan);
        for conn in members {
            if let Some(user_arc) = fabric.users.get(conn) {
                let mut user = user_arc.write().await;
                if let Some(m) = user.channels.get_mut(&folded) {
                    *m = MemberModes::default();
                }
            }
        }
    }

    if !they_lose {
        // Winner's (or equal) modes apply.
        let parsed = parse_channel_modes(&mode_letters, &mode_args);
        let mut chan = chan_arc.write().await;
        for change in parsed.changes {
            match change.mode {
                'k' => chan.key = change.add.then(|| change.arg.clone().unwrap_or_default()),
                'l' => {
                    chan.limit = change
                        .add
                        .then(|| change.arg.as_deref().and_then(|a| a.parse().ok()))
                        .flatten()
                }
                letter => {
                    if let Some(flag) = crate::state::channel::ChannelModes::from_letter(letter) {
                        chan.modes.set(flag, change.add);
                    }
                }
            }
        }
    }

    // Merge the roster; prefixes only count when the sender's TS wins or
    // ties.
    for entry in roster.split_whitespace() {
        let stripped = entry.trim_start_matches(['~', '&', '@', '%', '+']);
        let prefix_len = entry.len() - stripped.len();
        let prefixes = &entry[..prefix_len];
        let uid = stripped;

        let Some((conn, _)) = fabric.users.get_by_uid(uid) else {
            continue;
        };
        let mut modes = MemberModes::default();
        if !they_lose {
            for letter in protocol::prefix_chars_to_letters(prefixes).chars() {
                modes.set(letter, true);
            }
        }
        add_remote_member(fabric, &chan_arc, conn, modes, ts).await;
    }

    propagate_except(fabric, origin_sid, msg);
    Ok(())
}

async fn handle_tmode(
    fabric: &Arc<Fabric>,
    origin_sid: &str,
    msg: &Message,
) -> Result<(), LinkError> {
    if msg.params.len() < 3 {
        return Ok(());
    }
    let ts: i64 = msg.params[0].parse().unwrap_or(0);
    let channel = msg.params[1].clone();
    let flags = msg.params[2].clone();
    let args: Vec<String> = msg.params[3..].to_vec();

    let Some(chan_arc) = fabric.channels.get(&channel) else {
        return Ok(());
    };
    {
        let chan = chan_arc.read().await;
        // Stale TS: the sender lost a collision it has not seen yet.
        if ts > chan.created_at {
            return Ok(());
        }
    }

    let source_prefix = match prefix_name(msg).and_then(|n| fabric.users.get_by_uid(n)) {
        Some((_, user_arc)) => user_arc.read().await.prefix(),
        None => fabric.server_prefix(),
    };

    let parsed = parse_channel_modes(&flags, &args);
    let canonical = {
        let mut chan = chan_arc.write().await;
        for change in &parsed.changes {
            match change.mode {
                'k' => {
                    chan.key = change
                        .add
                        .then(|| change.arg.clone().unwrap_or_default());
                }
                'l' => {
                    chan.limit = change
                        .add
                        .then(|| change.arg.as_deref().and_then(|a| a.parse().ok()))
                        .flatten();
                }
                'b' | 'e' | 'I' => {
                    let Some(mask) = change.arg.clone() else { continue };
                    let list = match change.mode {
                        'b' => &mut chan.bans,
                        'e' => &mut chan.excepts,
                        _ => &mut chan.invex,
                    };
                    if change.add {
                        crate::state::channel::Channel::add_list_entry(
                            list,
                            crate::state::channel::ListEntry {
                                mask,
                                set_by: origin_sid.to_string(),
                                set_at: chrono::Utc::now().timestamp(),
                            },
                        );
                    } else {
                        crate::state::channel::Channel::remove_list_entry(list, &mask);
                    }
                }
                'o' | 'v' | 'h' | 'a' | 'q' => {
                    let Some(target) = change.arg.as_deref() else { continue };
                    let resolved = fabric
                        .users
                        .get_by_uid(target)
                        .or_else(|| fabric.users.get_by_nick(target));
                    let Some((conn, user_arc)) = resolved else { continue };
                    if let Some(member) = chan.members.get_mut(&conn) {
                        member.modes.set(change.mode, change.add);
                        let updated = member.modes;
                        let folded = irc_to_lower(&chan.name);
                        let mut user = user_arc.write().await;
                        if let Some(m) = user.channels.get_mut(&folded) {
                            *m = updated;
                        }
                    }
                }
                letter => {
                    if let Some(flag) = crate::state::channel::ChannelModes::from_letter(letter) {
                        chan.modes.set(flag, change.add);
                    }
                }
            }
        }
        chan.name.clone()
    };

    let mut out_params = vec![canonical.clone(), flags.clone()];
    out_params.extend(args.clone());
    let out = Arc::new(Message::with_prefix(source_prefix, "MODE", out_params));
    fabric.broker.send_to_channel(&canonical, &out, None).await;

    propagate_except(fabric, origin_sid, msg);
    Ok(())
}

async fn handle_umode(
    fabric: &Arc<Fabric>,
    origin_sid: &str,
    msg: &Message,
) -> Result<(), LinkError> {
    let Some(uid) = prefix_name(msg) else {
        return Ok(());
    };
    let Some((_, user_arc)) = fabric.users.get_by_uid(uid) else {
        return Ok(());
    };
    let Some(flags) = msg.params.last() else {
        return Ok(());
    };

    let mut user = user_arc.write().await;
    for (add, letter) in loom_proto::mode::parse_user_modes(flags) {
        match letter {
            'i' => user.modes.invisible = add,
            'w' => user.modes.wallops = add,
            's' => user.modes.snotices = add,
            'o' => user.modes.oper = add,
            'r' => user.modes.registered = add,
            'B' => user.modes.bot = add,
            'Z' => user.modes.secure = add,
            _ => {}
        }
    }
    drop(user);

    propagate_except(fabric, origin_sid, msg);
    Ok(())
}

async fn handle_topic(
    fabric: &Arc<Fabric>,
    origin_sid: &str,
    msg: &Message,
) -> Result<(), LinkError> {
    let is_burst = msg.command == "TB";
    let (channel, ts, set_by, text) = if is_burst {
        if msg.params.len() < 4 {
            return Ok(());
        }
        (
            msg.params[0].clone(),
            msg.params[1].parse().unwrap_or(0),
            msg.params[2].clone(),
            msg.params[3].clone(),
        )
    } else {
        if msg.params.len() < 2 {
            return Ok(());
        }
        let setter = prefix_name(msg).unwrap_or(origin_sid).to_string();
        (
            msg.params[0].clone(),
            chrono::Utc::now().timestamp(),
            setter,
            msg.params[1].clone(),
        )
    };

    let Some(chan_arc) = fabric.channels.get(&channel) else {
        return Ok(());
    };

    let (changed, canonical) = {
        let mut chan = chan_arc.write().await;
        // Burst topics only replace older local state.
        let accept = if is_burst {
            match &chan.topic {
                Some(existing) => ts < existing.set_at,
                None => true,
            }
        } else {
            true
        };
        if accept {
            chan.topic = if text.is_empty() {
                None
            } else {
                Some(crate::state::channel::Topic {
                    text: text.clone(),
                    set_by: set_by.clone(),
                    set_at: ts,
                })
            };
        }
        (accept, chan.name.clone())
    };

    if changed && !is_burst {
        let prefix = match fabric.users.get_by_uid(&set_by) {
            Some((_, user_arc)) => user_arc.read().await.prefix(),
            None => fabric.server_prefix(),
        };
        let out = Arc::new(Message::with_prefix(
            prefix,
            "TOPIC",
            vec![canonical.clone(), text],
        ));
        fabric.broker.send_to_channel(&canonical, &out, None).await;
    }

    propagate_except(fabric, origin_sid, msg);
    Ok(())
}

async fn handle_message(
    fabric: &Arc<Fabric>,
    origin_sid: &str,
    msg: &Message,
) -> Result<(), LinkError> {
    if msg.params.len() < 2 {
        return Ok(());
    }
    let target = msg.params[0].clone();
    let text = msg.params[1].clone();

    let sender_prefix = match prefix_name(msg).and_then(|n| fabric.users.get_by_uid(n)) {
        Some((_, user_arc)) => user_arc.read().await.prefix(),
        None => fabric.server_prefix(),
    };

    // STATUSMSG prefixes ride along in front of the channel sigil. Local
    // (`&`) channels never cross links, so the only channel form here is
    // `#`-based.
    let bare = target.trim_start_matches(['~', '&', '@', '%', '+']);
    if bare.starts_with('#') {
        let Some(chan_arc) = fabric.channels.get(bare) else {
            return Ok(());
        };
        let canonical = chan_arc.read().await.name.clone();
        let mut out = Message::with_prefix(
            sender_prefix,
            msg.command.clone(),
            vec![canonical.clone(), text],
        );
        out.set_tag("time", Some(loom_proto::server_time(chrono::Utc::now())));
        fabric
            .broker
            .send_to_channel(&canonical, &Arc::new(out), None)
            .await;
        propagate_except(fabric, origin_sid, msg);
        return Ok(());
    }

    // UID target: deliver locally or forward toward the owner.
    let Some((conn, target_arc)) = fabric.users.get_by_uid(&target) else {
        return Ok(());
    };
    let (server, nick) = {
        let t = target_arc.read().await;
        (t.server.clone(), t.nick.clone())
    };
    if server == fabric.server_info.sid {
        let mut out = Message::with_prefix(
            sender_prefix,
            msg.command.clone(),
            vec![nick, text],
        );
        out.set_tag("time", Some(loom_proto::server_time(chrono::Utc::now())));
        fabric.broker.send_to_connection(conn, &Arc::new(out));
    } else {
        // Forward toward the next hop, never back the way it came.
        if fabric
            .links
            .route(&server)
            .is_some_and(|peer| peer.sid != origin_sid)
        {
            fabric.links.send_to_server(&server, Arc::new(msg.clone()));
        }
    }
    Ok(())
}

async fn handle_away(
    fabric: &Arc<Fabric>,
    origin_sid: &str,
    msg: &Message,
) -> Result<(), LinkError> {
    let Some(uid) = prefix_name(msg) else {
        return Ok(());
    };
    let Some((_, user_arc)) = fabric.users.get_by_uid(uid) else {
        return Ok(());
    };
    {
        let mut user = user_arc.write().await;
        user.away = msg.param(0).filter(|r| !r.is_empty()).map(str::to_owned);
    }
    propagate_except(fabric, origin_sid, msg);
    Ok(())
}

async fn handle_wallops(
    fabric: &Arc<Fabric>,
    origin_sid: &str,
    msg: &Message,
) -> Result<(), LinkError> {
    let text = msg.param(0).unwrap_or_default().to_string();
    let prefix = match prefix_name(msg).and_then(|n| fabric.users.get_by_uid(n)) {
        Some((_, user_arc)) => user_arc.read().await.prefix(),
        None => fabric.server_prefix(),
    };
    let out = Arc::new(Message::with_prefix(prefix, "WALLOPS", vec![text]));
    fabric.broker.send_to_operators(&out, true).await;
    propagate_except(fabric, origin_sid, msg);
    Ok(())
}

async fn handle_kill(
    fabric: &Arc<Fabric>,
    origin_sid: &str,
    msg: &Message,
) -> Result<(), LinkError> {
    if msg.params.is_empty() {
        return Ok(());
    }
    let target_uid = msg.params[0].clone();
    let reason = msg.param(1).unwrap_or("Killed").to_string();

    let Some((conn, target_arc)) = fabric.users.get_by_uid(&target_uid) else {
        return Ok(());
    };
    let (server, nick) = {
        let t = target_arc.read().await;
        (t.server.clone(), t.nick.clone())
    };

    if server == fabric.server_info.sid {
        // Our client: notify, then the canonical disconnect floods QUIT.
        let notice = Arc::new(Message::with_prefix(
            fabric.server_prefix(),
            "KILL",
            vec![nick, reason.clone()],
        ));
        fabric.broker.send_to_connection(conn, &notice);
        fabric.disconnect_user(conn, &reason, true).await;
    } else {
        fabric.disconnect_user(conn, &reason, false).await;
        propagate_except(fabric, origin_sid, msg);
    }
    Ok(())
}

async fn handle_squit(
    fabric: &Arc<Fabric>,
    origin_sid: &str,
    msg: &Message,
) -> Result<(), LinkError> {
    if msg.params.is_empty() {
        return Ok(());
    }
    let sid = msg.params[0].clone();
    split::handle_server_loss(fabric, &sid).await;
    propagate_except(fabric, origin_sid, msg);
    Ok(())
}

async fn handle_ban(
    fabric: &Arc<Fabric>,
    origin_sid: &str,
    msg: &Message,
) -> Result<(), LinkError> {
    if msg.params.len() < 4 {
        return Ok(());
    }
    let kind = match msg.params[0].as_str() {
        "K" => BanKind::KLine,
        "G" => BanKind::GLine,
        "Z" => BanKind::ZLine,
        "J" => BanKind::Jupe,
        _ => return Ok(()),
    };
    let pattern = msg.params[1].clone();
    let expires: i64 = msg.params[2].parse().unwrap_or(0);
    let reason = msg.params[3].clone();

    fabric.server_bans.add(
        kind,
        &pattern,
        &reason,
        origin_sid,
        (expires > 0).then_some(expires),
    );

    propagate_except(fabric, origin_sid, msg);
    Ok(())
}
