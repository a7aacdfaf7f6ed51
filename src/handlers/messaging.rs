//! PRIVMSG and NOTICE delivery.
//!
//! The two commands share one pipeline; the only differences are that
//! NOTICE never generates error replies and never triggers `RPL_AWAY`.
//! Checks on channel targets run in order: existence, `+n` externals,
//! `+m` moderation, ban/quiet mutes, `~T` text filters.

use std::sync::Arc;

use async_trait::async_trait;
use loom_proto::{ChannelExt, Message, Numeric};

use super::{BanSnapshot, Context, Handler, HandlerResult, HandlerSpec};
use crate::security::extban;
use crate::state::channel::{ChannelModes, MemberModes};
use crate::state::uid::ConnectionId;

/// STATUSMSG prefixes, highest to lowest.
const STATUS_PREFIXES: &[(char, fn(&MemberModes) -> bool)] = &[
    ('~', |m| m.owner),
    ('&', |m| m.admin),
    ('@', |m| m.op),
    ('%', |m| m.halfop),
    ('+', |m| m.voice),
];

pub struct PrivmsgHandler;

#[async_trait]
impl Handler for PrivmsgHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "PRIVMSG",
            min_params: 1,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        deliver(ctx, msg, false).await
    }
}

pub struct NoticeHandler;

#[async_trait]
impl Handler for NoticeHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "NOTICE",
            min_params: 1,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        deliver(ctx, msg, true).await
    }
}

async fn deliver(ctx: &mut Context<'_>, msg: &Message, is_notice: bool) -> HandlerResult {
    let raw_target = msg.params[0].clone();
    let text = msg.param(1).unwrap_or_default().to_string();

    if text.is_empty() {
        if !is_notice {
            ctx.numeric(Numeric::ERR_NOTEXTTOSEND, ["No text to send"]);
        }
        return Ok(());
    }

    // STATUSMSG: a leading prefix char narrows delivery to members holding
    // that status or higher.
    let (target, min_status) = match raw_target.chars().next() {
        Some(c) if STATUS_PREFIXES.iter().any(|(p, _)| *p == c) => {
            let rest = &raw_target[c.len_utf8()..];
            if rest.is_channel_name() {
                (rest.to_string(), Some(c))
            } else {
                (raw_target.clone(), None)
            }
        }
        _ => (raw_target.clone(), None),
    };

    if target.as_str().is_channel_name() {
        deliver_to_channel(ctx, &raw_target, &target, min_status, text, is_notice).await
    } else {
        deliver_to_user(ctx, &target, text, is_notice).await
    }
}

/// Whether a member holds `min_status` or higher.
fn holds_status(modes: &MemberModes, min_status: char) -> bool {
    for (prefix, check) in STATUS_PREFIXES {
        if check(modes) {
            return true;
        }
        if *prefix == min_status {
            break;
        }
    }
    false
}

async fn deliver_to_channel(
    ctx: &mut Context<'_>,
    raw_target: &str,
    channel: &str,
    min_status: Option<char>,
    text: String,
    is_notice: bool,
) -> HandlerResult {
    let cmd = if is_notice { "NOTICE" } else { "PRIVMSG" };

    let Some(chan_arc) = ctx.fabric.channels.get(channel) else {
        if !is_notice {
            ctx.numeric(Numeric::ERR_NOSUCHCHANNEL, [channel, "No such channel"]);
        }
        return Ok(());
    };

    let Some(user_arc) = ctx.user() else {
        return Ok(());
    };
    let snapshot = BanSnapshot::of(&user_arc).await;
    let ban_ctx = snapshot.context();

    // Snapshot channel facts under one read lock.
    let (member_modes, chan_modes, bans, excepts, recipients) = {
        let chan = chan_arc.read().await;
        let member_modes = chan.members.get(&ctx.conn()).map(|m| m.modes);
        let recipients: Vec<(ConnectionId, MemberModes)> = chan
            .members
            .iter()
            .map(|(conn, member)| (*conn, member.modes))
            .collect();
        (
            member_modes,
            chan.modes,
            chan.bans.clone(),
            chan.excepts.clone(),
            recipients,
        )
    };

    let reject = |ctx: &Context<'_>| {
        if !is_notice {
            ctx.numeric(
                Numeric::ERR_CANNOTSENDTOCHAN,
                [channel, "Cannot send to channel"],
            );
        }
    };

    if member_modes.is_none() && chan_modes.contains(ChannelModes::NO_EXTERNAL) {
        reject(ctx);
        return Ok(());
    }

    let voice_plus = member_modes.is_some_and(|m| m.has_voice_or_higher());
    if chan_modes.contains(ChannelModes::MODERATED) && !voice_plus {
        reject(ctx);
        return Ok(());
    }

    let halfop_plus = member_modes.is_some_and(|m| m.has_halfop_or_higher());
    if !halfop_plus {
        let excepted = excepts
            .iter()
            .any(|e| extban::user_matches_mask(&e.mask, &ban_ctx));
        let muted = !excepted
            && bans
                .iter()
                .any(|b| extban::user_muted_by_mask(&b.mask, &ban_ctx));
        if muted {
            reject(ctx);
            return Ok(());
        }
    }

    let op_plus = member_modes.is_some_and(|m| m.has_op_or_higher());
    if !op_plus
        && bans
            .iter()
            .any(|b| extban::text_blocked_by_mask(&b.mask, &text))
    {
        reject(ctx);
        return Ok(());
    }

    let mut out = Message::with_prefix(
        user_arc.read().await.prefix(),
        cmd,
        vec![raw_target.to_string(), text.clone()],
    );
    out.set_tag(
        "time",
        Some(loom_proto::server_time(chrono::Utc::now())),
    );
    if let Some(account) = &snapshot.account {
        out.set_tag("account", Some(account.clone()));
    }
    let out = Arc::new(out);

    // Member set was snapshotted above; filter by status when requested.
    let mut remote_sids: Vec<String> = Vec::new();
    for (conn, modes) in recipients {
        if conn == ctx.conn() {
            continue;
        }
        if let Some(min) = min_status {
            if !holds_status(&modes, min) {
                continue;
            }
        }
        if let Some(target_user) = ctx.fabric.users.get(conn) {
            let server = target_user.read().await.server.clone();
            if server != ctx.fabric.server_info.sid {
                if !remote_sids.contains(&server) {
                    remote_sids.push(server);
                }
                continue;
            }
        }
        ctx.fabric.broker.send_to_connection(conn, &out);
    }

    // Remote members hear it via their servers.
    let uid = user_arc.read().await.uid.clone();
    for sid in remote_sids {
        ctx.fabric.broker.send_to_server(
            &sid,
            Arc::new(crate::links::protocol::user_message(
                &uid, cmd, raw_target, &text,
            )),
        );
    }

    if ctx
        .session
        .caps
        .contains(loom_proto::CapSet::ECHO_MESSAGE)
    {
        ctx.fabric.broker.send_to_connection(ctx.conn(), &out);
    }

    Ok(())
}

async fn deliver_to_user(
    ctx: &mut Context<'_>,
    target: &str,
    text: String,
    is_notice: bool,
) -> HandlerResult {
    let cmd = if is_notice { "NOTICE" } else { "PRIVMSG" };

    let Some((target_conn, target_arc)) = ctx.fabric.users.get_by_nick(target) else {
        if !is_notice {
            ctx.numeric(Numeric::ERR_NOSUCHNICK, [target, "No such nick/channel"]);
        }
        return Ok(());
    };

    let Some(user_arc) = ctx.user() else {
        return Ok(());
    };

    let (away, target_nick, target_server, target_uid) = {
        let target_user = target_arc.read().await;
        (
            target_user.away.clone(),
            target_user.nick.clone(),
            target_user.server.clone(),
            target_user.uid.clone(),
        )
    };

    if let Some(away_msg) = away {
        if !is_notice {
            ctx.numeric(Numeric::RPL_AWAY, [target_nick.as_str(), away_msg.as_str()]);
        }
    }

    let (prefix, account, uid) = {
        let user = user_arc.read().await;
        (user.prefix(), user.account.clone(), user.uid.clone())
    };

    let mut out = Message::with_prefix(prefix, cmd, vec![target_nick, text.clone()]);
    out.set_tag(
        "time",
        Some(loom_proto::server_time(chrono::Utc::now())),
    );
    if let Some(account) = account {
        out.set_tag("account", Some(account));
    }
    let out = Arc::new(out);

    if target_server == ctx.fabric.server_info.sid {
        ctx.fabric.broker.send_to_connection(target_conn, &out);
    } else {
        ctx.fabric.broker.send_to_server(
            &target_server,
            Arc::new(crate::links::protocol::user_message(
                &uid,
                cmd,
                &target_uid,
                &text,
            )),
        );
    }

    if ctx
        .session
        .caps
        .contains(loom_proto::CapSet::ECHO_MESSAGE)
    {
        ctx.fabric.broker.send_to_connection(ctx.conn(), &out);
    }

    Ok(())
}
