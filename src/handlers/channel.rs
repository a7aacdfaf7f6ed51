//! Channel membership and metadata: JOIN, PART, TOPIC, NAMES, LIST,
//! INVITE, KICK.

use std::sync::Arc;

use async_trait::async_trait;
use loom_proto::{isupport, ChannelExt, CapSet, Message, Numeric, Prefix};

use super::{BanSnapshot, Context, Handler, HandlerResult, HandlerSpec};
use crate::links::protocol;
use crate::security::extban;
use crate::state::channel::{Channel, ChannelModes, Member, MemberModes};
use crate::state::uid::ConnectionId;

/// Caps of another local connection, for fanout variants.
async fn caps_of(ctx: &Context<'_>, conn: ConnectionId) -> CapSet {
    match ctx.fabric.users.get(conn) {
        Some(user) => user.read().await.caps,
        None => CapSet::default(),
    }
}

/// Send the RPL_NAMREPLY / RPL_ENDOFNAMES block for one channel.
pub async fn send_names(ctx: &Context<'_>, chan_arc: &Arc<tokio::sync::RwLock<Channel>>) {
    let (name, symbol, entries) = {
        let chan = chan_arc.read().await;
        let symbol = if chan.modes.contains(ChannelModes::SECRET) {
            "@"
        } else {
            "="
        };
        let entries: Vec<(ConnectionId, String, MemberModes)> = chan
            .members
            .iter()
            .map(|(conn, m)| (*conn, m.nick.clone(), m.modes))
            .collect();
        (chan.name.clone(), symbol, entries)
    };

    let caps = ctx.session.caps;
    let mut names = Vec::with_capacity(entries.len());
    for (conn, nick, modes) in entries {
        let prefix = if caps.contains(CapSet::MULTI_PREFIX) {
            modes.all_prefix_chars()
        } else {
            modes.prefix_char().map(String::from).unwrap_or_default()
        };
        let shown = if caps.contains(CapSet::USERHOST_IN_NAMES) {
            match ctx.fabric.users.get(conn) {
                Some(user) => {
                    let user = user.read().await;
                    format!("{prefix}{}", user.hostmask())
                }
                None => format!("{prefix}{nick}"),
            }
        } else {
            format!("{prefix}{nick}")
        };
        names.push(shown);
    }

    // Classic 512-byte discipline: chunk the name list.
    for chunk in names.chunks(12) {
        ctx.numeric(
            Numeric::RPL_NAMREPLY,
            [symbol.to_string(), name.clone(), chunk.join(" ")],
        );
    }
    ctx.numeric(
        Numeric::RPL_ENDOFNAMES,
        [name, "End of /NAMES list".to_string()],
    );
}

/// Send RPL_TOPIC/RPL_TOPICWHOTIME or RPL_NOTOPIC for one channel.
async fn send_topic(ctx: &Context<'_>, chan_arc: &Arc<tokio::sync::RwLock<Channel>>) {
    let (name, topic) = {
        let chan = chan_arc.read().await;
        (chan.name.clone(), chan.topic.clone())
    };
    match topic {
        Some(topic) => {
            ctx.numeric(Numeric::RPL_TOPIC, [name.clone(), topic.text]);
            ctx.numeric(
                Numeric::RPL_TOPICWHOTIME,
                [name, topic.set_by, topic.set_at.to_string()],
            );
        }
        None => {
            ctx.numeric(Numeric::RPL_NOTOPIC, [name, "No topic is set".to_string()]);
        }
    }
}

pub struct JoinHandler;

#[async_trait]
impl Handler for JoinHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "JOIN",
            min_params: 1,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let keys: Vec<&str> = msg.param(1).map(|k| k.split(',').collect()).unwrap_or_default();

        for (i, name) in msg.params[0].split(',').enumerate() {
            let key = keys.get(i).copied().filter(|k| !k.is_empty());
            join_one(ctx, name, key).await?;
        }
        Ok(())
    }
}

async fn join_one(ctx: &mut Context<'_>, name: &str, key: Option<&str>) -> HandlerResult {
    if !name.is_valid_channel_name() {
        ctx.numeric(Numeric::ERR_BADCHANMASK, [name, "Bad Channel Mask"]);
        return Ok(());
    }

    let Some(user_arc) = ctx.user() else {
        return Ok(());
    };

    let (channel_count, already_member) = {
        let user = user_arc.read().await;
        (
            user.channels.len(),
            user.channels.contains_key(&loom_proto::irc_to_lower(name)),
        )
    };
    if already_member {
        // Idempotent: no error, no duplicate membership.
        return Ok(());
    }
    if channel_count >= ctx.fabric.config.limits.max_channels_per_user.min(isupport::MAX_CHANNELS)
    {
        ctx.numeric(
            Numeric::ERR_TOOMANYCHANNELS,
            [name, "You have joined too many channels"],
        );
        return Ok(());
    }

    let now = chrono::Utc::now().timestamp();
    let (chan_arc, created) = ctx.fabric.channels.get_or_create(name, now);

    let snapshot = BanSnapshot::of(&user_arc).await;
    let ban_ctx = snapshot.context();

    if !created {
        // Enforcement order: +i, +b/+e, +k, +l.
        let chan = chan_arc.read().await;

        if chan.modes.contains(ChannelModes::INVITE_ONLY) {
            let invited = chan.invited.contains(&ctx.conn())
                || chan
                    .invex
                    .iter()
                    .any(|e| extban::user_matches_mask(&e.mask, &ban_ctx))
                || snapshot.is_oper;
            if !invited {
                drop(chan);
                ctx.numeric(
                    Numeric::ERR_INVITEONLYCHAN,
                    [name, "Cannot join channel (+i)"],
                );
                ctx.fabric.channels.remove_if_dead(name).await;
                return Ok(());
            }
        }

        let excepted = chan
            .excepts
            .iter()
            .any(|e| extban::user_matches_mask(&e.mask, &ban_ctx));
        if !excepted
            && chan
                .bans
                .iter()
                .any(|b| extban::user_matches_mask(&b.mask, &ban_ctx))
        {
            drop(chan);
            ctx.numeric(
                Numeric::ERR_BANNEDFROMCHAN,
                [name, "Cannot join channel (+b)"],
            );
            ctx.fabric.channels.remove_if_dead(name).await;
            return Ok(());
        }

        if let Some(required) = &chan.key {
            if key != Some(required.as_str()) {
                drop(chan);
                ctx.numeric(
                    Numeric::ERR_BADCHANNELKEY,
                    [name, "Cannot join channel (+k)"],
                );
                ctx.fabric.channels.remove_if_dead(name).await;
                return Ok(());
            }
        }

        if let Some(limit) = chan.limit {
            if chan.members.len() >= limit as usize {
                drop(chan);
                ctx.numeric(
                    Numeric::ERR_CHANNELISFULL,
                    [name, "Cannot join channel (+l)"],
                );
                ctx.fabric.channels.remove_if_dead(name).await;
                return Ok(());
            }
        }
    }

    // Insert the membership edge on both sides.
    let modes = MemberModes {
        op: created,
        ..Default::default()
    };
    let (nick, uid, folded, canonical_name) = {
        let mut chan = chan_arc.write().await;
        chan.invited.remove(&ctx.conn());
        let mut user = user_arc.write().await;
        chan.members.insert(
            ctx.conn(),
            Member {
                nick: user.nick.clone(),
                joined_at: now,
                modes,
            },
        );
        let folded = loom_proto::irc_to_lower(&chan.name);
        user.channels.insert(folded.clone(), modes);
        (user.nick.clone(), user.uid.clone(), folded, chan.name.clone())
    };

    // JOIN fanout: extended-join recipients get account and realname.
    let prefix = Prefix::new(nick, snapshot.user.clone(), snapshot.host.clone());
    let plain = Arc::new(Message::with_prefix(
        prefix.clone(),
        "JOIN",
        vec![canonical_name.clone()],
    ));
    let extended = Arc::new(Message::with_prefix(
        prefix,
        "JOIN",
        vec![
            canonical_name.clone(),
            snapshot.account.clone().unwrap_or_else(|| "*".to_string()),
            snapshot.realname.clone(),
        ],
    ));

    let members: Vec<ConnectionId> = {
        let chan = chan_arc.read().await;
        chan.members.keys().copied().collect()
    };
    for conn in members {
        let variant = if caps_of(ctx, conn).await.contains(CapSet::EXTENDED_JOIN) {
            &extended
        } else {
            &plain
        };
        ctx.fabric.broker.send_to_connection(conn, variant);
    }

    if !created {
        send_topic(ctx, &chan_arc).await;
    }
    send_names(ctx, &chan_arc).await;

    if protocol::crosses_links(&canonical_name) {
        ctx.fabric
            .broker
            .propagate(Arc::new(protocol::user_join(&uid, now, &folded)), None);
    }

    if created {
        tracing::debug!(channel = %canonical_name, "channel created");
    }
    Ok(())
}

pub struct PartHandler;

#[async_trait]
impl Handler for PartHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "PART",
            min_params: 1,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let reason = msg.param(1).unwrap_or_default().to_string();
        for name in msg.params[0].split(',') {
            part_one(ctx, name, &reason).await?;
        }
        Ok(())
    }
}

async fn part_one(ctx: &mut Context<'_>, name: &str, reason: &str) -> HandlerResult {
    let Some(chan_arc) = ctx.fabric.channels.get(name) else {
        ctx.numeric(Numeric::ERR_NOSUCHCHANNEL, [name, "No such channel"]);
        return Ok(());
    };

    let Some(user_arc) = ctx.user() else {
        return Ok(());
    };

    let is_member = chan_arc.read().await.members.contains_key(&ctx.conn());
    if !is_member {
        ctx.numeric(
            Numeric::ERR_NOTONCHANNEL,
            [name, "You're not on that channel"],
        );
        return Ok(());
    }

    let (prefix, uid) = {
        let user = user_arc.read().await;
        (user.prefix(), user.uid.clone())
    };
    let canonical_name = chan_arc.read().await.name.clone();

    let mut params = vec![canonical_name.clone()];
    if !reason.is_empty() {
        params.push(reason.to_string());
    }
    let part = Arc::new(Message::with_prefix(prefix, "PART", params));

    // Everyone, including the parting user, sees the PART before the edge
    // is removed.
    ctx.fabric
        .broker
        .send_to_channel(&canonical_name, &part, None)
        .await;

    {
        let mut chan = chan_arc.write().await;
        chan.members.remove(&ctx.conn());
    }
    {
        let mut user = user_arc.write().await;
        user.channels.remove(&loom_proto::irc_to_lower(&canonical_name));
    }
    ctx.fabric.channels.remove_if_dead(&canonical_name).await;

    if protocol::crosses_links(&canonical_name) {
        ctx.fabric.broker.propagate(
            Arc::new(protocol::user_part(&uid, &canonical_name, reason)),
            None,
        );
    }
    Ok(())
}

pub struct TopicHandler;

#[async_trait]
impl Handler for TopicHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "TOPIC",
            min_params: 1,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let name = msg.params[0].clone();
        let Some(chan_arc) = ctx.fabric.channels.get(&name) else {
            ctx.numeric(Numeric::ERR_NOSUCHCHANNEL, [name.as_str(), "No such channel"]);
            return Ok(());
        };

        let Some(new_topic) = msg.param(1) else {
            send_topic(ctx, &chan_arc).await;
            return Ok(());
        };

        let Some(user_arc) = ctx.user() else {
            return Ok(());
        };

        let (member_modes, protected, canonical_name) = {
            let chan = chan_arc.read().await;
            (
                chan.members.get(&ctx.conn()).map(|m| m.modes),
                chan.modes.contains(ChannelModes::TOPIC_PROTECTED),
                chan.name.clone(),
            )
        };

        let Some(member_modes) = member_modes else {
            ctx.numeric(
                Numeric::ERR_NOTONCHANNEL,
                [name.as_str(), "You're not on that channel"],
            );
            return Ok(());
        };
        if protected && !member_modes.has_op_or_higher() {
            ctx.numeric(
                Numeric::ERR_CHANOPRIVSNEEDED,
                [name.as_str(), "You're not channel operator"],
            );
            return Ok(());
        }

        let text: String = new_topic.chars().take(isupport::TOPIC_MAX_LEN).collect();
        let (prefix, hostmask, uid) = {
            let user = user_arc.read().await;
            (user.prefix(), user.hostmask(), user.uid.clone())
        };

        {
            let mut chan = chan_arc.write().await;
            chan.topic = if text.is_empty() {
                None
            } else {
                Some(crate::state::channel::Topic {
                    text: text.clone(),
                    set_by: hostmask,
                    set_at: chrono::Utc::now().timestamp(),
                })
            };
        }

        let topic_msg = Arc::new(Message::with_prefix(
            prefix,
            "TOPIC",
            vec![canonical_name.clone(), text.clone()],
        ));
        ctx.fabric
            .broker
            .send_to_channel(&canonical_name, &topic_msg, None)
            .await;

        if protocol::crosses_links(&canonical_name) {
            ctx.fabric.broker.propagate(
                Arc::new(protocol::topic_change(&uid, &canonical_name, &text)),
                None,
            );
        }
        Ok(())
    }
}

pub struct NamesHandler;

#[async_trait]
impl Handler for NamesHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "NAMES",
            min_params: 0,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let Some(targets) = msg.param(0) else {
            ctx.numeric(Numeric::RPL_ENDOFNAMES, ["*", "End of /NAMES list"]);
            return Ok(());
        };

        let targets: Vec<String> = targets.split(',').map(str::to_owned).collect();
        for name in &targets {
            match ctx.fabric.channels.get(name) {
                Some(chan_arc) => {
                    let visible = {
                        let chan = chan_arc.read().await;
                        !chan.modes.contains(ChannelModes::SECRET)
                            || chan.members.contains_key(&ctx.conn())
                    };
                    if visible {
                        send_names(ctx, &chan_arc).await;
                    } else {
                        ctx.numeric(Numeric::RPL_ENDOFNAMES, [name.as_str(), "End of /NAMES list"]);
                    }
                }
                None => {
                    ctx.numeric(Numeric::RPL_ENDOFNAMES, [name.as_str(), "End of /NAMES list"]);
                }
            }
        }
        Ok(())
    }
}

pub struct ListHandler;

#[async_trait]
impl Handler for ListHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "LIST",
            min_params: 0,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let mask = msg.param(0).map(str::to_owned);

        ctx.numeric(Numeric::RPL_LISTSTART, ["Channel", "Users  Name"]);
        for chan_arc in ctx.fabric.channels.snapshot() {
            let (name, members, topic, hidden) = {
                let chan = chan_arc.read().await;
                (
                    chan.name.clone(),
                    chan.members.len(),
                    chan.topic.as_ref().map(|t| t.text.clone()).unwrap_or_default(),
                    (chan.modes.contains(ChannelModes::SECRET)
                        || chan.modes.contains(ChannelModes::PRIVATE))
                        && !chan.members.contains_key(&ctx.conn()),
                )
            };
            if hidden {
                continue;
            }
            if let Some(mask) = &mask {
                if !loom_proto::wildcard_match(mask, &name) {
                    continue;
                }
            }
            ctx.numeric(
                Numeric::RPL_LIST,
                [name, members.to_string(), topic],
            );
        }
        ctx.numeric(Numeric::RPL_LISTEND, ["End of /LIST"]);
        Ok(())
    }
}

pub struct InviteHandler;

#[async_trait]
impl Handler for InviteHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "INVITE",
            min_params: 2,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let target_nick = msg.params[0].clone();
        let chan_name = msg.params[1].clone();

        let Some(chan_arc) = ctx.fabric.channels.get(&chan_name) else {
            ctx.numeric(
                Numeric::ERR_NOSUCHCHANNEL,
                [chan_name.as_str(), "No such channel"],
            );
            return Ok(());
        };

        let Some((target_conn, target_arc)) = ctx.fabric.users.get_by_nick(&target_nick) else {
            ctx.numeric(
                Numeric::ERR_NOSUCHNICK,
                [target_nick.as_str(), "No such nick/channel"],
            );
            return Ok(());
        };

        let (inviter_modes, target_is_member, canonical_name) = {
            let chan = chan_arc.read().await;
            (
                chan.members.get(&ctx.conn()).map(|m| m.modes),
                chan.members.contains_key(&target_conn),
                chan.name.clone(),
            )
        };

        let Some(inviter_modes) = inviter_modes else {
            ctx.numeric(
                Numeric::ERR_NOTONCHANNEL,
                [chan_name.as_str(), "You're not on that channel"],
            );
            return Ok(());
        };
        if !inviter_modes.has_op_or_higher() {
            ctx.numeric(
                Numeric::ERR_CHANOPRIVSNEEDED,
                [chan_name.as_str(), "You're not channel operator"],
            );
            return Ok(());
        }
        if target_is_member {
            let target_nick = target_arc.read().await.nick.clone();
            ctx.numeric(
                Numeric::ERR_USERONCHANNEL,
                [
                    target_nick.as_str(),
                    canonical_name.as_str(),
                    "is already on channel",
                ],
            );
            return Ok(());
        }

        chan_arc.write().await.invited.insert(target_conn);

        let canonical_target = target_arc.read().await.nick.clone();
        ctx.numeric(
            Numeric::RPL_INVITING,
            [canonical_target.clone(), canonical_name.clone()],
        );

        let Some(user_arc) = ctx.user() else {
            return Ok(());
        };
        let prefix = user_arc.read().await.prefix();
        let invite = Arc::new(Message::with_prefix(
            prefix,
            "INVITE",
            vec![canonical_target, canonical_name.clone()],
        ));
        ctx.fabric.broker.send_to_connection(target_conn, &invite);

        // invite-notify: ops on the channel that negotiated the capability
        // hear about the invitation.
        let op_members: Vec<ConnectionId> = {
            let chan = chan_arc.read().await;
            chan.members
                .iter()
                .filter(|(conn, m)| **conn != ctx.conn() && m.modes.has_op_or_higher())
                .map(|(conn, _)| *conn)
                .collect()
        };
        for conn in op_members {
            if caps_of(ctx, conn).await.contains(CapSet::INVITE_NOTIFY) {
                ctx.fabric.broker.send_to_connection(conn, &invite);
            }
        }
        Ok(())
    }
}

pub struct KickHandler;

#[async_trait]
impl Handler for KickHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "KICK",
            min_params: 2,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let chan_name = msg.params[0].clone();
        let target_nick = msg.params[1].clone();
        let reason = msg
            .param(2)
            .map(str::to_owned)
            .unwrap_or_else(|| ctx.session.display_nick().to_string());

        let Some(chan_arc) = ctx.fabric.channels.get(&chan_name) else {
            ctx.numeric(
                Numeric::ERR_NOSUCHCHANNEL,
                [chan_name.as_str(), "No such channel"],
            );
            return Ok(());
        };

        let Some((target_conn, _)) = ctx.fabric.users.get_by_nick(&target_nick) else {
            ctx.numeric(
                Numeric::ERR_NOSUCHNICK,
                [target_nick.as_str(), "No such nick/channel"],
            );
            return Ok(());
        };

        let (kicker_modes, target_modes, target_member_nick, canonical_name) = {
            let chan = chan_arc.read().await;
            (
                chan.members.get(&ctx.conn()).map(|m| m.modes),
                chan.members.get(&target_conn).map(|m| m.modes),
                chan.members.get(&target_conn).map(|m| m.nick.clone()),
                chan.name.clone(),
            )
        };

        let Some(kicker_modes) = kicker_modes else {
            ctx.numeric(
                Numeric::ERR_NOTONCHANNEL,
                [chan_name.as_str(), "You're not on that channel"],
            );
            return Ok(());
        };
        let Some(target_modes) = target_modes else {
            ctx.numeric(
                Numeric::ERR_USERNOTINCHANNEL,
                [
                    target_nick.as_str(),
                    chan_name.as_str(),
                    "They aren't on that channel",
                ],
            );
            return Ok(());
        };

        // Op may kick anyone; halfop only targets below op.
        let allowed = kicker_modes.has_op_or_higher()
            || (kicker_modes.halfop && !target_modes.has_op_or_higher());
        if !allowed {
            ctx.numeric(
                Numeric::ERR_CHANOPRIVSNEEDED,
                [chan_name.as_str(), "You're not channel operator"],
            );
            return Ok(());
        }

        let Some(user_arc) = ctx.user() else {
            return Ok(());
        };
        let (prefix, uid) = {
            let user = user_arc.read().await;
            (user.prefix(), user.uid.clone())
        };

        let kick = Arc::new(Message::with_prefix(
            prefix,
            "KICK",
            vec![
                canonical_name.clone(),
                target_member_nick.unwrap_or(target_nick.clone()),
                reason.clone(),
            ],
        ));
        ctx.fabric
            .broker
            .send_to_channel(&canonical_name, &kick, None)
            .await;

        {
            let mut chan = chan_arc.write().await;
            chan.members.remove(&target_conn);
        }
        if let Some(target_arc) = ctx.fabric.users.get(target_conn) {
            let mut target = target_arc.write().await;
            target
                .channels
                .remove(&loom_proto::irc_to_lower(&canonical_name));
        }
        ctx.fabric.channels.remove_if_dead(&canonical_name).await;

        if protocol::crosses_links(&canonical_name) {
            ctx.fabric.broker.propagate(
                Arc::new(protocol::kick(&uid, &canonical_name, &target_nick, &reason)),
                None,
            );
        }
        Ok(())
    }
}
