//! AWAY, SETNAME, USERHOST, ISON.

use std::sync::Arc;

use async_trait::async_trait;
use loom_proto::{CapSet, Message, Numeric};

use super::{Context, Handler, HandlerResult, HandlerSpec};
use crate::links::protocol;
use crate::state::uid::ConnectionId;

/// Fan a capability-gated change notification out to common-channel
/// members holding `cap`, each at most once.
async fn notify_common_channels(
    ctx: &Context<'_>,
    channels: &[String],
    cap: CapSet,
    msg: &Arc<Message>,
) {
    let mut seen: Vec<ConnectionId> = Vec::new();
    for name in channels {
        let Some(chan_arc) = ctx.fabric.channels.get(name) else {
            continue;
        };
        let members: Vec<ConnectionId> = {
            let chan = chan_arc.read().await;
            chan.members.keys().copied().collect()
        };
        for conn in members {
            if conn == ctx.conn() || seen.contains(&conn) {
                continue;
            }
            seen.push(conn);
            let has_cap = match ctx.fabric.users.get(conn) {
                Some(user) => user.read().await.caps.contains(cap),
                None => false,
            };
            if has_cap {
                ctx.fabric.broker.send_to_connection(conn, msg);
            }
        }
    }
}

pub struct AwayHandler;

#[async_trait]
impl Handler for AwayHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "AWAY",
            min_params: 0,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let Some(user_arc) = ctx.user() else {
            return Ok(());
        };

        let reason = msg.param(0).filter(|r| !r.is_empty()).map(str::to_owned);
        let going_away = reason.is_some();

        let (prefix, uid, channels) = {
            let mut user = user_arc.write().await;
            user.away = reason.clone();
            (
                user.prefix(),
                user.uid.clone(),
                user.channels.keys().cloned().collect::<Vec<_>>(),
            )
        };

        if going_away {
            ctx.numeric(
                Numeric::RPL_NOWAWAY,
                ["You have been marked as being away"],
            );
        } else {
            ctx.numeric(
                Numeric::RPL_UNAWAY,
                ["You are no longer marked as being away"],
            );
        }

        // away-notify for common-channel members.
        let params = match &reason {
            Some(r) => vec![r.clone()],
            None => Vec::new(),
        };
        let notify = Arc::new(Message::with_prefix(prefix, "AWAY", params));
        notify_common_channels(ctx, &channels, CapSet::AWAY_NOTIFY, &notify).await;

        ctx.fabric.broker.propagate(
            Arc::new(protocol::away_change(&uid, reason.as_deref())),
            None,
        );
        Ok(())
    }
}

pub struct SetnameHandler;

#[async_trait]
impl Handler for SetnameHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "SETNAME",
            min_params: 1,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let Some(user_arc) = ctx.user() else {
            return Ok(());
        };

        let realname: String = msg.params[0].chars().take(50).collect();
        let (prefix, channels) = {
            let mut user = user_arc.write().await;
            user.realname = realname.clone();
            (
                user.prefix(),
                user.channels.keys().cloned().collect::<Vec<_>>(),
            )
        };

        let notify = Arc::new(Message::with_prefix(
            prefix,
            "SETNAME",
            vec![realname],
        ));
        // The sender always sees the confirmation; capable members too.
        ctx.fabric.broker.send_to_connection(ctx.conn(), &notify);
        notify_common_channels(ctx, &channels, CapSet::SETNAME, &notify).await;
        Ok(())
    }
}

pub struct UserhostHandler;

#[async_trait]
impl Handler for UserhostHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "USERHOST",
            min_params: 1,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let mut replies = Vec::new();
        for nick in msg.params.iter().take(5) {
            let Some((_, user_arc)) = ctx.fabric.users.get_by_nick(nick) else {
                continue;
            };
            let user = user_arc.read().await;
            let oper_flag = if user.modes.oper { "*" } else { "" };
            let away_flag = if user.away.is_some() { "-" } else { "+" };
            replies.push(format!(
                "{}{}={}{}@{}",
                user.nick, oper_flag, away_flag, user.user, user.host
            ));
        }
        ctx.numeric(Numeric::RPL_USERHOST, [replies.join(" ")]);
        Ok(())
    }
}

pub struct IsonHandler;

#[async_trait]
impl Handler for IsonHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "ISON",
            min_params: 1,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let mut online = Vec::new();
        for nick in &msg.params {
            for single in nick.split_whitespace() {
                if let Some((_, user_arc)) = ctx.fabric.users.get_by_nick(single) {
                    online.push(user_arc.read().await.nick.clone());
                }
            }
        }
        ctx.numeric(Numeric::RPL_ISON, [online.join(" ")]);
        Ok(())
    }
}
