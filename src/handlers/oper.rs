//! Operator commands: OPER, KILL, WALLOPS, CHGHOST.

use std::sync::Arc;

use async_trait::async_trait;
use loom_proto::{matches_hostmask, CapSet, Message, Numeric};

use super::{Context, Handler, HandlerResult, HandlerSpec};
use crate::links::protocol;
use crate::security::password;
use crate::state::uid::ConnectionId;

/// Extra penalty credit charged for a failed OPER attempt.
const FAILED_OPER_PENALTY_MS: u64 = 4000;

/// Whether this session's user holds +o.
async fn is_oper(ctx: &Context<'_>) -> bool {
    match ctx.user() {
        Some(user) => user.read().await.modes.oper,
        None => false,
    }
}

pub struct OperHandler;

#[async_trait]
impl Handler for OperHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "OPER",
            min_params: 2,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let name = msg.params[0].clone();
        let pass = msg.params[1].clone();

        let Some(user_arc) = ctx.user() else {
            return Ok(());
        };

        let block = ctx.fabric.collaborators.operators.get(&name);
        let (nick, user, host) = {
            let user = user_arc.read().await;
            (user.nick.clone(), user.user.clone(), user.host.clone())
        };

        let hostmask_ok = block.as_ref().is_some_and(|b| {
            b.hostmasks.is_empty()
                || b.hostmasks
                    .iter()
                    .any(|mask| matches_hostmask(mask, &nick, &user, &host))
        });

        // Verify the password even when the block lookup failed, so timing
        // does not reveal which part was wrong.
        let hash = block
            .as_ref()
            .map(|b| b.hashed_pass.clone())
            .unwrap_or_else(|| {
                "$argon2id$v=19$m=65536,t=3,p=4$AAAAAAAAAAAAAAAAAAAAAA$\
                 AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA"
                    .to_string()
            });
        let pass_ok = password::verify_password(pass, hash).await.unwrap_or(false);

        if !hostmask_ok || !pass_ok {
            ctx.session.pending_penalty_ms += FAILED_OPER_PENALTY_MS;
            tracing::warn!(conn = %ctx.conn(), name = %name, "failed OPER attempt");
            ctx.numeric(Numeric::ERR_PASSWDMISMATCH, ["Password incorrect"]);
            return Ok(());
        }

        {
            let mut user = user_arc.write().await;
            if user.modes.oper {
                // Already an operator: +o is idempotent, no re-broadcast.
                ctx.numeric(Numeric::RPL_YOUREOPER, ["You are now an IRC operator"]);
                return Ok(());
            }
            user.modes.oper = true;
        }
        ctx.fabric
            .stats
            .operators
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        ctx.numeric(Numeric::RPL_YOUREOPER, ["You are now an IRC operator"]);

        let (prefix, uid) = {
            let user = user_arc.read().await;
            (user.prefix(), user.uid.clone())
        };
        ctx.send(Message::with_prefix(
            prefix,
            "MODE",
            vec![nick, "+o".to_string()],
        ));
        ctx.fabric
            .broker
            .propagate(Arc::new(protocol::user_mode(&uid, "+o")), None);

        tracing::info!(conn = %ctx.conn(), oper = %name, "operator authenticated");
        Ok(())
    }
}

pub struct KillHandler;

#[async_trait]
impl Handler for KillHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "KILL",
            min_params: 2,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        if !is_oper(ctx).await {
            ctx.numeric(
                Numeric::ERR_NOPRIVILEGES,
                ["Permission Denied- You're not an IRC operator"],
            );
            return Ok(());
        }

        let target_nick = msg.params[0].clone();
        let reason = msg.params[1].clone();

        let Some((target_conn, target_arc)) = ctx.fabric.users.get_by_nick(&target_nick) else {
            ctx.numeric(
                Numeric::ERR_NOSUCHNICK,
                [target_nick.as_str(), "No such nick/channel"],
            );
            return Ok(());
        };

        let killer = ctx.session.display_nick().to_string();
        let (target_server, target_uid) = {
            let target = target_arc.read().await;
            (target.server.clone(), target.uid.clone())
        };
        let full_reason = format!("Killed ({killer} ({reason}))");

        if target_server == ctx.fabric.server_info.sid {
            // Tell the victim, then run the canonical disconnect.
            let notice = Arc::new(Message::with_prefix(
                ctx.fabric.server_prefix(),
                "KILL",
                vec![target_nick.clone(), full_reason.clone()],
            ));
            ctx.fabric.broker.send_to_connection(target_conn, &notice);
            ctx.fabric
                .disconnect_user(target_conn, &full_reason, true)
                .await;
        } else {
            // Remote target: route the KILL; the owning server cleans up
            // and floods the QUIT back.
            let uid = match ctx.user() {
                Some(user) => user.read().await.uid.clone(),
                None => return Ok(()),
            };
            ctx.fabric.broker.send_to_server(
                &target_server,
                Arc::new(protocol::kill(&uid, &target_uid, &full_reason)),
            );
            // Drop our copy of the remote user immediately.
            ctx.fabric
                .disconnect_user(target_conn, &full_reason, false)
                .await;
        }

        tracing::info!(killer = %killer, target = %target_nick, "KILL executed");
        Ok(())
    }
}

pub struct WallopsHandler;

#[async_trait]
impl Handler for WallopsHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "WALLOPS",
            min_params: 1,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        if !is_oper(ctx).await {
            ctx.numeric(
                Numeric::ERR_NOPRIVILEGES,
                ["Permission Denied- You're not an IRC operator"],
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

        let out = Arc::new(Message::with_prefix(
            prefix,
            "WALLOPS",
            vec![msg.params[0].clone()],
        ));
        ctx.fabric.broker.send_to_operators(&out, true).await;
        ctx.fabric.broker.propagate(
            Arc::new(protocol::wallops(&uid, &msg.params[0])),
            None,
        );
        Ok(())
    }
}

pub struct ChghostHandler;

#[async_trait]
impl Handler for ChghostHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "CHGHOST",
            min_params: 2,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        if !is_oper(ctx).await {
            ctx.numeric(
                Numeric::ERR_NOPRIVILEGES,
                ["Permission Denied- You're not an IRC operator"],
            );
            return Ok(());
        }

        let target_nick = msg.params[0].clone();
        let new_host = msg.params[1].clone();

        let Some((target_conn, target_arc)) = ctx.fabric.users.get_by_nick(&target_nick) else {
            ctx.numeric(
                Numeric::ERR_NOSUCHNICK,
                [target_nick.as_str(), "No such nick/channel"],
            );
            return Ok(());
        };

        let (old_prefix, username, channels) = {
            let mut target = target_arc.write().await;
            let old_prefix = target.prefix();
            target.host = new_host.clone();
            (
                old_prefix,
                target.user.clone(),
                target.channels.keys().cloned().collect::<Vec<_>>(),
            )
        };

        // chghost-capable common-channel members see the change; the
        // target always does.
        let notify = Arc::new(Message::with_prefix(
            old_prefix,
            "CHGHOST",
            vec![username, new_host],
        ));
        ctx.fabric.broker.send_to_connection(target_conn, &notify);

        let mut seen: Vec<ConnectionId> = vec![target_conn];
        for name in &channels {
            let Some(chan_arc) = ctx.fabric.channels.get(name) else {
                continue;
            };
            let members: Vec<ConnectionId> = {
                let chan = chan_arc.read().await;
                chan.members.keys().copied().collect()
            };
            for conn in members {
                if seen.contains(&conn) {
                    continue;
                }
                seen.push(conn);
                let has_cap = match ctx.fabric.users.get(conn) {
                    Some(user) => user.read().await.caps.contains(CapSet::CHGHOST),
                    None => false,
                };
                if has_cap {
                    ctx.fabric.broker.send_to_connection(conn, &notify);
                }
            }
        }
        Ok(())
    }
}
