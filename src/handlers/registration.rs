//! Connection registration: NICK, USER, PASS, PING, PONG, QUIT, and the
//! transition into the registered state.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use loom_proto::{irc_to_lower, Message, NickExt, Numeric, Prefix};

use super::{Context, Handler, HandlerResult, HandlerSpec};
use crate::error::HandlerError;
use crate::links::protocol;
use crate::state::user::{User, UserModes};

/// Maximum username length; longer values are truncated.
const USERNAME_MAX_LEN: usize = 10;

/// Maximum realname length in code points; longer values are truncated.
const REALNAME_MAX_LEN: usize = 50;

pub struct NickHandler;

#[async_trait]
impl Handler for NickHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "NICK",
            min_params: 1,
            requires_registration: false,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let nick = msg.params[0].clone();

        if !nick.as_str().is_valid_nick() {
            ctx.numeric(
                Numeric::ERR_ERRONEUSNICKNAME,
                [nick.as_str(), "Erroneous nickname"],
            );
            return Ok(());
        }

        if !ctx.fabric.users.claim_nick(&nick, ctx.conn()) {
            ctx.numeric(
                Numeric::ERR_NICKNAMEINUSE,
                [nick.as_str(), "Nickname is already in use"],
            );
            return Ok(());
        }

        if !ctx.session.is_registered() {
            // Pre-registration: swap the claim silently, no broadcasts.
            if let Some(old) = ctx.session.nick.take() {
                if irc_to_lower(&old) != irc_to_lower(&nick) {
                    ctx.fabric.users.release_nick(&old, ctx.conn());
                }
            }
            ctx.session.nick = Some(nick);
            return complete_registration_if_ready(ctx).await;
        }

        let Some(user_arc) = ctx.user() else {
            return Ok(());
        };

        let (old_prefix, old_nick, uid, channels) = {
            let user = user_arc.read().await;
            (
                user.prefix(),
                user.nick.clone(),
                user.uid.clone(),
                user.channels.keys().cloned().collect::<Vec<_>>(),
            )
        };

        if old_nick == nick {
            return Ok(());
        }

        {
            let mut user = user_arc.write().await;
            user.nick = nick.clone();
        }
        if irc_to_lower(&old_nick) != irc_to_lower(&nick) {
            ctx.fabric.users.release_nick(&old_nick, ctx.conn());
        }
        ctx.fabric.users.assert_nick_index(ctx.conn(), &nick);
        ctx.session.nick = Some(nick.clone());

        // Channel member maps mirror the nickname.
        for channel_name in &channels {
            if let Some(chan) = ctx.fabric.channels.get(channel_name) {
                let mut chan = chan.write().await;
                if let Some(member) = chan.members.get_mut(&ctx.conn()) {
                    member.nick = nick.clone();
                }
            }
        }

        // One NICK to the user and each common-channel member.
        let change = Arc::new(Message::with_prefix(
            old_prefix,
            "NICK",
            vec![nick.clone()],
        ));
        ctx.fabric
            .broker
            .send_to_channels(channels.iter(), &change, Some(ctx.conn()))
            .await;
        ctx.fabric.broker.send_to_connection(ctx.conn(), &change);

        ctx.fabric
            .broker
            .propagate(Arc::new(protocol::nick_change(&uid, &nick)), None);

        Ok(())
    }
}

pub struct UserHandler;

#[async_trait]
impl Handler for UserHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "USER",
            min_params: 4,
            requires_registration: false,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        if ctx.session.is_registered() {
            ctx.numeric(
                Numeric::ERR_ALREADYREGISTERED,
                ["You may not reregister"],
            );
            return Ok(());
        }

        let username: String = msg.params[0]
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
            .take(USERNAME_MAX_LEN)
            .collect();
        let realname: String = msg.params[3].chars().take(REALNAME_MAX_LEN).collect();

        ctx.session.username = Some(if username.is_empty() {
            "user".to_string()
        } else {
            username
        });
        ctx.session.realname = Some(realname);

        complete_registration_if_ready(ctx).await
    }
}

pub struct PassHandler;

#[async_trait]
impl Handler for PassHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "PASS",
            min_params: 1,
            requires_registration: false,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        if ctx.session.is_registered() {
            ctx.numeric(
                Numeric::ERR_ALREADYREGISTERED,
                ["You may not reregister"],
            );
            return Ok(());
        }
        ctx.session.password = Some(msg.params[0].clone());
        Ok(())
    }
}

pub struct PingHandler;

#[async_trait]
impl Handler for PingHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "PING",
            min_params: 1,
            requires_registration: false,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let token = msg.params[0].clone();
        ctx.send(Message::with_prefix(
            ctx.fabric.server_prefix(),
            "PONG",
            vec![ctx.fabric.server_info.name.clone(), token],
        ));
        Ok(())
    }
}

pub struct PongHandler;

#[async_trait]
impl Handler for PongHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "PONG",
            min_params: 0,
            requires_registration: false,
        }
    }

    async fn handle(&self, _ctx: &mut Context<'_>, _msg: &Message) -> HandlerResult {
        // Liveness bookkeeping happens in the connection loop.
        Ok(())
    }
}

pub struct QuitHandler;

#[async_trait]
impl Handler for QuitHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "QUIT",
            min_params: 0,
            requires_registration: false,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let reason = msg
            .param(0)
            .map(|r| format!("Quit: {r}"))
            .unwrap_or_else(|| "Client Quit".to_string());
        ctx.fabric
            .disconnect_user(ctx.conn(), &reason, true)
            .await;
        Err(HandlerError::Quit)
    }
}

/// Finish registration when NICK and USER have both arrived and neither CAP
/// negotiation nor SASL suspends it: create the user record, enforce server
/// bans, emit the welcome burst, and introduce the user to the network.
pub async fn complete_registration_if_ready(ctx: &mut Context<'_>) -> HandlerResult {
    if !ctx.session.can_register() {
        return Ok(());
    }

    let nick = ctx.session.nick.clone().expect("checked by can_register");
    let username = ctx.session.username.clone().expect("checked by can_register");
    let realname = ctx.session.realname.clone().unwrap_or_default();

    // K/G-line enforcement happens at the door, before any burst.
    if let Some(ban) =
        ctx.fabric
            .server_bans
            .lookup_matching(ctx.session.ip, &ctx.session.host, &username)
    {
        return Err(HandlerError::Close(format!(
            "You are banned ({}: {})",
            ban.kind.as_str(),
            ban.reason
        )));
    }

    // A require-auth DNSBL verdict admits the connection but insists on a
    // SASL identity.
    if ctx.session.dnsbl_require_auth && ctx.session.account.is_none() {
        return Err(HandlerError::Close(
            "Your address is listed; authenticate via SASL to connect".to_string(),
        ));
    }

    let now = chrono::Utc::now().timestamp();
    let account = ctx.session.account.clone();
    let user = User {
        conn_id: ctx.conn(),
        uid: ctx.fabric.uid_gen.next_uid(),
        nick: nick.clone(),
        user: username,
        realname,
        ip: ctx.session.ip,
        host: ctx.session.host.clone(),
        server: ctx.fabric.server_info.sid.clone(),
        account: account.clone(),
        away: None,
        certfp: ctx.session.certfp.clone(),
        caps: ctx.session.caps,
        modes: UserModes {
            registered: account.is_some(),
            secure: ctx.session.secure,
            ..Default::default()
        },
        channels: HashMap::new(),
        connected_at: now,
        last_activity: now,
    };
    let uid = user.uid.clone();

    ctx.fabric.users.insert(user);
    ctx.fabric.users.assert_nick_index(ctx.conn(), &nick);
    ctx.fabric.broker.update_caps(ctx.conn(), ctx.session.caps);
    ctx.fabric.broker.mark_registered(ctx.conn());
    ctx.fabric.stats.user_registered();
    ctx.session.phase = crate::state::session::SessionPhase::Registered;

    super::welcome::send_welcome_burst(ctx).await;

    // Introduce the new user to the network.
    if let Some(user_arc) = ctx.user() {
        let user = user_arc.read().await;
        ctx.fabric
            .broker
            .propagate(Arc::new(protocol::uid_introduction(&user)), None);
    }

    tracing::info!(
        conn = %ctx.conn(),
        nick = %nick,
        uid = %uid,
        "client registered"
    );
    Ok(())
}

/// `:server NOTICE <nick> :<text>` convenience.
pub fn server_notice(ctx: &Context<'_>, text: &str) {
    let msg = Message::with_prefix(
        Prefix::ServerName(ctx.fabric.server_info.name.clone()),
        "NOTICE",
        vec![ctx.session.display_nick().to_string(), text.to_string()],
    );
    ctx.send(msg);
}
