//! CAP command: IRCv3 capability negotiation.
//!
//! `CAP LS 302` during the handshake suspends the welcome burst until
//! `CAP END`. `CAP REQ` is atomic: one unknown or unavailable token NAKs
//! the entire request and changes nothing.

use async_trait::async_trait;
use loom_proto::caps::ls_tokens;
use loom_proto::sasl::Mechanism;
use loom_proto::{CapSet, Message, Prefix};
use tracing::debug;

use super::{complete_registration_if_ready, Context, Handler, HandlerResult, HandlerSpec};
use crate::state::session::SessionPhase;

pub struct CapHandler;

fn cap_reply(ctx: &Context<'_>, subcommand: &str, arg: String) -> Message {
    Message::with_prefix(
        Prefix::ServerName(ctx.fabric.server_info.name.clone()),
        "CAP",
        vec![
            ctx.session.display_nick().to_string(),
            subcommand.to_string(),
            arg,
        ],
    )
}

/// Whether this capability's prerequisites hold for the session.
/// All offered SASL mechanisms require TLS, so `sasl` is only grantable on
/// secure connections.
fn prerequisites_met(flag: CapSet, secure: bool) -> bool {
    if flag == CapSet::SASL {
        return secure || Mechanism::ALL.iter().any(|m| !m.requires_tls());
    }
    true
}

#[async_trait]
impl Handler for CapHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "CAP",
            min_params: 1,
            requires_registration: false,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let subcommand = msg.params[0].to_ascii_uppercase();
        let arg = msg.param(1).map(str::to_owned);

        match subcommand.as_str() {
            "LS" => handle_ls(ctx, arg).await,
            "LIST" => handle_list(ctx),
            "REQ" => handle_req(ctx, arg.unwrap_or_default()),
            "END" => handle_end(ctx).await,
            other => {
                debug!(subcommand = %other, "ignoring client CAP subcommand");
                Ok(())
            }
        }
    }
}

async fn handle_ls(ctx: &mut Context<'_>, version_arg: Option<String>) -> HandlerResult {
    let version: u32 = version_arg.and_then(|v| v.parse().ok()).unwrap_or(301);
    ctx.session.cap_version = version.max(ctx.session.cap_version);

    if !ctx.session.is_registered() {
        ctx.session.cap_negotiating = true;
        ctx.session.phase = SessionPhase::CapNegotiating;
    }

    // CAP LS 302+ implicitly enables cap-notify.
    if version >= 302 {
        ctx.session.caps |= CapSet::CAP_NOTIFY;
    }

    let tokens = ls_tokens(version, &Mechanism::names());
    let reply = cap_reply(ctx, "LS", tokens);
    ctx.send(reply);
    Ok(())
}

fn handle_list(ctx: &mut Context<'_>) -> HandlerResult {
    let enabled = ctx.session.caps.names().join(" ");
    let reply = cap_reply(ctx, "LIST", enabled);
    ctx.send(reply);
    Ok(())
}

fn handle_req(ctx: &mut Context<'_>, requested: String) -> HandlerResult {
    if !ctx.session.is_registered() {
        ctx.session.cap_negotiating = true;
        ctx.session.phase = SessionPhase::CapNegotiating;
    }

    // Two passes: validate the whole vector, then apply. A single unknown
    // or unavailable token rejects the request atomically.
    let mut grants = Vec::new();
    let mut valid = true;
    for token in requested.split_whitespace() {
        let (removal, name) = match token.strip_prefix('-') {
            Some(name) => (true, name),
            None => (false, token),
        };
        let base = name.split('=').next().unwrap_or(name);
        match CapSet::from_wire_name(base) {
            Some(flag) if removal || prerequisites_met(flag, ctx.session.secure) => {
                grants.push((removal, flag));
            }
            _ => {
                valid = false;
                break;
            }
        }
    }

    if !valid || grants.is_empty() {
        let reply = cap_reply(ctx, "NAK", requested);
        ctx.send(reply);
        return Ok(());
    }

    for (removal, flag) in grants {
        if removal {
            ctx.session.caps.remove(flag);
        } else {
            ctx.session.caps.insert(flag);
        }
    }
    ctx.fabric
        .broker
        .update_caps(ctx.conn(), ctx.session.caps);

    let reply = cap_reply(ctx, "ACK", requested);
    ctx.send(reply);
    Ok(())
}

async fn handle_end(ctx: &mut Context<'_>) -> HandlerResult {
    if ctx.session.is_registered() {
        return Ok(());
    }
    ctx.session.cap_negotiating = false;
    if ctx.session.phase == SessionPhase::CapNegotiating {
        ctx.session.phase = SessionPhase::Accepted;
    }
    complete_registration_if_ready(ctx).await
}
