//! AUTHENTICATE command: the SASL exchange.
//!
//! Mechanism payloads travel base64-encoded in 400-byte chunks; outcomes
//! are reported with numerics 900–907. Every failure path answers with the
//! same `904` text so the exchange cannot be used to probe for accounts.

use std::sync::Arc;

use async_trait::async_trait;
use loom_proto::sasl::{
    decode_payload, encode_payload, parse_external, parse_plain, Mechanism, ScramServer,
};
use loom_proto::{CapSet, Message, Numeric};

use super::{complete_registration_if_ready, Context, Handler, HandlerResult, HandlerSpec};
use crate::state::session::{SaslExchange, SessionPhase};

/// Longest AUTHENTICATE argument a client may send.
const MAX_CHUNK: usize = 400;

pub struct AuthenticateHandler;

#[async_trait]
impl Handler for AuthenticateHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "AUTHENTICATE",
            min_params: 1,
            requires_registration: false,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let arg = msg.params[0].clone();

        if arg.len() > MAX_CHUNK {
            ctx.numeric(Numeric::ERR_SASLTOOLONG, ["SASL message too long"]);
            abort_exchange(ctx);
            return Ok(());
        }

        if ctx.session.account.is_some() {
            ctx.numeric(
                Numeric::ERR_SASLALREADY,
                ["You have already authenticated using SASL"],
            );
            return Ok(());
        }

        if arg == "*" {
            ctx.numeric(Numeric::ERR_SASLABORTED, ["SASL authentication aborted"]);
            abort_exchange(ctx);
            return Ok(());
        }

        if ctx.session.sasl.is_none() {
            return begin_exchange(ctx, &arg).await;
        }
        continue_exchange(ctx, &arg).await
    }
}

fn abort_exchange(ctx: &mut Context<'_>) {
    ctx.session.sasl = None;
    if ctx.session.phase == SessionPhase::AuthInProgress {
        ctx.session.phase = if ctx.session.cap_negotiating {
            SessionPhase::CapNegotiating
        } else {
            SessionPhase::Accepted
        };
    }
}

fn fail(ctx: &mut Context<'_>) {
    ctx.numeric(Numeric::ERR_SASLFAIL, ["SASL authentication failed"]);
    abort_exchange(ctx);
}

fn send_challenge(ctx: &Context<'_>, payload: &[u8]) {
    for chunk in encode_payload(payload) {
        ctx.send(Message::new("AUTHENTICATE", vec![chunk]));
    }
}

async fn begin_exchange(ctx: &mut Context<'_>, mechanism: &str) -> HandlerResult {
    if !ctx.session.caps.contains(CapSet::SASL) {
        fail(ctx);
        return Ok(());
    }

    let Some(mech) = Mechanism::from_name(mechanism) else {
        fail(ctx);
        return Ok(());
    };
    if mech.requires_tls() && !ctx.session.secure {
        fail(ctx);
        return Ok(());
    }

    let mut exchange = SaslExchange::new(mech);
    if mech == Mechanism::ScramSha256 {
        exchange.scram = Some(ScramServer::new());
    }
    ctx.session.sasl = Some(exchange);
    ctx.session.phase = SessionPhase::AuthInProgress;

    // Empty server challenge: client speaks first for all three mechanisms.
    ctx.send(Message::new("AUTHENTICATE", vec!["+".to_string()]));
    Ok(())
}

async fn continue_exchange(ctx: &mut Context<'_>, chunk: &str) -> HandlerResult {
    // Reassemble 400-byte chunks: a full chunk means more follow.
    {
        let exchange = ctx.session.sasl.as_mut().expect("exchange in progress");
        if chunk != "+" {
            exchange.buffer.push_str(chunk);
        }
        if chunk.len() == MAX_CHUNK {
            return Ok(());
        }
        exchange.started_at = std::time::Instant::now();
    }

    let (mechanism, payload_b64) = {
        let exchange = ctx.session.sasl.as_mut().expect("exchange in progress");
        (exchange.mechanism, std::mem::take(&mut exchange.buffer))
    };

    let payload = match decode_payload(if payload_b64.is_empty() {
        "+"
    } else {
        &payload_b64
    }) {
        Ok(p) => p,
        Err(_) => {
            fail(ctx);
            return Ok(());
        }
    };

    match mechanism {
        Mechanism::Plain => finish_plain(ctx, &payload).await,
        Mechanism::External => finish_external(ctx, &payload).await,
        Mechanism::ScramSha256 => step_scram(ctx, &payload).await,
    }
}

async fn finish_plain(ctx: &mut Context<'_>, payload: &[u8]) -> HandlerResult {
    let Ok(creds) = parse_plain(payload) else {
        fail(ctx);
        return Ok(());
    };

    let valid = ctx
        .fabric
        .collaborators
        .accounts
        .validate(&creds.authcid, &creds.password)
        .await;
    if !valid {
        fail(ctx);
        return Ok(());
    }

    let account = creds.account_name().to_string();
    succeed(ctx, account).await
}

async fn finish_external(ctx: &mut Context<'_>, payload: &[u8]) -> HandlerResult {
    let Ok(authzid) = parse_external(payload) else {
        fail(ctx);
        return Ok(());
    };

    let Some(fingerprint) = ctx.session.certfp.clone() else {
        fail(ctx);
        return Ok(());
    };

    let Some(account) = ctx
        .fabric
        .collaborators
        .accounts
        .lookup_by_fingerprint(&fingerprint)
        .await
    else {
        fail(ctx);
        return Ok(());
    };

    if let Some(authzid) = authzid {
        if !loom_proto::irc_eq(&authzid, &account) {
            fail(ctx);
            return Ok(());
        }
    }

    succeed(ctx, account).await
}

async fn step_scram(ctx: &mut Context<'_>, payload: &[u8]) -> HandlerResult {
    // First client message: resolve stored credentials and answer with the
    // server-first message. Unknown accounts continue with a decoy salt.
    let awaiting_first = {
        let exchange = ctx.session.sasl.as_ref().expect("exchange in progress");
        exchange
            .scram
            .as_ref()
            .is_some_and(ScramServer::awaiting_first)
    };

    if awaiting_first {
        // Extract the username to look up credentials before stepping.
        let username = scram_username(payload);
        let creds = match &username {
            Some(name) => {
                ctx.fabric
                    .collaborators
                    .accounts
                    .scram_credentials(name)
                    .await
            }
            None => None,
        };

        let exchange = ctx.session.sasl.as_mut().expect("exchange in progress");
        let scram = exchange.scram.as_mut().expect("scram exchange");
        match scram.step_first(payload, move |_| creds) {
            Ok(server_first) => {
                send_challenge(ctx, &server_first);
                Ok(())
            }
            Err(_) => {
                fail(ctx);
                Ok(())
            }
        }
    } else {
        let exchange = ctx.session.sasl.as_mut().expect("exchange in progress");
        let scram = exchange.scram.as_mut().expect("scram exchange");
        match scram.step_final(payload) {
            Ok((server_final, account)) => {
                send_challenge(ctx, &server_final);
                succeed(ctx, account).await
            }
            Err(_) => {
                fail(ctx);
                Ok(())
            }
        }
    }
}

/// Pull `n=<user>` out of a client-first message without driving the state
/// machine, so credentials can be fetched async first.
fn scram_username(payload: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(payload).ok()?;
    let bare = text.strip_prefix("n,,")?;
    bare.split(',')
        .find_map(|part| part.strip_prefix("n="))
        .map(str::to_owned)
}

async fn succeed(ctx: &mut Context<'_>, account: String) -> HandlerResult {
    ctx.session.sasl = None;
    ctx.session.account = Some(account.clone());
    if ctx.session.phase == SessionPhase::AuthInProgress {
        ctx.session.phase = if ctx.session.cap_negotiating {
            SessionPhase::CapNegotiating
        } else {
            SessionPhase::Accepted
        };
    }

    ctx.fabric
        .collaborators
        .accounts
        .update_last_seen(&account)
        .await;

    let mask = match (&ctx.session.nick, &ctx.session.username) {
        (Some(nick), Some(user)) => format!("{nick}!{user}@{}", ctx.session.host),
        _ => "*".to_string(),
    };
    ctx.numeric(
        Numeric::RPL_LOGGEDIN,
        [
            mask,
            account.clone(),
            format!("You are now logged in as {account}"),
        ],
    );
    ctx.numeric(
        Numeric::RPL_SASLSUCCESS,
        ["SASL authentication successful"],
    );

    // Post-registration SASL (cap-notify reconnects): update the record.
    if let Some(user_arc) = ctx.user() {
        let mut user = user_arc.write().await;
        user.account = Some(account);
        user.modes.registered = true;
    }

    complete_registration_if_ready(ctx).await
}
