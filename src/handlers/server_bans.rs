//! Oper-managed server bans: KLINE, GLINE, ZLINE, JUPE and their removals.

use std::sync::Arc;

use async_trait::async_trait;
use loom_proto::{Message, Numeric};

use super::{Context, Handler, HandlerResult, HandlerSpec};
use crate::security::bans::BanKind;

/// Parse a duration argument: `0` is permanent, otherwise `<n>[smhd]`
/// (bare numbers are minutes).
fn parse_expiry(arg: &str, now: i64) -> Option<Option<i64>> {
    if arg == "0" {
        return Some(None);
    }
    let (digits, unit) = match arg.chars().last() {
        Some(u) if u.is_ascii_alphabetic() => (&arg[..arg.len() - 1], u),
        _ => (arg, 'm'),
    };
    let n: i64 = digits.parse().ok()?;
    let secs = match unit {
        's' => n,
        'm' => n * 60,
        'h' => n * 3600,
        'd' => n * 86400,
        _ => return None,
    };
    Some(Some(now + secs))
}

async fn require_oper(ctx: &Context<'_>) -> bool {
    let is_oper = match ctx.user() {
        Some(user) => user.read().await.modes.oper,
        None => false,
    };
    if !is_oper {
        ctx.numeric(
            Numeric::ERR_NOPRIVILEGES,
            ["Permission Denied- You're not an IRC operator"],
        );
    }
    is_oper
}

/// Shared add path: `<CMD> <pattern> [duration] :<reason>`.
async fn add_ban(ctx: &mut Context<'_>, msg: &Message, kind: BanKind) -> HandlerResult {
    if !require_oper(ctx).await {
        return Ok(());
    }

    let pattern = msg.params[0].clone();
    let now = chrono::Utc::now().timestamp();
    let (expires_at, reason) = match msg.params.len() {
        1 => (None, "No reason given".to_string()),
        2 => match parse_expiry(&msg.params[1], now) {
            Some(exp) => (exp, "No reason given".to_string()),
            None => (None, msg.params[1].clone()),
        },
        _ => match parse_expiry(&msg.params[1], now) {
            Some(exp) => (exp, msg.params[2..].join(" ")),
            None => (None, msg.params[1..].join(" ")),
        },
    };

    let set_by = ctx.session.display_nick().to_string();
    ctx.fabric
        .server_bans
        .add(kind, &pattern, &reason, &set_by, expires_at);

    super::registration::server_notice(
        ctx,
        &format!("Added {} for {pattern} ({reason})", kind.as_str()),
    );
    tracing::info!(kind = kind.as_str(), pattern = %pattern, set_by = %set_by, "server ban added");

    // Network-wide classes flood to peers.
    if matches!(kind, BanKind::GLine | BanKind::Jupe) {
        let uid = match ctx.user() {
            Some(user) => user.read().await.uid.clone(),
            None => return Ok(()),
        };
        ctx.fabric.broker.propagate(
            Arc::new(crate::links::protocol::global_ban(
                &uid, kind, &pattern, &reason, expires_at,
            )),
            None,
        );
    }

    // Evict currently connected matches.
    enforce_ban(ctx, kind, &pattern).await;
    Ok(())
}

/// Disconnect connected users matching a freshly placed ban.
async fn enforce_ban(ctx: &Context<'_>, kind: BanKind, pattern: &str) {
    if kind == BanKind::Jupe {
        return;
    }
    for conn in ctx.fabric.users.connection_ids() {
        let Some(user_arc) = ctx.fabric.users.get(conn) else {
            continue;
        };
        let hit = {
            let user = user_arc.read().await;
            user.is_local_to(&ctx.fabric.server_info.sid)
                && ctx
                    .fabric
                    .server_bans
                    .lookup_matching(user.ip, &user.host, &user.user)
                    .is_some_and(|b| b.pattern == pattern)
        };
        if hit {
            // The disconnect worker runs the canonical cleanup and sends
            // the ERROR line.
            ctx.fabric
                .broker
                .request_disconnect(conn, &format!("You are banned ({})", kind.as_str()));
        }
    }
}

/// Shared removal path: `<CMD> <pattern>`.
async fn remove_ban(ctx: &mut Context<'_>, msg: &Message, kind: BanKind) -> HandlerResult {
    if !require_oper(ctx).await {
        return Ok(());
    }
    let pattern = msg.params[0].clone();
    let removed = ctx.fabric.server_bans.remove(kind, &pattern);
    super::registration::server_notice(
        ctx,
        &format!("Removed {removed} {} entr(y/ies) for {pattern}", kind.as_str()),
    );
    Ok(())
}

macro_rules! ban_handler {
    ($add:ident, $remove:ident, $add_name:literal, $remove_name:literal, $kind:expr) => {
        pub struct $add;

        #[async_trait]
        impl Handler for $add {
            fn spec(&self) -> HandlerSpec {
                HandlerSpec {
                    name: $add_name,
                    min_params: 1,
                    requires_registration: true,
                }
            }

            async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
                add_ban(ctx, msg, $kind).await
            }
        }

        pub struct $remove;

        #[async_trait]
        impl Handler for $remove {
            fn spec(&self) -> HandlerSpec {
                HandlerSpec {
                    name: $remove_name,
                    min_params: 1,
                    requires_registration: true,
                }
            }

            async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
                remove_ban(ctx, msg, $kind).await
            }
        }
    };
}

ban_handler!(KlineHandler, UnklineHandler, "KLINE", "UNKLINE", BanKind::KLine);
ban_handler!(GlineHandler, UnglineHandler, "GLINE", "UNGLINE", BanKind::GLine);
ban_handler!(ZlineHandler, UnzlineHandler, "ZLINE", "UNZLINE", BanKind::ZLine);
ban_handler!(JupeHandler, UnjupeHandler, "JUPE", "UNJUPE", BanKind::Jupe);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_grammar() {
        let now = 1000;
        assert_eq!(parse_expiry("0", now), Some(None));
        assert_eq!(parse_expiry("30s", now), Some(Some(1030)));
        assert_eq!(parse_expiry("10m", now), Some(Some(1600)));
        assert_eq!(parse_expiry("2h", now), Some(Some(1000 + 7200)));
        assert_eq!(parse_expiry("1d", now), Some(Some(1000 + 86400)));
        // Bare numbers are minutes.
        assert_eq!(parse_expiry("5", now), Some(Some(1300)));
        assert_eq!(parse_expiry("soon", now), None);
    }
}
