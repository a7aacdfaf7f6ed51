//! The registration welcome burst: 001–005, LUSERS, MOTD, user modes.

use chrono::TimeZone;
use loom_proto::{isupport, Numeric};

use super::server_query::{send_lusers, send_motd};
use super::Context;

/// User mode letters advertised in 004.
const USER_MODES: &str = "iwsorBZ";

/// Channel mode letters advertised in 004.
const CHANNEL_MODES: &str = "beIiklmnpstr";

pub async fn send_welcome_burst(ctx: &mut Context<'_>) {
    let info = &ctx.fabric.server_info;
    let nick = ctx.session.display_nick().to_string();

    ctx.numeric(
        Numeric::RPL_WELCOME,
        [format!(
            "Welcome to the {} Internet Relay Chat Network {}",
            info.network, nick
        )],
    );
    ctx.numeric(
        Numeric::RPL_YOURHOST,
        [format!(
            "Your host is {}, running version {}",
            info.name, info.version
        )],
    );
    let created = chrono::Utc
        .timestamp_opt(info.created, 0)
        .single()
        .map(|t| t.format("%a %b %e %Y at %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "a moment ago".to_string());
    ctx.numeric(
        Numeric::RPL_CREATED,
        [format!("This server was created {created}")],
    );
    ctx.numeric(
        Numeric::RPL_MYINFO,
        [
            info.name.clone(),
            info.version.clone(),
            USER_MODES.to_string(),
            CHANNEL_MODES.to_string(),
        ],
    );

    for line in isupport::isupport_lines(&info.network) {
        let mut params = line;
        params.push("are supported by this server".to_string());
        ctx.numeric(Numeric::RPL_ISUPPORT, params);
    }

    send_lusers(ctx);
    send_motd(ctx);

    // Initial user modes, when any are set (+Z for TLS, +r for SASL).
    if let Some(user_arc) = ctx.user() {
        let (prefix, modes) = {
            let user = user_arc.read().await;
            (user.prefix(), user.modes.as_mode_string())
        };
        if modes != "+" {
            ctx.send(loom_proto::Message::with_prefix(
                prefix,
                "MODE",
                vec![nick, modes],
            ));
        }
    }
}
