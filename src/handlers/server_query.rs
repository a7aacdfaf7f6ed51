//! Server information queries: MOTD, LUSERS, VERSION, TIME.

use std::sync::atomic::Ordering;

use async_trait::async_trait;
use loom_proto::{Message, Numeric};

use super::{Context, Handler, HandlerResult, HandlerSpec};

/// Emit the LUSERS block (shared with the welcome burst).
pub fn send_lusers(ctx: &Context<'_>) {
    let stats = &ctx.fabric.stats;
    let local = stats.local_users.load(Ordering::Relaxed);
    let invisible = stats.invisible_users.load(Ordering::Relaxed);
    let opers = stats.operators.load(Ordering::Relaxed);
    let max_local = stats.max_local_users.load(Ordering::Relaxed);
    let global = ctx.fabric.users.len();
    let channels = ctx.fabric.channels.len();
    let servers = ctx.fabric.links.topology.len() + 1;
    let visible = global.saturating_sub(invisible);

    ctx.numeric(
        Numeric::RPL_LUSERCLIENT,
        [format!(
            "There are {visible} users and {invisible} invisible on {servers} servers"
        )],
    );
    ctx.numeric(
        Numeric::RPL_LUSEROP,
        [opers.to_string(), "operator(s) online".to_string()],
    );
    let unknown = ctx
        .fabric
        .broker
        .connection_count()
        .saturating_sub(local);
    ctx.numeric(
        Numeric::RPL_LUSERUNKNOWN,
        [unknown.to_string(), "unknown connection(s)".to_string()],
    );
    ctx.numeric(
        Numeric::RPL_LUSERCHANNELS,
        [channels.to_string(), "channels formed".to_string()],
    );
    ctx.numeric(
        Numeric::RPL_LUSERME,
        [format!("I have {local} clients and {} servers", servers - 1)],
    );
    ctx.numeric(
        Numeric::RPL_LOCALUSERS,
        [
            local.to_string(),
            max_local.to_string(),
            format!("Current local users {local}, max {max_local}"),
        ],
    );
    ctx.numeric(
        Numeric::RPL_GLOBALUSERS,
        [
            global.to_string(),
            global.to_string(),
            format!("Current global users {global}, max {global}"),
        ],
    );
}

/// Emit the MOTD block, or `422` when no file is configured.
pub fn send_motd(ctx: &Context<'_>) {
    let info = &ctx.fabric.server_info;
    match &info.motd_lines {
        Some(lines) => {
            ctx.numeric(
                Numeric::RPL_MOTDSTART,
                [format!("- {} Message of the day - ", info.name)],
            );
            for line in lines {
                ctx.numeric(Numeric::RPL_MOTD, [format!("- {line}")]);
            }
            ctx.numeric(Numeric::RPL_ENDOFMOTD, ["End of /MOTD command."]);
        }
        None => {
            ctx.numeric(Numeric::ERR_NOMOTD, ["MOTD File is missing"]);
        }
    }
}

pub struct MotdHandler;

#[async_trait]
impl Handler for MotdHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "MOTD",
            min_params: 0,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, _msg: &Message) -> HandlerResult {
        send_motd(ctx);
        Ok(())
    }
}

pub struct LusersHandler;

#[async_trait]
impl Handler for LusersHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "LUSERS",
            min_params: 0,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, _msg: &Message) -> HandlerResult {
        send_lusers(ctx);
        Ok(())
    }
}

pub struct VersionHandler;

#[async_trait]
impl Handler for VersionHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "VERSION",
            min_params: 0,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, _msg: &Message) -> HandlerResult {
        let info = &ctx.fabric.server_info;
        // 351 is not in the produced-numerics table; a NOTICE keeps the
        // reply format stable without widening the numeric surface.
        super::registration::server_notice(
            ctx,
            &format!("{} running {}", info.name, info.version),
        );
        Ok(())
    }
}

pub struct TimeHandler;

#[async_trait]
impl Handler for TimeHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "TIME",
            min_params: 0,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, _msg: &Message) -> HandlerResult {
        let now = chrono::Utc::now().to_rfc2822();
        super::registration::server_notice(
            ctx,
            &format!("{}: {now}", ctx.fabric.server_info.name),
        );
        Ok(())
    }
}
