//! User queries: WHO (classic and WHOX), WHOIS, WHOWAS.

use async_trait::async_trait;
use loom_proto::{wildcard_match, ChannelExt, Message, Numeric};

use super::{Context, Handler, HandlerResult, HandlerSpec};
use crate::state::uid::ConnectionId;

/// WHOX field order per the spec: `t c u i h s n f d l a o r`.
const WHOX_FIELD_ORDER: &[char] = &['t', 'c', 'u', 'i', 'h', 's', 'n', 'f', 'd', 'l', 'a', 'o', 'r'];

/// One row of WHO output, resolved from a user record.
struct WhoRow {
    channel: String,
    user: String,
    ip: String,
    host: String,
    server: String,
    nick: String,
    flags: String,
    account: String,
    realname: String,
}

impl WhoRow {
    async fn of(
        ctx: &Context<'_>,
        conn: ConnectionId,
        channel: Option<&str>,
    ) -> Option<WhoRow> {
        // Snapshot the record, then release: channel locks order before
        // user locks.
        let user_arc = ctx.fabric.users.get(conn)?;
        let (mut row, away, oper, server) = {
            let user = user_arc.read().await;
            (
                WhoRow {
                    channel: "*".to_string(),
                    user: user.user.clone(),
                    ip: user.ip.to_string(),
                    host: user.host.clone(),
                    server: user.server.clone(),
                    nick: user.nick.clone(),
                    flags: String::new(),
                    account: user.account.clone().unwrap_or_else(|| "0".to_string()),
                    realname: user.realname.clone(),
                },
                user.away.is_some(),
                user.modes.oper,
                user.server.clone(),
            )
        };

        row.flags = String::from(if away { "G" } else { "H" });
        if oper {
            row.flags.push('*');
        }

        if let Some(name) = channel {
            if let Some(chan_arc) = ctx.fabric.channels.get(name) {
                let chan = chan_arc.read().await;
                if let Some(prefix) = chan
                    .members
                    .get(&conn)
                    .and_then(|m| m.modes.prefix_char())
                {
                    row.flags.push(prefix);
                }
                row.channel = chan.name.clone();
            }
        }

        row.server = if server == ctx.fabric.server_info.sid {
            ctx.fabric.server_info.name.clone()
        } else {
            ctx.fabric
                .links
                .topology
                .get(&server)
                .map(|s| s.name)
                .unwrap_or(server)
        };

        Some(row)
    }

    /// Classic 352 parameters.
    fn classic(&self) -> Vec<String> {
        vec![
            self.channel.clone(),
            self.user.clone(),
            self.host.clone(),
            self.server.clone(),
            self.nick.clone(),
            self.flags.clone(),
            format!("0 {}", self.realname),
        ]
    }

    /// WHOX 354 parameters for the requested field letters.
    fn whox(&self, fields: &str) -> Vec<String> {
        let mut out = Vec::new();
        for field in WHOX_FIELD_ORDER {
            if !fields.contains(*field) {
                continue;
            }
            match field {
                't' => {} // query token: appended by the caller
                'c' => out.push(self.channel.clone()),
                'u' => out.push(self.user.clone()),
                'i' => out.push(self.ip.clone()),
                'h' => out.push(self.host.clone()),
                's' => out.push(self.server.clone()),
                'n' => out.push(self.nick.clone()),
                'f' => out.push(self.flags.clone()),
                'd' => out.push("0".to_string()),
                'l' => out.push("0".to_string()),
                'a' => out.push(self.account.clone()),
                'o' => out.push("n/a".to_string()),
                'r' => out.push(self.realname.clone()),
                _ => {}
            }
        }
        out
    }
}

pub struct WhoHandler;

#[async_trait]
impl Handler for WhoHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "WHO",
            min_params: 1,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let mask = msg.params[0].clone();
        // `WHO <mask> %fields[,token]` selects the WHOX reply format.
        let whox = msg.param(1).and_then(|arg| arg.strip_prefix('%')).map(|spec| {
            let mut parts = spec.splitn(2, ',');
            (
                parts.next().unwrap_or_default().to_string(),
                parts.next().map(str::to_owned),
            )
        });

        let mut rows = Vec::new();
        if mask.as_str().is_channel_name() {
            if let Some(chan_arc) = ctx.fabric.channels.get(&mask) {
                let members: Vec<ConnectionId> = {
                    let chan = chan_arc.read().await;
                    chan.members.keys().copied().collect()
                };
                for conn in members {
                    if let Some(row) = WhoRow::of(ctx, conn, Some(&mask)).await {
                        rows.push(row);
                    }
                }
            }
        } else {
            // Mask query over nick, host, and realname; invisible users
            // are only listed for requesters sharing a channel.
            let requester_channels: Vec<String> = match ctx.user() {
                Some(user_arc) => user_arc.read().await.channels.keys().cloned().collect(),
                None => Vec::new(),
            };
            for conn in ctx.fabric.users.connection_ids() {
                let Some(user_arc) = ctx.fabric.users.get(conn) else {
                    continue;
                };
                let (nick, host, realname, invisible, channels) = {
                    let user = user_arc.read().await;
                    (
                        user.nick.clone(),
                        user.host.clone(),
                        user.realname.clone(),
                        user.modes.invisible,
                        user.channels.keys().cloned().collect::<Vec<_>>(),
                    )
                };
                if nick.is_empty() {
                    continue;
                }
                let matched = mask == "*"
                    || wildcard_match(&mask, &nick)
                    || wildcard_match(&mask, &host)
                    || wildcard_match(&mask, &realname);
                if !matched {
                    continue;
                }
                if invisible
                    && conn != ctx.conn()
                    && !channels.iter().any(|c| requester_channels.contains(c))
                {
                    continue;
                }
                if let Some(row) = WhoRow::of(ctx, conn, None).await {
                    rows.push(row);
                }
            }
        }

        for row in rows {
            match &whox {
                Some((fields, token)) => {
                    let mut params = Vec::new();
                    if fields.contains('t') {
                        params.push(token.clone().unwrap_or_else(|| "0".to_string()));
                    }
                    params.extend(row.whox(fields));
                    ctx.numeric(Numeric::RPL_WHOSPCRPL, params);
                }
                None => ctx.numeric(Numeric::RPL_WHOREPLY, row.classic()),
            }
        }
        ctx.numeric(Numeric::RPL_ENDOFWHO, [mask.as_str(), "End of /WHO list"]);
        Ok(())
    }
}

/// WHOIS facts snapshotted under one user read lock.
struct WhoisSnapshot {
    nick: String,
    user: String,
    host: String,
    realname: String,
    server: String,
    channels: Vec<String>,
    oper: bool,
    secure: bool,
    away: Option<String>,
    connected_at: i64,
    last_activity: i64,
}

pub struct WhoisHandler;

#[async_trait]
impl Handler for WhoisHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "WHOIS",
            min_params: 1,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        // `WHOIS server nick` routes to a remote server in full
        // implementations; the final parameter is the nick either way.
        let nick = msg.params.last().cloned().unwrap_or_default();

        let Some((target_conn, target_arc)) = ctx.fabric.users.get_by_nick(&nick) else {
            ctx.numeric(Numeric::ERR_NOSUCHNICK, [nick.as_str(), "No such nick/channel"]);
            ctx.numeric(Numeric::RPL_ENDOFWHOIS, [nick.as_str(), "End of /WHOIS list"]);
            return Ok(());
        };

        // Snapshot the record first: channel locks are ordered before user
        // locks, so nothing may be held here while reading channels below.
        let target = {
            let t = target_arc.read().await;
            WhoisSnapshot {
                nick: t.nick.clone(),
                user: t.user.clone(),
                host: t.host.clone(),
                realname: t.realname.clone(),
                server: t.server.clone(),
                channels: t.channels.keys().cloned().collect(),
                oper: t.modes.oper,
                secure: t.modes.secure,
                away: t.away.clone(),
                connected_at: t.connected_at,
                last_activity: t.last_activity,
            }
        };

        ctx.numeric(
            Numeric::RPL_WHOISUSER,
            [
                target.nick.clone(),
                target.user.clone(),
                target.host.clone(),
                "*".to_string(),
                target.realname.clone(),
            ],
        );

        // Channel list with highest prefixes; secret channels only appear
        // to fellow members.
        let mut channel_tokens = Vec::new();
        for folded in &target.channels {
            if let Some(chan_arc) = ctx.fabric.channels.get(folded) {
                let chan = chan_arc.read().await;
                let secret = chan
                    .modes
                    .contains(crate::state::channel::ChannelModes::SECRET);
                if secret && !chan.members.contains_key(&ctx.conn()) {
                    continue;
                }
                let prefix = chan
                    .members
                    .get(&target_conn)
                    .and_then(|m| m.modes.prefix_char())
                    .map(String::from)
                    .unwrap_or_default();
                channel_tokens.push(format!("{prefix}{}", chan.name));
            }
        }
        if !channel_tokens.is_empty() {
            ctx.numeric(
                Numeric::RPL_WHOISCHANNELS,
                [target.nick.clone(), channel_tokens.join(" ")],
            );
        }

        let server_name = if target.server == ctx.fabric.server_info.sid {
            ctx.fabric.server_info.name.clone()
        } else {
            ctx.fabric
                .links
                .topology
                .get(&target.server)
                .map(|s| s.name)
                .unwrap_or_else(|| target.server.clone())
        };
        ctx.numeric(
            Numeric::RPL_WHOISSERVER,
            [
                target.nick.clone(),
                server_name,
                ctx.fabric.server_info.description.clone(),
            ],
        );

        if target.oper {
            ctx.numeric(
                Numeric::RPL_WHOISOPERATOR,
                [target.nick.clone(), "is an IRC operator".to_string()],
            );
        }
        if target.secure {
            ctx.numeric(
                Numeric::RPL_WHOISSECURE,
                [target.nick.clone(), "is using a secure connection".to_string()],
            );
        }
        if let Some(away) = &target.away {
            ctx.numeric(Numeric::RPL_AWAY, [target.nick.clone(), away.clone()]);
        }

        let now = chrono::Utc::now().timestamp();
        let idle = (now - target.last_activity).max(0);
        ctx.numeric(
            Numeric::RPL_WHOISIDLE,
            [
                target.nick.clone(),
                idle.to_string(),
                target.connected_at.to_string(),
                "seconds idle, signon time".to_string(),
            ],
        );

        ctx.numeric(
            Numeric::RPL_ENDOFWHOIS,
            [target.nick.clone(), "End of /WHOIS list".to_string()],
        );
        Ok(())
    }
}

pub struct WhowasHandler;

#[async_trait]
impl Handler for WhowasHandler {
    fn spec(&self) -> HandlerSpec {
        HandlerSpec {
            name: "WHOWAS",
            min_params: 1,
            requires_registration: true,
        }
    }

    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let nick = msg.params[0].clone();
        let count: usize = msg
            .param(1)
            .and_then(|c| c.parse().ok())
            .filter(|c| *c > 0)
            .unwrap_or(usize::MAX);

        let history = ctx.fabric.users.whowas(&nick);
        if history.is_empty() {
            ctx.numeric(
                Numeric::ERR_WASNOSUCHNICK,
                [nick.as_str(), "There was no such nickname"],
            );
        } else {
            for entry in history.iter().take(count) {
                ctx.numeric(
                    Numeric::RPL_WHOWASUSER,
                    [
                        entry.nick.clone(),
                        entry.user.clone(),
                        entry.host.clone(),
                        "*".to_string(),
                        entry.realname.clone(),
                    ],
                );
            }
        }
        ctx.numeric(
            Numeric::RPL_ENDOFWHOWAS,
            [nick.as_str(), "End of WHOWAS"],
        );
        Ok(())
    }
}
