//! IRC command handlers and the dispatcher.
//!
//! Every handler declares `{name, min_params, requires_registration}`; the
//! registry rejects short parameter lists with `461` and unregistered use
//! of gated commands with `451` before the handler runs. Handlers send
//! replies through the broker and return only terminal outcomes
//! (close/quit) to the connection task.

mod cap;
mod channel;
mod messaging;
mod misc;
mod mode;
mod oper;
mod registration;
mod sasl;
mod server_bans;
mod server_query;
mod user_query;
mod webirc;
pub mod welcome;

#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use loom_proto::{Message, Numeric};

use crate::error::HandlerResult;
use crate::state::session::Session;
use crate::state::uid::ConnectionId;
use crate::state::user::User;
use crate::state::Fabric;

pub use registration::complete_registration_if_ready;

/// Static facts about a handler, consulted before dispatch.
#[derive(Debug, Clone, Copy)]
pub struct HandlerSpec {
    pub name: &'static str,
    pub min_params: usize,
    pub requires_registration: bool,
}

/// Handler context: shared state plus this connection's session.
pub struct Context<'a> {
    pub fabric: &'a Arc<Fabric>,
    pub session: &'a mut Session,
}

impl Context<'_> {
    pub fn conn(&self) -> ConnectionId {
        self.session.conn_id
    }

    /// This connection's user record, once registered.
    pub fn user(&self) -> Option<Arc<tokio::sync::RwLock<User>>> {
        self.fabric.users.get(self.conn())
    }

    /// Send a raw message to this connection.
    pub fn send(&self, msg: Message) {
        self.fabric
            .broker
            .send_to_connection(self.conn(), &Arc::new(msg));
    }

    /// Send a numeric reply: server as source, our nick (or `*`) as the
    /// first parameter.
    pub fn numeric<P, S>(&self, numeric: Numeric, params: P)
    where
        P: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut all = vec![self.session.display_nick().to_string()];
        all.extend(params.into_iter().map(Into::into));
        let msg = Message::with_prefix(
            self.fabric.server_prefix(),
            numeric.to_string(),
            all,
        );
        self.send(msg);
    }
}

/// Trait implemented by all command handlers.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Dispatch contract for this command.
    fn spec(&self) -> HandlerSpec;

    /// Handle an incoming message. Parameter count and registration state
    /// have already been checked against [`HandlerSpec`].
    async fn handle(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult;
}

/// Registry of command handlers.
pub struct Registry {
    handlers: HashMap<&'static str, Box<dyn Handler>>,
}

impl Registry {
    /// Create a registry with every client command registered.
    pub fn new() -> Self {
        let mut handlers: HashMap<&'static str, Box<dyn Handler>> = HashMap::new();

        let mut add = |h: Box<dyn Handler>| {
            handlers.insert(h.spec().name, h);
        };

        // Registration and connection liveness
        add(Box::new(registration::NickHandler));
        add(Box::new(registration::UserHandler));
        add(Box::new(registration::PassHandler));
        add(Box::new(registration::PingHandler));
        add(Box::new(registration::PongHandler));
        add(Box::new(registration::QuitHandler));
        add(Box::new(webirc::WebircHandler));

        // Capability negotiation and SASL
        add(Box::new(cap::CapHandler));
        add(Box::new(sasl::AuthenticateHandler));

        // Channel operations
        add(Box::new(channel::JoinHandler));
        add(Box::new(channel::PartHandler));
        add(Box::new(channel::TopicHandler));
        add(Box::new(channel::NamesHandler));
        add(Box::new(channel::ListHandler));
        add(Box::new(channel::InviteHandler));
        add(Box::new(channel::KickHandler));
        add(Box::new(mode::ModeHandler));

        // Messaging
        add(Box::new(messaging::PrivmsgHandler));
        add(Box::new(messaging::NoticeHandler));

        // Queries
        add(Box::new(user_query::WhoHandler));
        add(Box::new(user_query::WhoisHandler));
        add(Box::new(user_query::WhowasHandler));
        add(Box::new(misc::UserhostHandler));
        add(Box::new(misc::IsonHandler));
        add(Box::new(server_query::MotdHandler));
        add(Box::new(server_query::LusersHandler));
        add(Box::new(server_query::VersionHandler));
        add(Box::new(server_query::TimeHandler));

        // User status
        add(Box::new(misc::AwayHandler));
        add(Box::new(misc::SetnameHandler));

        // Operator commands
        add(Box::new(oper::OperHandler));
        add(Box::new(oper::KillHandler));
        add(Box::new(oper::WallopsHandler));
        add(Box::new(oper::ChghostHandler));
        add(Box::new(server_bans::KlineHandler));
        add(Box::new(server_bans::UnklineHandler));
        add(Box::new(server_bans::GlineHandler));
        add(Box::new(server_bans::UnglineHandler));
        add(Box::new(server_bans::ZlineHandler));
        add(Box::new(server_bans::UnzlineHandler));
        add(Box::new(server_bans::JupeHandler));
        add(Box::new(server_bans::UnjupeHandler));

        Self { handlers }
    }

    /// Dispatch one message. The `461`/`451`/`421` gate replies happen
    /// here; everything else is the handler's business.
    pub async fn dispatch(&self, ctx: &mut Context<'_>, msg: &Message) -> HandlerResult {
        let Some(handler) = self.handlers.get(msg.command.as_str()) else {
            if ctx.session.is_registered() {
                ctx.numeric(
                    Numeric::ERR_UNKNOWNCOMMAND,
                    [msg.command.clone(), "Unknown command".to_string()],
                );
            } else {
                ctx.numeric(Numeric::ERR_NOTREGISTERED, ["You have not registered"]);
            }
            return Ok(());
        };

        let spec = handler.spec();
        if spec.requires_registration && !ctx.session.is_registered() {
            ctx.numeric(Numeric::ERR_NOTREGISTERED, ["You have not registered"]);
            return Ok(());
        }
        if msg.params.len() < spec.min_params {
            ctx.numeric(
                Numeric::ERR_NEEDMOREPARAMS,
                [spec.name.to_string(), "Not enough parameters".to_string()],
            );
            return Ok(());
        }

        handler.handle(ctx, msg).await
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Build a [`crate::security::extban::BanContext`]-compatible snapshot of
/// a user for ban evaluation.
pub struct BanSnapshot {
    pub nick: String,
    pub user: String,
    pub host: String,
    pub realname: String,
    pub account: Option<String>,
    pub server: String,
    pub channels: Vec<String>,
    pub is_oper: bool,
    pub secure: bool,
    pub certfp: Option<String>,
}

impl BanSnapshot {
    pub async fn of(user: &tokio::sync::RwLock<User>) -> Self {
        let user = user.read().await;
        Self {
            nick: user.nick.clone(),
            user: user.user.clone(),
            host: user.host.clone(),
            realname: user.realname.clone(),
            account: user.account.clone(),
            server: user.server.clone(),
            channels: user.channels.keys().cloned().collect(),
            is_oper: user.modes.oper,
            secure: user.modes.secure,
            certfp: user.certfp.clone(),
        }
    }

    pub fn context(&self) -> crate::security::extban::BanContext<'_> {
        crate::security::extban::BanContext {
            nick: &self.nick,
            user: &self.user,
            host: &self.host,
            realname: &self.realname,
            account: self.account.as_deref(),
            server: &self.server,
            channels: &self.channels,
            is_oper: self.is_oper,
            secure: self.secure,
            certfp: self.certfp.as_deref(),
        }
    }
}
