//! The Fabric — central shared state of the server.
//!
//! The Fabric is a dependency container tying the repositories, broker,
//! link manager, and security subsystems together, plus the canonical
//! disconnect path every exit route (QUIT, KILL, flood, timeout, netsplit)
//! funnels through.
//!
//! # Lock order
//!
//! 1. DashMap shard (during `get`/`iter`)
//! 2. Channel `RwLock`
//! 3. User `RwLock`
//!
//! Never in reverse, and never held across broker awaits — collect what
//! you need, drop the guard, then send.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use loom_proto::{Message, Prefix};
use tokio::sync::{broadcast, mpsc};
use tracing::info;

use crate::broker::Broker;
use crate::config::Config;
use crate::links::manager::LinkManager;
use crate::security::admission::{AdmissionConfig, AdmissionControl};
use crate::security::bans::ServerBanRepo;
use crate::security::dnsbl::DnsblService;
use crate::services::Collaborators;
use crate::state::channels::ChannelRepository;
use crate::state::uid::{ConnectionId, UidGenerator};
use crate::state::user::WhowasEntry;
use crate::state::users::UserRepository;

/// This server's identity.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub name: String,
    pub network: String,
    pub sid: String,
    pub description: String,
    /// Unix timestamp of process start.
    pub created: i64,
    pub motd_lines: Option<Vec<String>>,
    pub version: String,
}

/// Live counters for LUSERS and the welcome burst.
#[derive(Debug, Default)]
pub struct Stats {
    pub local_users: AtomicUsize,
    pub invisible_users: AtomicUsize,
    pub operators: AtomicUsize,
    pub max_local_users: AtomicUsize,
}

impl Stats {
    pub fn user_registered(&self) {
        let now = self.local_users.fetch_add(1, Ordering::Relaxed) + 1;
        self.max_local_users.fetch_max(now, Ordering::Relaxed);
        crate::metrics::CONNECTED_USERS.inc();
    }

    pub fn user_disconnected(&self, was_invisible: bool, was_oper: bool) {
        self.local_users.fetch_sub(1, Ordering::Relaxed);
        if was_invisible {
            self.invisible_users.fetch_sub(1, Ordering::Relaxed);
        }
        if was_oper {
            self.operators.fetch_sub(1, Ordering::Relaxed);
        }
        crate::metrics::CONNECTED_USERS.dec();
    }
}

/// Central shared state.
pub struct Fabric {
    pub users: Arc<UserRepository>,
    pub channels: Arc<ChannelRepository>,
    pub broker: Broker,
    pub links: Arc<LinkManager>,
    pub server_bans: ServerBanRepo,
    pub admission: AdmissionControl,
    pub dnsbl: Option<DnsblService>,
    pub collaborators: Collaborators,
    pub uid_gen: UidGenerator,
    pub server_info: ServerInfo,
    pub config: Config,
    pub stats: Stats,
    /// Fans out process shutdown to maintenance tasks.
    pub shutdown_tx: broadcast::Sender<()>,
}

impl Fabric {
    /// Build the Fabric. Returns the disconnect-request receiver the
    /// dedicated worker drains (see `main`).
    pub fn new(
        config: Config,
        collaborators: Collaborators,
    ) -> (Arc<Self>, mpsc::Receiver<(ConnectionId, String)>) {
        let users = Arc::new(UserRepository::new());
        let channels = Arc::new(ChannelRepository::new());
        let links = Arc::new(LinkManager::new(
            config.server.sid.clone(),
            config.server.name.clone(),
            config.links.clone(),
        ));

        // Disconnect worker channel: bounded so a disconnect storm cannot
        // exhaust memory; the broker drops requests when it is full and the
        // ping sweep catches stragglers.
        let (disconnect_tx, disconnect_rx) = mpsc::channel(1024);

        let broker = Broker::new(
            users.clone(),
            channels.clone(),
            links.clone(),
            disconnect_tx,
            config.limits.max_queue_msgs,
            config.limits.max_queue_bytes,
        );

        let admission = AdmissionControl::new(AdmissionConfig {
            connections_per_second: config.security.admission.connections_per_second,
            connection_burst: config.security.admission.connection_burst,
            exempt: config.security.admission.exempt.clone(),
        });

        let dnsbl = if config.security.dnsbl_zones.is_empty() {
            None
        } else {
            Some(DnsblService::new(config.security.dnsbl_zones.clone()))
        };

        let server_info = ServerInfo {
            name: config.server.name.clone(),
            network: config.server.network.clone(),
            sid: config.server.sid.clone(),
            description: config.server.description.clone(),
            created: chrono::Utc::now().timestamp(),
            motd_lines: config.motd_lines(),
            version: format!("loom-ircd-{}", env!("CARGO_PKG_VERSION")),
        };

        let (shutdown_tx, _) = broadcast::channel(4);

        let fabric = Arc::new(Self {
            users,
            channels,
            broker,
            links,
            server_bans: ServerBanRepo::new(),
            admission,
            dnsbl,
            collaborators,
            uid_gen: UidGenerator::new(config.server.sid.clone()),
            server_info,
            config,
            stats: Stats::default(),
            shutdown_tx,
        });

        (fabric, disconnect_rx)
    }

    /// Prefix for server-sourced messages.
    pub fn server_prefix(&self) -> Prefix {
        Prefix::ServerName(self.server_info.name.clone())
    }

    /// Disconnect a user and clean every trace of it.
    ///
    /// This is the canonical exit path used by QUIT, KILL, ping timeout,
    /// flood termination, and netsplit cleanup. Each common-channel member
    /// sees exactly one QUIT. Returns the channels the user was in.
    pub async fn disconnect_user(
        self: &Arc<Self>,
        conn_id: ConnectionId,
        reason: &str,
        announce_to_links: bool,
    ) -> Vec<String> {
        let Some(user_arc) = self.users.get(conn_id) else {
            // Already gone: QUIT on an already-quit connection is a no-op.
            return Vec::new();
        };

        let (nick, username, host, realname, uid, channels, was_local, was_invisible, was_oper) = {
            let user = user_arc.read().await;
            (
                user.nick.clone(),
                user.user.clone(),
                user.host.clone(),
                user.realname.clone(),
                user.uid.clone(),
                user.channels.keys().cloned().collect::<Vec<_>>(),
                user.is_local_to(&self.server_info.sid),
                user.modes.invisible,
                user.modes.oper,
            )
        };
        let was_registered = !nick.is_empty();

        // One QUIT per common-channel member, deduplicated.
        if !nick.is_empty() {
            let quit = Arc::new(Message::with_prefix(
                Prefix::new(nick.clone(), username.clone(), host.clone()),
                "QUIT",
                vec![reason.to_string()],
            ));
            self.broker
                .send_to_channels(channels.iter(), &quit, Some(conn_id))
                .await;
        }

        // Leave every channel; destroy the ones that empty out.
        for channel_name in &channels {
            if let Some(chan) = self.channels.get(channel_name) {
                let mut chan = chan.write().await;
                chan.members.remove(&conn_id);
                chan.invited.remove(&conn_id);
            }
            self.channels.remove_if_dead(channel_name).await;
        }

        if !nick.is_empty() {
            self.users.record_whowas(WhowasEntry {
                nick: nick.clone(),
                user: username,
                host,
                realname,
                server: self.server_info.name.clone(),
                logout_time: chrono::Utc::now().timestamp_millis(),
            });
        }

        drop(user_arc);
        self.users.remove(conn_id).await;
        self.broker.unregister(conn_id);

        if was_local && was_registered {
            self.stats.user_disconnected(was_invisible, was_oper);
        }

        if was_local && announce_to_links && !uid.is_empty() {
            let s2s_quit = Arc::new(Message::with_prefix(
                Prefix::ServerName(uid),
                "QUIT",
                vec![reason.to_string()],
            ));
            self.broker.propagate(s2s_quit, None);
        }

        info!(conn = %conn_id, nick = %nick, reason = %reason, "user disconnected");
        channels
    }
}
