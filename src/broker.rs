//! Message broker: target-oriented delivery.
//!
//! All outbound traffic flows through here. Guarantees:
//!
//! - per-recipient ordering (one bounded mpsc per connection, drained by
//!   that connection's write task);
//! - no delivery to closed connections (senders are unregistered on
//!   disconnect; stale sends hit a closed channel and are dropped);
//! - a failed send never aborts sibling sends;
//! - channel membership is resolved at send time — joins racing with an
//!   in-flight fanout do not receive it;
//! - queue overflow (messages or bytes) requests disconnection with
//!   `ERROR :Send queue exceeded` instead of blocking the sender.
//!
//! Tags are filtered per recipient according to negotiated capabilities, so
//! handlers may stamp `time`/`account`/`msgid` freely.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use loom_proto::{CapSet, Message, Tag};
use tokio::sync::mpsc;
use tracing::debug;

use crate::links::manager::LinkManager;
use crate::state::channels::ChannelRepository;
use crate::state::uid::ConnectionId;
use crate::state::users::UserRepository;

struct ClientSender {
    tx: mpsc::Sender<Arc<Message>>,
    caps: CapSet,
    registered: bool,
    queued_bytes: Arc<AtomicUsize>,
}

/// The delivery fabric.
pub struct Broker {
    senders: DashMap<ConnectionId, ClientSender>,
    users: Arc<UserRepository>,
    channels: Arc<ChannelRepository>,
    links: Arc<LinkManager>,
    disconnect_tx: mpsc::Sender<(ConnectionId, String)>,
    max_queue_msgs: usize,
    max_queue_bytes: usize,
}

/// Which capability a tag key requires on the recipient side.
fn tag_visible(key: &str, caps: CapSet) -> bool {
    match key {
        "time" => caps.contains(CapSet::SERVER_TIME) || caps.contains(CapSet::MESSAGE_TAGS),
        "account" => caps.contains(CapSet::ACCOUNT_TAG),
        "batch" => caps.contains(CapSet::BATCH),
        "label" => caps.contains(CapSet::LABELED_RESPONSE),
        _ => caps.contains(CapSet::MESSAGE_TAGS),
    }
}

impl Broker {
    pub fn new(
        users: Arc<UserRepository>,
        channels: Arc<ChannelRepository>,
        links: Arc<LinkManager>,
        disconnect_tx: mpsc::Sender<(ConnectionId, String)>,
        max_queue_msgs: usize,
        max_queue_bytes: usize,
    ) -> Self {
        Self {
            senders: DashMap::new(),
            users,
            channels,
            links,
            disconnect_tx,
            max_queue_msgs,
            max_queue_bytes,
        }
    }

    /// Register a connection's outbound queue. Returns the receiver the
    /// write task drains plus the shared byte counter it decrements.
    pub fn register(
        &self,
        conn_id: ConnectionId,
    ) -> (mpsc::Receiver<Arc<Message>>, Arc<AtomicUsize>) {
        let (tx, rx) = mpsc::channel(self.max_queue_msgs);
        let queued_bytes = Arc::new(AtomicUsize::new(0));
        self.senders.insert(
            conn_id,
            ClientSender {
                tx,
                caps: CapSet::default(),
                registered: false,
                queued_bytes: queued_bytes.clone(),
            },
        );
        (rx, queued_bytes)
    }

    /// Drop a connection's queue; subsequent sends to it are no-ops.
    pub fn unregister(&self, conn_id: ConnectionId) {
        self.senders.remove(&conn_id);
    }

    /// Record capability changes so tag filtering stays accurate.
    pub fn update_caps(&self, conn_id: ConnectionId, caps: CapSet) {
        if let Some(mut entry) = self.senders.get_mut(&conn_id) {
            entry.caps = caps;
        }
    }

    /// Mark a connection registered (included in `broadcast`).
    pub fn mark_registered(&self, conn_id: ConnectionId) {
        if let Some(mut entry) = self.senders.get_mut(&conn_id) {
            entry.registered = true;
        }
    }

    /// Strip tags the recipient cannot see. Returns the original Arc when
    /// nothing needs stripping.
    fn filter_for(msg: &Arc<Message>, caps: CapSet) -> Arc<Message> {
        let Some(tags) = &msg.tags else {
            return msg.clone();
        };
        if tags.iter().all(|Tag(k, _)| tag_visible(k, caps)) {
            return msg.clone();
        }
        let kept: Vec<Tag> = tags
            .iter()
            .filter(|Tag(k, _)| tag_visible(k, caps))
            .cloned()
            .collect();
        let mut filtered = (**msg).clone();
        filtered.tags = if kept.is_empty() { None } else { Some(kept) };
        Arc::new(filtered)
    }

    /// Deliver to one connection. Never blocks; overflow schedules a
    /// disconnect.
    pub fn send_to_connection(&self, conn_id: ConnectionId, msg: &Arc<Message>) {
        let Some(entry) = self.senders.get(&conn_id) else {
            return;
        };

        let out = Self::filter_for(msg, entry.caps);
        // Line length + CRLF, for the byte bound.
        let cost = out.to_string().len() + 2;
        let queued = entry.queued_bytes.fetch_add(cost, Ordering::Relaxed) + cost;

        if queued > self.max_queue_bytes || entry.tx.try_send(out).is_err() {
            entry.queued_bytes.fetch_sub(cost, Ordering::Relaxed);
            debug!(conn = %conn_id, queued, "send queue exceeded");
            drop(entry);
            let _ = self
                .disconnect_tx
                .try_send((conn_id, "Send queue exceeded".to_string()));
            return;
        }
        crate::metrics::MESSAGES_ROUTED.inc();
    }

    /// Deliver to a set of connections.
    pub fn send_to_connections<I>(&self, conns: I, msg: &Arc<Message>)
    where
        I: IntoIterator<Item = ConnectionId>,
    {
        for conn in conns {
            self.send_to_connection(conn, msg);
        }
    }

    /// Deliver to a channel's members, resolved at send time.
    pub async fn send_to_channel(
        &self,
        channel: &str,
        msg: &Arc<Message>,
        except: Option<ConnectionId>,
    ) {
        let Some(chan) = self.channels.get(channel) else {
            return;
        };
        let members: Vec<ConnectionId> = {
            let chan = chan.read().await;
            chan.members.keys().copied().collect()
        };
        for conn in members {
            if Some(conn) == except {
                continue;
            }
            self.send_to_connection(conn, msg);
        }
    }

    /// Deliver to the union of several channels' members, each recipient
    /// exactly once.
    pub async fn send_to_channels<I, S>(
        &self,
        channels: I,
        msg: &Arc<Message>,
        except: Option<ConnectionId>,
    ) where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut seen: HashSet<ConnectionId> = HashSet::new();
        for name in channels {
            let Some(chan) = self.channels.get(name.as_ref()) else {
                continue;
            };
            let members: Vec<ConnectionId> = {
                let chan = chan.read().await;
                chan.members.keys().copied().collect()
            };
            for conn in members {
                if Some(conn) == except || !seen.insert(conn) {
                    continue;
                }
                self.send_to_connection(conn, msg);
            }
        }
    }

    /// Deliver to every registered local user.
    pub fn broadcast(&self, msg: &Arc<Message>) {
        let conns: Vec<ConnectionId> = self
            .senders
            .iter()
            .filter(|e| e.registered)
            .map(|e| *e.key())
            .collect();
        self.send_to_connections(conns, msg);
    }

    /// Deliver to local operators (and optionally +w users for WALLOPS).
    pub async fn send_to_operators(&self, msg: &Arc<Message>, include_wallops: bool) {
        let mut targets = Vec::new();
        for conn_id in self.users.connection_ids() {
            let Some(user) = self.users.get(conn_id) else {
                continue;
            };
            let user = user.read().await;
            if !user.is_local_to(&self.links.local_sid) {
                continue;
            }
            if user.modes.oper || (include_wallops && user.modes.wallops) {
                targets.push(conn_id);
            }
        }
        self.send_to_connections(targets, msg);
    }

    /// Route toward a remote server (S2S).
    pub fn send_to_server(&self, sid: &str, msg: Arc<Message>) {
        self.links.send_to_server(sid, msg);
    }

    /// Flood an event to all direct links except the originating one.
    pub fn propagate(&self, msg: Arc<Message>, except_link: Option<&str>) {
        self.links.broadcast(msg, except_link);
    }

    /// Number of live senders (tests / LUSERS unknown count).
    pub fn connection_count(&self) -> usize {
        self.senders.len()
    }

    /// Ask the disconnect worker to terminate a connection. Non-blocking;
    /// safe to call while holding repository locks.
    pub fn request_disconnect(&self, conn_id: ConnectionId, reason: &str) {
        let _ = self.disconnect_tx.try_send((conn_id, reason.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::channel::{Member, MemberModes};

    fn fixture() -> (Broker, mpsc::Receiver<(ConnectionId, String)>) {
        let users = Arc::new(UserRepository::new());
        let channels = Arc::new(ChannelRepository::new());
        let links = Arc::new(LinkManager::new(
            "001".into(),
            "hub.loom.example".into(),
            Vec::new(),
        ));
        let (disc_tx, disc_rx) = mpsc::channel(16);
        (
            Broker::new(users, channels, links, disc_tx, 8, 4096),
            disc_rx,
        )
    }

    fn msg(text: &str) -> Arc<Message> {
        Arc::new(Message::new("PRIVMSG", vec!["#ch".into(), text.into()]))
    }

    #[tokio::test]
    async fn per_connection_ordering() {
        let (broker, _disc) = fixture();
        let conn = ConnectionId::next();
        let (mut rx, _bytes) = broker.register(conn);

        for i in 0..3 {
            broker.send_to_connection(conn, &msg(&format!("m{i}")));
        }
        for i in 0..3 {
            let got = rx.recv().await.unwrap();
            assert_eq!(got.params[1], format!("m{i}"));
        }
    }

    #[tokio::test]
    async fn unknown_connection_is_noop() {
        let (broker, _disc) = fixture();
        broker.send_to_connection(ConnectionId::next(), &msg("x"));
    }

    #[tokio::test]
    async fn overflow_requests_disconnect() {
        let (broker, mut disc) = fixture();
        let conn = ConnectionId::next();
        let (_rx, _bytes) = broker.register(conn);

        // Queue depth is 8 and nothing drains: the 9th try_send fails.
        for _ in 0..16 {
            broker.send_to_connection(conn, &msg("flood"));
        }
        let (victim, reason) = disc.try_recv().unwrap();
        assert_eq!(victim, conn);
        assert_eq!(reason, "Send queue exceeded");
    }

    #[tokio::test]
    async fn byte_bound_requests_disconnect() {
        let (broker, mut disc) = fixture();
        let conn = ConnectionId::next();
        let (_rx, _bytes) = broker.register(conn);

        let big = "x".repeat(600);
        // 4096-byte bound: seven ~615-byte lines trip it before the
        // 8-message depth does.
        for _ in 0..8 {
            broker.send_to_connection(conn, &msg(&big));
        }
        let (victim, _) = disc.try_recv().unwrap();
        assert_eq!(victim, conn);
    }

    #[tokio::test]
    async fn channel_fanout_with_exclusion() {
        let (broker, _disc) = fixture();
        let a = ConnectionId::next();
        let b = ConnectionId::next();
        let (mut rx_a, _) = broker.register(a);
        let (mut rx_b, _) = broker.register(b);

        let (chan, _) = broker.channels.get_or_create("#dev", 0);
        {
            let mut chan = chan.write().await;
            for (conn, nick) in [(a, "alice"), (b, "bob")] {
                chan.members.insert(
                    conn,
                    Member {
                        nick: nick.into(),
                        joined_at: 0,
                        modes: MemberModes::default(),
                    },
                );
            }
        }

        broker.send_to_channel("#dev", &msg("hi"), Some(a)).await;
        assert!(rx_a.try_recv().is_err());
        assert_eq!(rx_b.recv().await.unwrap().params[1], "hi");
    }

    #[tokio::test]
    async fn multi_channel_fanout_deduplicates() {
        let (broker, _disc) = fixture();
        let a = ConnectionId::next();
        let (mut rx_a, _) = broker.register(a);

        for name in ["#dev", "#ops", "#lobby"] {
            let (chan, _) = broker.channels.get_or_create(name, 0);
            chan.write().await.members.insert(
                a,
                Member {
                    nick: "alice".into(),
                    joined_at: 0,
                    modes: MemberModes::default(),
                },
            );
        }

        broker
            .send_to_channels(["#dev", "#ops", "#lobby"], &msg("once"), None)
            .await;
        assert!(rx_a.try_recv().is_ok());
        assert!(rx_a.try_recv().is_err(), "duplicate delivery");
    }

    #[tokio::test]
    async fn tag_filtering_per_recipient() {
        let (broker, _disc) = fixture();
        let plain = ConnectionId::next();
        let tagged = ConnectionId::next();
        let (mut rx_plain, _) = broker.register(plain);
        let (mut rx_tagged, _) = broker.register(tagged);
        broker.update_caps(tagged, CapSet::SERVER_TIME);

        let mut m = Message::new("PRIVMSG", vec!["#ch".into(), "hi".into()]);
        m.set_tag("time", Some("2026-01-01T00:00:00.000Z".into()));
        let m = Arc::new(m);

        broker.send_to_connection(plain, &m);
        broker.send_to_connection(tagged, &m);

        assert!(rx_plain.recv().await.unwrap().tags.is_none());
        assert!(rx_tagged.recv().await.unwrap().tag_value("time").is_some());
    }

    #[tokio::test]
    async fn broadcast_only_hits_registered() {
        let (broker, _disc) = fixture();
        let reg = ConnectionId::next();
        let pre = ConnectionId::next();
        let (mut rx_reg, _) = broker.register(reg);
        let (mut rx_pre, _) = broker.register(pre);
        broker.mark_registered(reg);

        broker.broadcast(&msg("news"));
        assert!(rx_reg.try_recv().is_ok());
        assert!(rx_pre.try_recv().is_err());
    }
}
