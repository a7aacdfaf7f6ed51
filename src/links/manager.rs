//! Link manager: direct peers and routing state.
//!
//! The manager is passive shared state — the per-link connection tasks in
//! [`super::session`] feed it, and the broker consults it for
//! `send_to_server`. Netsplit orchestration lives in [`super::split`].

use std::sync::Arc;

use dashmap::DashMap;
use loom_proto::Message;
use tokio::sync::mpsc;
use tracing::warn;

use crate::config::LinkConfig;
use crate::links::topology::{LinkedServer, Sid, Topology};
use crate::state::uid::ConnectionId;

/// Per-link outbound queue depth.
pub const LINK_QUEUE_DEPTH: usize = 1024;

/// A direct (one-hop) peer.
#[derive(Debug, Clone)]
pub struct PeerHandle {
    pub sid: Sid,
    pub conn_id: ConnectionId,
    pub tx: mpsc::Sender<Arc<Message>>,
}

/// Shared S2S link state.
pub struct LinkManager {
    /// Every known server, ours excluded.
    pub topology: Topology,
    /// Direct links only.
    direct: DashMap<Sid, PeerHandle>,
    /// Configured link blocks (for handshake validation and autoconnect).
    pub link_blocks: Vec<LinkConfig>,
    pub local_sid: Sid,
    pub local_name: String,
}

impl LinkManager {
    pub fn new(local_sid: Sid, local_name: String, link_blocks: Vec<LinkConfig>) -> Self {
        Self {
            topology: Topology::new(),
            direct: DashMap::new(),
            link_blocks,
            local_sid,
            local_name,
        }
    }

    /// Config block for a peer claiming this name/SID.
    pub fn block_for(&self, sid: &str) -> Option<&LinkConfig> {
        self.link_blocks.iter().find(|b| b.sid == sid)
    }

    /// Register an established direct link and its topology entry.
    /// Fails on duplicate SID (fatal for the link).
    pub fn register_peer(
        &self,
        server: LinkedServer,
        conn_id: ConnectionId,
        tx: mpsc::Sender<Arc<Message>>,
    ) -> bool {
        let sid = server.sid.clone();
        if !self.topology.insert(server) {
            return false;
        }
        self.direct.insert(
            sid.clone(),
            PeerHandle {
                sid,
                conn_id,
                tx,
            },
        );
        true
    }

    /// Drop a direct peer handle (topology cleanup is the split logic's
    /// job).
    pub fn unregister_peer(&self, sid: &str) -> Option<PeerHandle> {
        self.direct.remove(sid).map(|(_, v)| v)
    }

    pub fn is_direct(&self, sid: &str) -> bool {
        self.direct.contains_key(sid)
    }

    pub fn direct_peers(&self) -> Vec<PeerHandle> {
        self.direct.iter().map(|e| e.value().clone()).collect()
    }

    /// The direct peer that routes toward `target`.
    pub fn route(&self, target: &str) -> Option<PeerHandle> {
        let hop = self.topology.next_hop(target)?;
        self.direct.get(&hop).map(|e| e.value().clone())
    }

    /// Send to the peer routing toward `target`; drops with a log line when
    /// the link queue is saturated.
    pub fn send_to_server(&self, target: &str, msg: Arc<Message>) {
        match self.route(target) {
            Some(peer) => {
                if peer.tx.try_send(msg).is_err() {
                    warn!(sid = %target, via = %peer.sid, "link queue full, dropping message");
                }
            }
            None => warn!(sid = %target, "no route to server"),
        }
    }

    /// Flood a state-changing event to every direct link except the one it
    /// arrived on.
    pub fn broadcast(&self, msg: Arc<Message>, except: Option<&str>) {
        for peer in self.direct.iter() {
            if Some(peer.sid.as_str()) == except {
                continue;
            }
            if peer.tx.try_send(msg.clone()).is_err() {
                warn!(sid = %peer.sid, "link queue full, dropping broadcast");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(sid: &str, via: Option<&str>) -> LinkedServer {
        LinkedServer {
            sid: sid.into(),
            name: format!("srv-{sid}.example"),
            description: String::new(),
            version: String::new(),
            hop_count: if via.is_some() { 2 } else { 1 },
            learned_from: via.map(Into::into),
        }
    }

    fn manager() -> LinkManager {
        LinkManager::new("001".into(), "hub.loom.example".into(), Vec::new())
    }

    #[tokio::test]
    async fn duplicate_sid_registration_fails() {
        let mgr = manager();
        let (tx, _rx) = mpsc::channel(8);
        assert!(mgr.register_peer(server("00A", None), ConnectionId::next(), tx.clone()));
        assert!(!mgr.register_peer(server("00A", None), ConnectionId::next(), tx));
    }

    #[tokio::test]
    async fn routes_via_next_hop() {
        let mgr = manager();
        let (tx, mut rx) = mpsc::channel(8);
        mgr.register_peer(server("00A", None), ConnectionId::next(), tx);
        mgr.topology.insert(server("00B", Some("00A")));

        let msg = Arc::new(Message::new("PING", vec!["001".into()]));
        mgr.send_to_server("00B", msg.clone());
        let routed = rx.try_recv().unwrap();
        assert_eq!(routed.command, "PING");
    }

    #[tokio::test]
    async fn broadcast_skips_origin() {
        let mgr = manager();
        let (tx_a, mut rx_a) = mpsc::channel(8);
        let (tx_b, mut rx_b) = mpsc::channel(8);
        mgr.register_peer(server("00A", None), ConnectionId::next(), tx_a);
        mgr.register_peer(server("00B", None), ConnectionId::next(), tx_b);

        let msg = Arc::new(Message::new("WALLOPS", vec!["hi".into()]));
        mgr.broadcast(msg, Some("00A"));
        assert!(rx_a.try_recv().is_err());
        assert!(rx_b.try_recv().is_ok());
    }
}
