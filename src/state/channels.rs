//! Channel repository.

use std::sync::Arc;

use dashmap::DashMap;
use loom_proto::irc_to_lower;
use tokio::sync::RwLock;

use crate::state::channel::Channel;

/// The channel store, keyed by folded channel name.
#[derive(Debug, Default)]
pub struct ChannelRepository {
    channels: DashMap<String, Arc<RwLock<Channel>>>,
}

impl ChannelRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<RwLock<Channel>>> {
        self.channels.get(&irc_to_lower(name)).map(|e| e.value().clone())
    }

    /// Fetch a channel, creating it lazily on first JOIN. Returns the
    /// channel and whether it was created by this call.
    pub fn get_or_create(&self, name: &str, now: i64) -> (Arc<RwLock<Channel>>, bool) {
        let folded = irc_to_lower(name);
        let mut created = false;
        let arc = self
            .channels
            .entry(folded)
            .or_insert_with(|| {
                created = true;
                crate::metrics::ACTIVE_CHANNELS.inc();
                Arc::new(RwLock::new(Channel::new(name, now)))
            })
            .clone();
        (arc, created)
    }

    /// Drop a channel outright (S2S collision cleanup).
    pub fn remove(&self, name: &str) -> Option<Arc<RwLock<Channel>>> {
        let removed = self.channels.remove(&irc_to_lower(name)).map(|(_, v)| v);
        if removed.is_some() {
            crate::metrics::ACTIVE_CHANNELS.dec();
        }
        removed
    }

    /// Drop the channel if it has no members and is not registered.
    /// Returns true when the channel was destroyed.
    pub async fn remove_if_dead(&self, name: &str) -> bool {
        let folded = irc_to_lower(name);
        let Some(arc) = self.channels.get(&folded).map(|e| e.value().clone()) else {
            return false;
        };
        let dead = {
            let chan = arc.read().await;
            chan.members.is_empty() && !chan.is_registered()
        };
        if dead && self.channels.remove(&folded).is_some() {
            crate::metrics::ACTIVE_CHANNELS.dec();
            return true;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Snapshot of all channels, for LIST and S2S bursts.
    pub fn snapshot(&self) -> Vec<Arc<RwLock<Channel>>> {
        self.channels.iter().map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::channel::{ChannelModes, Member, MemberModes};
    use crate::state::uid::ConnectionId;

    #[tokio::test]
    async fn create_is_lazy_and_case_insensitive() {
        let repo = ChannelRepository::new();
        let (a, created) = repo.get_or_create("#Dev", 1);
        assert!(created);
        let (b, created) = repo.get_or_create("#DEV", 2);
        assert!(!created);
        assert!(Arc::ptr_eq(&a, &b));
        // Case of first creation is preserved.
        assert_eq!(a.read().await.name, "#Dev");
    }

    #[tokio::test]
    async fn dead_channel_is_removed_registered_survives() {
        let repo = ChannelRepository::new();
        let (chan, _) = repo.get_or_create("#dev", 0);
        assert!(repo.remove_if_dead("#dev").await);
        assert!(repo.get("#dev").is_none());

        let (chan2, _) = repo.get_or_create("#home", 0);
        chan2.write().await.modes |= ChannelModes::REGISTERED;
        assert!(!repo.remove_if_dead("#home").await);
        assert!(repo.get("#home").is_some());
        drop(chan);
    }

    #[tokio::test]
    async fn occupied_channel_not_removed() {
        let repo = ChannelRepository::new();
        let (chan, _) = repo.get_or_create("#dev", 0);
        chan.write().await.members.insert(
            ConnectionId::next(),
            Member {
                nick: "alice".into(),
                joined_at: 0,
                modes: MemberModes::default(),
            },
        );
        assert!(!repo.remove_if_dead("#dev").await);
    }
}
