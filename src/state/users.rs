//! User repository: the authoritative store of connected users with its
//! secondary indexes.
//!
//! Index discipline: the nickname index maps folded nick → ConnectionId and
//! must always agree with the user record; mutations go through the claim/
//! release methods so the check is a single place. Detected divergence is a
//! bug: fatal in debug builds, repaired and counted in release.

use std::collections::VecDeque;
use std::sync::Arc;

use dashmap::DashMap;
use loom_proto::irc_to_lower;
use tokio::sync::RwLock;
use tracing::error;

use crate::state::uid::ConnectionId;
use crate::state::user::{User, WhowasEntry};

/// Retained WHOWAS entries per folded nickname.
const WHOWAS_DEPTH: usize = 8;

/// The user store.
#[derive(Debug, Default)]
pub struct UserRepository {
    /// Primary records.
    users: DashMap<ConnectionId, Arc<RwLock<User>>>,
    /// Folded nickname → owner.
    nicks: DashMap<String, ConnectionId>,
    /// UID → owner (S2S routing).
    uids: DashMap<String, ConnectionId>,
    /// WHOWAS history, newest first.
    whowas: DashMap<String, VecDeque<WhowasEntry>>,
}

impl UserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new user record, claiming its nickname (if set) and UID.
    ///
    /// The nickname must have been reserved via [`claim_nick`] beforehand
    /// for local registrations; remote introductions insert directly after
    /// collision resolution.
    ///
    /// [`claim_nick`]: UserRepository::claim_nick
    pub fn insert(&self, user: User) -> Arc<RwLock<User>> {
        let conn_id = user.conn_id;
        if !user.nick.is_empty() {
            self.nicks.insert(irc_to_lower(&user.nick), conn_id);
        }
        self.uids.insert(user.uid.clone(), conn_id);
        let arc = Arc::new(RwLock::new(user));
        self.users.insert(conn_id, arc.clone());
        arc
    }

    pub fn get(&self, conn_id: ConnectionId) -> Option<Arc<RwLock<User>>> {
        self.users.get(&conn_id).map(|e| e.value().clone())
    }

    /// Look up by nickname, case-insensitively.
    pub fn get_by_nick(&self, nick: &str) -> Option<(ConnectionId, Arc<RwLock<User>>)> {
        let conn_id = *self.nicks.get(&irc_to_lower(nick))?;
        self.get(conn_id).map(|u| (conn_id, u))
    }

    /// Owner of a nickname, if taken.
    pub fn nick_owner(&self, nick: &str) -> Option<ConnectionId> {
        self.nicks.get(&irc_to_lower(nick)).map(|e| *e)
    }

    pub fn get_by_uid(&self, uid: &str) -> Option<(ConnectionId, Arc<RwLock<User>>)> {
        let conn_id = *self.uids.get(uid)?;
        self.get(conn_id).map(|u| (conn_id, u))
    }

    /// Atomically claim a nickname for a connection. Returns false when the
    /// fold is already owned by someone else; claiming one's own nick (a
    /// case-only change) succeeds.
    pub fn claim_nick(&self, nick: &str, conn_id: ConnectionId) -> bool {
        let folded = irc_to_lower(nick);
        match self.nicks.entry(folded) {
            dashmap::mapref::entry::Entry::Occupied(e) => *e.get() == conn_id,
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(conn_id);
                true
            }
        }
    }

    /// Release a nickname if this connection owns it.
    pub fn release_nick(&self, nick: &str, conn_id: ConnectionId) {
        let folded = irc_to_lower(nick);
        self.nicks.remove_if(&folded, |_, owner| *owner == conn_id);
    }

    /// Remove a user entirely, clearing every index.
    pub async fn remove(&self, conn_id: ConnectionId) -> Option<Arc<RwLock<User>>> {
        let (_, arc) = self.users.remove(&conn_id)?;
        let (nick, uid) = {
            let user = arc.read().await;
            (user.nick.clone(), user.uid.clone())
        };
        if !nick.is_empty() {
            self.release_nick(&nick, conn_id);
        }
        self.uids.remove_if(&uid, |_, owner| *owner == conn_id);
        Some(arc)
    }

    /// Number of user records (local and remote).
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    /// Snapshot of all connection ids.
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.users.iter().map(|e| *e.key()).collect()
    }

    /// Record a departed user for WHOWAS.
    pub fn record_whowas(&self, entry: WhowasEntry) {
        let mut history = self
            .whowas
            .entry(irc_to_lower(&entry.nick))
            .or_default();
        history.push_front(entry);
        history.truncate(WHOWAS_DEPTH);
    }

    /// WHOWAS history for a nickname, newest first.
    pub fn whowas(&self, nick: &str) -> Vec<WhowasEntry> {
        self.whowas
            .get(&irc_to_lower(nick))
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Check the nickname-index invariant for one user and repair drift.
    ///
    /// Call after any mutation path that touched both the record and the
    /// index.
    pub fn assert_nick_index(&self, conn_id: ConnectionId, nick: &str) {
        let folded = irc_to_lower(nick);
        let indexed = self.nicks.get(&folded).map(|e| *e);
        debug_assert_eq!(
            indexed,
            Some(conn_id),
            "nick index diverged for {nick} ({conn_id})"
        );
        if indexed != Some(conn_id) {
            error!(nick = %nick, conn = %conn_id, "nick index diverged, repairing");
            crate::metrics::INVARIANT_REPAIRS.inc();
            self.nicks.insert(folded, conn_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::user::UserModes;
    use std::collections::HashMap;

    fn test_user(conn_id: ConnectionId, nick: &str, uid: &str) -> User {
        User {
            conn_id,
            uid: uid.to_string(),
            nick: nick.to_string(),
            user: "u".into(),
            realname: "r".into(),
            ip: "127.0.0.1".parse().unwrap(),
            host: "localhost".into(),
            server: "001".into(),
            account: None,
            away: None,
            certfp: None,
            caps: Default::default(),
            modes: UserModes::default(),
            channels: HashMap::new(),
            connected_at: 0,
            last_activity: 0,
        }
    }

    #[tokio::test]
    async fn insert_and_lookup_by_nick_fold() {
        let repo = UserRepository::new();
        let conn = ConnectionId::next();
        repo.insert(test_user(conn, "Alice", "001AAAAAA"));

        let (found, user) = repo.get_by_nick("ALICE").unwrap();
        assert_eq!(found, conn);
        assert_eq!(user.read().await.nick, "Alice");
        assert!(repo.get_by_uid("001AAAAAA").is_some());
    }

    #[tokio::test]
    async fn claim_is_exclusive() {
        let repo = UserRepository::new();
        let a = ConnectionId::next();
        let b = ConnectionId::next();

        assert!(repo.claim_nick("Bob", a));
        assert!(!repo.claim_nick("bob", b));
        // Re-claim by the owner (case change) is fine.
        assert!(repo.claim_nick("BOB", a));

        repo.release_nick("bob", b); // not the owner: no-op
        assert_eq!(repo.nick_owner("Bob"), Some(a));
        repo.release_nick("Bob", a);
        assert!(repo.nick_owner("Bob").is_none());
    }

    #[tokio::test]
    async fn remove_clears_indexes() {
        let repo = UserRepository::new();
        let conn = ConnectionId::next();
        repo.insert(test_user(conn, "Carol", "001AAAAAB"));

        repo.remove(conn).await.unwrap();
        assert!(repo.get(conn).is_none());
        assert!(repo.get_by_nick("carol").is_none());
        assert!(repo.get_by_uid("001AAAAAB").is_none());
    }

    #[test]
    fn whowas_is_capped_and_newest_first() {
        let repo = UserRepository::new();
        for i in 0..12 {
            repo.record_whowas(WhowasEntry {
                nick: "Dana".into(),
                user: format!("u{i}"),
                host: "h".into(),
                realname: "r".into(),
                server: "s".into(),
                logout_time: i,
            });
        }
        let history = repo.whowas("DANA");
        assert_eq!(history.len(), 8);
        assert_eq!(history[0].logout_time, 11);
    }
}
