//! Server-level bans (K-line, G-line, Z-line, Jupe).

use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use ipnet::IpNet;
use loom_proto::wildcard_match;

/// Ban class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanKind {
    /// Local `user@host` ban.
    KLine,
    /// Network-wide `user@host` ban.
    GLine,
    /// IP or CIDR ban, checked at accept before any handshake.
    ZLine,
    /// Refuse a server name from linking.
    Jupe,
}

impl BanKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BanKind::KLine => "K-line",
            BanKind::GLine => "G-line",
            BanKind::ZLine => "Z-line",
            BanKind::Jupe => "Jupe",
        }
    }
}

/// One server ban. Active iff not expired and not removed.
#[derive(Debug, Clone)]
pub struct ServerBan {
    pub id: u64,
    pub kind: BanKind,
    /// `user@host` for K/G-lines, IP or CIDR for Z-lines, server name for
    /// jupes.
    pub pattern: String,
    pub reason: String,
    pub set_by: String,
    pub created_at: i64,
    /// Unix timestamp; `None` is permanent.
    pub expires_at: Option<i64>,
}

impl ServerBan {
    fn is_active(&self, now: i64) -> bool {
        self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// In-memory server-ban store.
#[derive(Debug, Default)]
pub struct ServerBanRepo {
    bans: DashMap<u64, ServerBan>,
    next_id: AtomicU64,
}

impl ServerBanRepo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a ban; returns its id.
    pub fn add(
        &self,
        kind: BanKind,
        pattern: &str,
        reason: &str,
        set_by: &str,
        expires_at: Option<i64>,
    ) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.bans.insert(
            id,
            ServerBan {
                id,
                kind,
                pattern: pattern.to_string(),
                reason: reason.to_string(),
                set_by: set_by.to_string(),
                created_at: chrono::Utc::now().timestamp(),
                expires_at,
            },
        );
        id
    }

    /// Remove bans of a kind matching a pattern exactly. Returns how many
    /// were removed.
    pub fn remove(&self, kind: BanKind, pattern: &str) -> usize {
        let victims: Vec<u64> = self
            .bans
            .iter()
            .filter(|e| e.kind == kind && e.pattern.eq_ignore_ascii_case(pattern))
            .map(|e| e.id)
            .collect();
        for id in &victims {
            self.bans.remove(id);
        }
        victims.len()
    }

    /// First active ban matching this client identity, if any. Z-lines
    /// match the address, K/G-lines the `user@host` pair.
    pub fn lookup_matching(&self, ip: IpAddr, host: &str, user: &str) -> Option<ServerBan> {
        let now = chrono::Utc::now().timestamp();
        let userhost = format!("{user}@{host}");
        let userip = format!("{user}@{ip}");

        self.bans.iter().find_map(|entry| {
            let ban = entry.value();
            if !ban.is_active(now) {
                return None;
            }
            let hit = match ban.kind {
                BanKind::ZLine => ip_matches(&ban.pattern, ip),
                BanKind::KLine | BanKind::GLine => {
                    wildcard_match(&ban.pattern, &userhost)
                        || wildcard_match(&ban.pattern, &userip)
                }
                BanKind::Jupe => false,
            };
            hit.then(|| ban.clone())
        })
    }

    /// Active jupe for a server name, if any.
    pub fn find_jupe(&self, server: &str) -> Option<ServerBan> {
        let now = chrono::Utc::now().timestamp();
        self.bans.iter().find_map(|entry| {
            let ban = entry.value();
            (ban.kind == BanKind::Jupe
                && ban.is_active(now)
                && wildcard_match(&ban.pattern, server))
            .then(|| ban.clone())
        })
    }

    /// Drop expired bans; returns how many were removed.
    pub fn prune_expired(&self) -> usize {
        let now = chrono::Utc::now().timestamp();
        let before = self.bans.len();
        self.bans.retain(|_, ban| ban.is_active(now));
        let removed = before - self.bans.len();
        for _ in 0..removed {
            crate::metrics::BANS_EXPIRED.inc();
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.bans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bans.is_empty()
    }
}

fn ip_matches(pattern: &str, ip: IpAddr) -> bool {
    if let Ok(net) = pattern.parse::<IpNet>() {
        return net.contains(&ip);
    }
    if let Ok(exact) = pattern.parse::<IpAddr>() {
        return exact == ip;
    }
    wildcard_match(pattern, &ip.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kline_matches_user_at_host() {
        let repo = ServerBanRepo::new();
        repo.add(BanKind::KLine, "*@evil.host", "begone", "oper", None);

        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        assert!(repo.lookup_matching(ip, "evil.host", "anyone").is_some());
        assert!(repo.lookup_matching(ip, "nice.host", "anyone").is_none());
    }

    #[test]
    fn zline_matches_cidr_and_exact() {
        let repo = ServerBanRepo::new();
        repo.add(BanKind::ZLine, "203.0.113.0/24", "bad net", "oper", None);
        repo.add(BanKind::ZLine, "198.51.100.7", "bad host", "oper", None);

        assert!(repo
            .lookup_matching("203.0.113.200".parse().unwrap(), "h", "u")
            .is_some());
        assert!(repo
            .lookup_matching("198.51.100.7".parse().unwrap(), "h", "u")
            .is_some());
        assert!(repo
            .lookup_matching("192.0.2.1".parse().unwrap(), "h", "u")
            .is_none());
    }

    #[test]
    fn expiry_deactivates_and_prunes() {
        let repo = ServerBanRepo::new();
        let past = chrono::Utc::now().timestamp() - 10;
        repo.add(BanKind::KLine, "*@old.host", "expired", "oper", Some(past));

        let ip: IpAddr = "203.0.113.5".parse().unwrap();
        assert!(repo.lookup_matching(ip, "old.host", "u").is_none());
        assert_eq!(repo.prune_expired(), 1);
        assert!(repo.is_empty());
    }

    #[test]
    fn remove_by_pattern() {
        let repo = ServerBanRepo::new();
        repo.add(BanKind::GLine, "*@spam.net", "spam", "oper", None);
        assert_eq!(repo.remove(BanKind::GLine, "*@SPAM.net"), 1);
        assert_eq!(repo.remove(BanKind::GLine, "*@spam.net"), 0);
    }

    #[test]
    fn jupe_lookup() {
        let repo = ServerBanRepo::new();
        repo.add(BanKind::Jupe, "bad.server.*", "rogue", "oper", None);
        assert!(repo.find_jupe("bad.server.example").is_some());
        assert!(repo.find_jupe("good.server.example").is_none());
    }
}
