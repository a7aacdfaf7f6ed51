//! Network topology: the spanning tree of linked servers.

use std::collections::HashSet;

use dashmap::DashMap;

/// 3-character server identifier.
pub type Sid = String;

/// A server known to the network.
#[derive(Debug, Clone)]
pub struct LinkedServer {
    pub sid: Sid,
    pub name: String,
    pub description: String,
    pub version: String,
    pub hop_count: u32,
    /// The direct peer we learned this server from; `None` for direct
    /// links and ourselves.
    pub learned_from: Option<Sid>,
}

/// The SID → server table with next-hop routing.
#[derive(Debug, Default)]
pub struct Topology {
    servers: DashMap<Sid, LinkedServer>,
}

impl Topology {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a server. Returns false when the SID is already present —
    /// a duplicate introduction, which is a fatal link error for the
    /// introducing peer.
    pub fn insert(&self, server: LinkedServer) -> bool {
        match self.servers.entry(server.sid.clone()) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(e) => {
                e.insert(server);
                true
            }
        }
    }

    pub fn get(&self, sid: &str) -> Option<LinkedServer> {
        self.servers.get(sid).map(|e| e.clone())
    }

    pub fn contains(&self, sid: &str) -> bool {
        self.servers.contains_key(sid)
    }

    /// Find a server by name.
    pub fn get_by_name(&self, name: &str) -> Option<LinkedServer> {
        self.servers
            .iter()
            .find(|e| e.name.eq_ignore_ascii_case(name))
            .map(|e| e.clone())
    }

    /// The direct peer to route through for `target`: walk `learned_from`
    /// up to a server with none (a direct link).
    pub fn next_hop(&self, target: &str) -> Option<Sid> {
        let mut current = self.get(target)?;
        let mut guard = 0;
        while let Some(via) = current.learned_from.clone() {
            current = self.get(&via)?;
            // A topology cycle would be an invariant violation; bail out
            // rather than spin.
            guard += 1;
            if guard > 64 {
                return None;
            }
        }
        Some(current.sid)
    }

    /// The target SID and every SID that routes through it, recursively.
    /// Used for netsplit cleanup.
    pub fn downstream_of(&self, target: &str) -> Vec<Sid> {
        let mut result = Vec::new();
        let mut to_process = vec![target.to_string()];
        let mut processed = HashSet::new();

        while let Some(current) = to_process.pop() {
            if !processed.insert(current.clone()) {
                continue;
            }
            result.push(current.clone());

            for entry in self.servers.iter() {
                if entry.learned_from.as_deref() == Some(current.as_str())
                    && !processed.contains(&entry.sid)
                {
                    to_process.push(entry.sid.clone());
                }
            }
        }

        result
    }

    pub fn remove(&self, sid: &str) -> Option<LinkedServer> {
        self.servers.remove(sid).map(|(_, v)| v)
    }

    pub fn all(&self) -> Vec<LinkedServer> {
        self.servers.iter().map(|e| e.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(sid: &str, via: Option<&str>, hops: u32) -> LinkedServer {
        LinkedServer {
            sid: sid.into(),
            name: format!("srv-{sid}.example"),
            description: String::new(),
            version: "loom-0.9".into(),
            hop_count: hops,
            learned_from: via.map(Into::into),
        }
    }

    #[test]
    fn duplicate_sid_rejected() {
        let topo = Topology::new();
        assert!(topo.insert(server("00A", None, 1)));
        assert!(!topo.insert(server("00A", None, 1)));
    }

    #[test]
    fn next_hop_walks_to_direct_link() {
        // us -> A -> B -> C
        let topo = Topology::new();
        topo.insert(server("00A", None, 1));
        topo.insert(server("00B", Some("00A"), 2));
        topo.insert(server("00C", Some("00B"), 3));

        assert_eq!(topo.next_hop("00C"), Some("00A".to_string()));
        assert_eq!(topo.next_hop("00B"), Some("00A".to_string()));
        assert_eq!(topo.next_hop("00A"), Some("00A".to_string()));
        assert_eq!(topo.next_hop("0ZZ"), None);
    }

    #[test]
    fn downstream_cascade_linear() {
        let topo = Topology::new();
        topo.insert(server("00A", None, 1));
        topo.insert(server("00B", Some("00A"), 2));
        topo.insert(server("00C", Some("00B"), 3));

        let downstream = topo.downstream_of("00A");
        assert_eq!(downstream.len(), 3);
        for sid in ["00A", "00B", "00C"] {
            assert!(downstream.contains(&sid.to_string()));
        }
    }

    #[test]
    fn downstream_cascade_tree() {
        // A -> B, A -> C, D direct
        let topo = Topology::new();
        topo.insert(server("00A", None, 1));
        topo.insert(server("00B", Some("00A"), 2));
        topo.insert(server("00C", Some("00A"), 2));
        topo.insert(server("00D", None, 1));

        let downstream = topo.downstream_of("00A");
        assert_eq!(downstream.len(), 3);
        assert!(!downstream.contains(&"00D".to_string()));
    }
}
