//! Netsplit handling: cascade removal of lost servers and the synthetic
//! QUIT fanout, delivered inside an IRCv3 `batch` for capable clients.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use loom_proto::{CapSet, Message, Prefix};
use tracing::info;
use uuid::Uuid;

use crate::state::uid::ConnectionId;
use crate::state::Fabric;

/// The traditional netsplit quit reason.
const SPLIT_REASON: &str = "*.net *.split";

/// Handle the loss of a direct link (or a received SQUIT): remove the
/// server and everything learned through it, and synthesize QUITs for the
/// remote users that vanished with it.
pub async fn handle_server_loss(fabric: &Arc<Fabric>, lost_sid: &str) {
    let lost_name = fabric
        .links
        .topology
        .get(lost_sid)
        .map(|s| s.name)
        .unwrap_or_else(|| lost_sid.to_string());

    let downstream = fabric.links.topology.downstream_of(lost_sid);
    if downstream.is_empty() {
        return;
    }
    crate::metrics::NETSPLITS.inc();
    info!(
        lost = %lost_name,
        servers = downstream.len(),
        "netsplit: removing server subtree"
    );

    for sid in &downstream {
        fabric.links.topology.remove(sid);
        fabric.links.unregister_peer(sid);
    }
    let downstream: HashSet<&str> = downstream.iter().map(String::as_str).collect();

    // Collect the remote users that just vanished.
    let mut victims: Vec<ConnectionId> = Vec::new();
    for conn in fabric.users.connection_ids() {
        let Some(user_arc) = fabric.users.get(conn) else {
            continue;
        };
        let server = user_arc.read().await.server.clone();
        if downstream.contains(server.as_str()) {
            victims.push(conn);
        }
    }

    // Recipients that will see at least one QUIT, with their batch
    // capability, so the whole split arrives as one `netsplit` batch.
    let mut recipients: HashMap<ConnectionId, bool> = HashMap::new();
    for conn in &victims {
        let Some(user_arc) = fabric.users.get(*conn) else {
            continue;
        };
        let channels: Vec<String> = user_arc.read().await.channels.keys().cloned().collect();
        for name in channels {
            let Some(chan_arc) = fabric.channels.get(&name) else {
                continue;
            };
            let members: Vec<ConnectionId> = {
                let chan = chan_arc.read().await;
                chan.members.keys().copied().collect()
            };
            for member in members {
                if victims.contains(&member) {
                    continue;
                }
                if let std::collections::hash_map::Entry::Vacant(e) = recipients.entry(member) {
                    let has_batch = match fabric.users.get(member) {
                        Some(u) => u.read().await.caps.contains(CapSet::BATCH),
                        None => false,
                    };
                    e.insert(has_batch);
                }
            }
        }
    }

    let batch_ref = Uuid::new_v4().simple().to_string();
    let server_prefix = fabric.server_prefix();

    let batch_start = Arc::new(Message::with_prefix(
        server_prefix.clone(),
        "BATCH",
        vec![
            format!("+{batch_ref}"),
            "netsplit".to_string(),
            fabric.server_info.name.clone(),
            lost_name.clone(),
        ],
    ));
    for (conn, has_batch) in &recipients {
        if *has_batch {
            fabric.broker.send_to_connection(*conn, &batch_start);
        }
    }

    // One QUIT per victim per common-channel member; the broker
    // deduplicates across the victim's channels and strips the batch tag
    // for clients without the capability.
    for conn in &victims {
        let Some(user_arc) = fabric.users.get(*conn) else {
            continue;
        };
        let (nick, user, host, channels) = {
            let u = user_arc.read().await;
            (
                u.nick.clone(),
                u.user.clone(),
                u.host.clone(),
                u.channels.keys().cloned().collect::<Vec<_>>(),
            )
        };

        let mut quit = Message::with_prefix(
            Prefix::new(nick, user, host),
            "QUIT",
            vec![SPLIT_REASON.to_string()],
        );
        quit.set_tag("batch", Some(batch_ref.clone()));
        let quit = Arc::new(quit);
        fabric
            .broker
            .send_to_channels(channels.iter(), &quit, Some(*conn))
            .await;

        // Silent removal: the QUIT above already covered the fanout.
        remove_remote_user_silently(fabric, *conn).await;
    }

    let batch_end = Arc::new(Message::with_prefix(
        server_prefix,
        "BATCH",
        vec![format!("-{batch_ref}")],
    ));
    for (conn, has_batch) in &recipients {
        if *has_batch {
            fabric.broker.send_to_connection(*conn, &batch_end);
        }
    }

    info!(lost = %lost_name, users = victims.len(), "netsplit complete");
}

/// Remove a remote user's record and memberships without any fanout.
async fn remove_remote_user_silently(fabric: &Arc<Fabric>, conn: ConnectionId) {
    let Some(user_arc) = fabric.users.get(conn) else {
        return;
    };
    let channels: Vec<String> = user_arc.read().await.channels.keys().cloned().collect();
    for name in &channels {
        if let Some(chan_arc) = fabric.channels.get(name) {
            let mut chan = chan_arc.write().await;
            chan.members.remove(&conn);
            chan.invited.remove(&conn);
        }
        fabric.channels.remove_if_dead(name).await;
    }
    fabric.users.remove(conn).await;
}
