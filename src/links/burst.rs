//! Netjoin burst: describe our side of the network to a freshly linked
//! peer — known servers, users, channels with members, and topics.

use std::sync::Arc;

use loom_proto::Message;
use tokio::sync::mpsc;

use crate::links::protocol;
use crate::state::Fabric;

/// Send the full state burst down a new link. The peer applies the same
/// collision rules as live traffic, so a crossed burst converges.
pub async fn send_burst(fabric: &Arc<Fabric>, peer_sid: &str, tx: &mpsc::Sender<Arc<Message>>) {
    let local_sid = &fabric.server_info.sid;

    // Servers behind us (everything we know except the new peer itself).
    for server in fabric.links.topology.all() {
        if server.sid == peer_sid {
            continue;
        }
        let _ = tx
            .send(Arc::new(protocol::sid_intro(local_sid, &server)))
            .await;
    }

    // Users. Remote ones are introduced as learned, with their own SIDs in
    // the prefix, so the peer routes replies correctly.
    for conn in fabric.users.connection_ids() {
        let Some(user_arc) = fabric.users.get(conn) else {
            continue;
        };
        let user = user_arc.read().await;
        if user.nick.is_empty() {
            continue;
        }
        let _ = tx
            .send(Arc::new(protocol::uid_introduction(&user)))
            .await;
        if user.away.is_some() {
            let _ = tx
                .send(Arc::new(protocol::away_change(
                    &user.uid,
                    user.away.as_deref(),
                )))
                .await;
        }
    }

    // Channels: SJOIN with the full member roster, then topics.
    for chan_arc in fabric.channels.snapshot() {
        let chan = chan_arc.read().await;
        if chan.members.is_empty() || !protocol::crosses_links(&chan.name) {
            continue;
        }

        let mut members = Vec::with_capacity(chan.members.len());
        for (conn, member) in &chan.members {
            let Some(user_arc) = fabric.users.get(*conn) else {
                continue;
            };
            let uid = user_arc.read().await.uid.clone();
            members.push((member.modes.all_prefix_chars(), uid));
        }

        let (letters, args) = chan.mode_string(true);
        let _ = tx
            .send(Arc::new(protocol::sjoin(
                local_sid,
                chan.created_at,
                &chan.name,
                &letters,
                &args,
                &members,
            )))
            .await;

        if let Some(topic) = &chan.topic {
            let _ = tx
                .send(Arc::new(protocol::topic_burst(
                    local_sid,
                    &chan.name,
                    topic.set_at,
                    &topic.set_by,
                    &topic.text,
                )))
                .await;
        }
    }
}
