//! Link connection tasks: outbound connectors, the inbound S2S listener,
//! the handshake, and the per-link event loop.
//!
//! Handshake wire form (both directions):
//!
//! ```text
//! PASS <password> TS 6 :<sid>
//! SERVER <name> 1 :<description>
//! ```
//!
//! The acceptor validates the claimed SID against its configured link
//! blocks with a constant-time password comparison, refuses juped names
//! and duplicate SIDs, then both sides exchange state bursts.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use loom_proto::{LineCodec, Message};
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tracing::{info, warn};

use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::links::manager::LINK_QUEUE_DEPTH;
use crate::links::topology::LinkedServer;
use crate::links::{burst, handlers, protocol, split};
use crate::state::uid::ConnectionId;
use crate::state::Fabric;

/// Delay between autoconnect attempts.
const RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Link keepalive interval.
const LINK_PING_INTERVAL: Duration = Duration::from_secs(60);

/// What the peer claimed during its hello.
struct PeerHello {
    password: String,
    sid: String,
    name: String,
    description: String,
}

/// Spawn outbound connectors for every autoconnect link block.
pub fn spawn_outbound_links(fabric: &Arc<Fabric>) {
    for link in fabric.config.links.clone() {
        if !link.autoconnect {
            continue;
        }
        let fabric = fabric.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = fabric.shutdown_tx.subscribe();
            loop {
                if fabric.links.is_direct(&link.sid) {
                    tokio::time::sleep(RECONNECT_DELAY).await;
                    continue;
                }
                tokio::select! {
                    outcome = connect_outbound(&fabric, &link) => {
                        if let Err(e) = outcome {
                            warn!(peer = %link.name, error = %e, "link attempt failed");
                        }
                        tokio::time::sleep(RECONNECT_DELAY).await;
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }
}

/// Spawn the inbound S2S listener, when configured.
pub fn spawn_inbound_listener(fabric: &Arc<Fabric>) {
    let Some(listen) = fabric.config.s2s_listen.clone() else {
        return;
    };
    let fabric = fabric.clone();
    tokio::spawn(async move {
        let listener = match TcpListener::bind(&listen.addr).await {
            Ok(l) => {
                info!(addr = %listen.addr, "S2S listening");
                l
            }
            Err(e) => {
                warn!(addr = %listen.addr, error = %e, "failed to bind S2S listener");
                return;
            }
        };

        let mut shutdown_rx = fabric.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let Ok((stream, addr)) = accepted else { continue };
                    info!(peer = %addr, "inbound S2S connection");
                    let fabric = fabric.clone();
                    tokio::spawn(async move {
                        let framed = Framed::new(stream, LineCodec::new());
                        if let Err(e) = run_link(&fabric, framed, false, None).await {
                            warn!(peer = %addr, error = %e, "inbound link ended with error");
                        }
                    });
                }
                _ = shutdown_rx.recv() => break,
            }
        }
    });
}

async fn connect_outbound(fabric: &Arc<Fabric>, link: &LinkConfig) -> Result<(), LinkError> {
    let addr = link
        .addr
        .clone()
        .unwrap_or_else(|| format!("{}:{}", link.name, link.port));
    info!(peer = %link.name, addr = %addr, "connecting link");

    let stream = TcpStream::connect(&addr).await?;

    if link.tls {
        let connector = crate::network::build_connector()
            .map_err(|e| LinkError::Protocol(e.to_string()))?;
        let host = addr.split(':').next().unwrap_or(&addr);
        let name = crate::network::server_name(host)
            .map_err(|e| LinkError::Protocol(e.to_string()))?;
        let tls = connector.connect(name, stream).await?;
        let framed = Framed::new(tls, LineCodec::new());
        run_link(fabric, framed, true, Some(link.clone())).await
    } else {
        let framed = Framed::new(stream, LineCodec::new());
        run_link(fabric, framed, true, Some(link.clone())).await
    }
}

/// Read the peer's PASS + SERVER hello.
async fn read_hello<S>(framed: &mut Framed<S, LineCodec>) -> Result<PeerHello, LinkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut password = None;
    let mut server = None;

    while server.is_none() {
        let msg = tokio::time::timeout(Duration::from_secs(30), framed.next())
            .await
            .map_err(|_| LinkError::HandshakeRejected("handshake timeout".into()))?
            .ok_or_else(|| LinkError::HandshakeRejected("peer closed during handshake".into()))??;

        match msg.command.as_str() {
            "PASS" => {
                if msg.params.len() < 4 || msg.params[1] != "TS" || msg.params[2] != "6" {
                    return Err(LinkError::HandshakeRejected("unsupported PASS form".into()));
                }
                password = Some((msg.params[0].clone(), msg.params[3].clone()));
            }
            "SERVER" => {
                if password.is_none() {
                    return Err(LinkError::HandshakeRejected("SERVER before PASS".into()));
                }
                server = Some((
                    msg.params.first().cloned().unwrap_or_default(),
                    msg.params.get(2).cloned().unwrap_or_default(),
                ));
            }
            "ERROR" => {
                return Err(LinkError::HandshakeRejected(
                    msg.param(0).unwrap_or("peer error").to_string(),
                ));
            }
            _ => {}
        }
    }

    let (password, sid) = password.expect("set before server");
    let (name, description) = server.expect("loop exit condition");
    Ok(PeerHello {
        password,
        sid,
        name,
        description,
    })
}

fn validate_hello(fabric: &Arc<Fabric>, hello: &PeerHello) -> Result<(), LinkError> {
    let Some(block) = fabric.links.block_for(&hello.sid) else {
        return Err(LinkError::HandshakeRejected(format!(
            "no link block for sid {}",
            hello.sid
        )));
    };

    let pass_ok = block.password.len() == hello.password.len()
        && block
            .password
            .as_bytes()
            .ct_eq(hello.password.as_bytes())
            .unwrap_u8()
            == 1;
    if !pass_ok {
        return Err(LinkError::HandshakeRejected("bad link password".into()));
    }

    if fabric.server_bans.find_jupe(&hello.name).is_some() {
        return Err(LinkError::HandshakeRejected(format!(
            "server {} is juped",
            hello.name
        )));
    }
    if hello.sid == fabric.server_info.sid || fabric.links.topology.contains(&hello.sid) {
        return Err(LinkError::DuplicateSid(hello.sid.clone()));
    }
    Ok(())
}

/// Drive an established (or connecting) link to completion.
async fn run_link<S>(
    fabric: &Arc<Fabric>,
    mut framed: Framed<S, LineCodec>,
    outbound: bool,
    expected: Option<LinkConfig>,
) -> Result<(), LinkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let info = &fabric.server_info;

    // Outbound speaks first; inbound answers after validating.
    if outbound {
        let link = expected.as_ref().expect("outbound links carry their block");
        framed
            .send(protocol::pass_line(&link.password, &info.sid))
            .await?;
        framed
            .send(protocol::server_line(&info.name, &info.description))
            .await?;
    }

    let hello = read_hello(&mut framed).await?;
    if let Err(e) = validate_hello(fabric, &hello) {
        let _ = framed
            .send(Message::new("ERROR", vec![e.to_string()]))
            .await;
        return Err(e);
    }
    if let Some(link) = &expected {
        if hello.sid != link.sid {
            let e = LinkError::HandshakeRejected(format!(
                "peer claimed sid {} but block says {}",
                hello.sid, link.sid
            ));
            let _ = framed
                .send(Message::new("ERROR", vec![e.to_string()]))
                .await;
            return Err(e);
        }
    }

    if !outbound {
        let block = fabric
            .links
            .block_for(&hello.sid)
            .expect("validated above");
        framed
            .send(protocol::pass_line(&block.password, &info.sid))
            .await?;
        framed
            .send(protocol::server_line(&info.name, &info.description))
            .await?;
    }

    // Register the peer; duplicate SIDs are fatal for this link.
    let (tx, mut rx) = mpsc::channel::<Arc<Message>>(LINK_QUEUE_DEPTH);
    let conn_id = ConnectionId::next();
    let registered = fabric.links.register_peer(
        LinkedServer {
            sid: hello.sid.clone(),
            name: hello.name.clone(),
            description: hello.description.clone(),
            version: String::new(),
            hop_count: 1,
            learned_from: None,
        },
        conn_id,
        tx.clone(),
    );
    if !registered {
        let e = LinkError::DuplicateSid(hello.sid.clone());
        let _ = framed
            .send(Message::new("ERROR", vec![e.to_string()]))
            .await;
        return Err(e);
    }

    info!(peer = %hello.name, sid = %hello.sid, "server linked");

    // Announce the new server to the rest of our side.
    fabric.links.broadcast(
        Arc::new(protocol::sid_intro(
            &info.sid,
            &LinkedServer {
                sid: hello.sid.clone(),
                name: hello.name.clone(),
                description: hello.description.clone(),
                version: String::new(),
                hop_count: 2,
                learned_from: Some(info.sid.clone()),
            },
        )),
        Some(&hello.sid),
    );

    // Burst concurrently with the event loop so a large state dump cannot
    // deadlock against the bounded queue.
    {
        let fabric = fabric.clone();
        let sid = hello.sid.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            burst::send_burst(&fabric, &sid, &tx).await;
        });
    }

    let peer_sid = hello.sid.clone();
    let mut ping_tick = tokio::time::interval(LINK_PING_INTERVAL);
    ping_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let outcome: Result<(), LinkError> = loop {
        tokio::select! {
            inbound = framed.next() => {
                match inbound {
                    Some(Ok(msg)) => {
                        if let Err(e) = handlers::handle_link_message(fabric, &peer_sid, msg).await {
                            break Err(e);
                        }
                    }
                    Some(Err(e)) => break Err(e.into()),
                    None => break Ok(()),
                }
            }
            outbound_msg = rx.recv() => {
                match outbound_msg {
                    Some(msg) => {
                        if let Err(e) = framed.send((*msg).clone()).await {
                            break Err(e.into());
                        }
                    }
                    None => break Ok(()),
                }
            }
            _ = ping_tick.tick() => {
                let ping = protocol::link_ping(&info.sid, &info.name);
                if framed.send(ping).await.is_err() {
                    break Ok(());
                }
            }
        }
    };

    if let Err(e) = &outcome {
        let _ = framed
            .send(Message::new("ERROR", vec![e.to_string()]))
            .await;
    }

    // The split cascade removes this server, everything behind it, and
    // its users; remaining peers learn via SQUIT.
    split::handle_server_loss(fabric, &peer_sid).await;
    fabric.links.broadcast(
        Arc::new(protocol::squit(&peer_sid, "link closed")),
        None,
    );

    info!(peer = %hello.name, sid = %peer_sid, "server delinked");
    outcome
}
