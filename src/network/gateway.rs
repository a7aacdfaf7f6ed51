//! Accept gateway: listeners, admission control, DNSBL, Z-lines, TLS.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, info, warn};

use crate::config::ListenConfig;
use crate::handlers::Registry;
use crate::network::connection::Connection;
use crate::security::certfp;
use crate::security::dnsbl::DnsblAction;
use crate::state::uid::ConnectionId;
use crate::state::Fabric;

/// The accept gateway. One bound listener per `[[listen]]` block.
pub struct Gateway {
    listeners: Vec<(TcpListener, bool)>,
    acceptor: Option<TlsAcceptor>,
    fabric: Arc<Fabric>,
    registry: Arc<Registry>,
}

impl Gateway {
    /// Bind every configured listener.
    pub async fn bind(fabric: Arc<Fabric>, registry: Arc<Registry>) -> anyhow::Result<Gateway> {
        let mut listeners = Vec::new();
        for block in &fabric.config.listeners {
            let listener = TcpListener::bind(&block.addr).await?;
            info!(addr = %block.addr, tls = block.tls, "listening");
            listeners.push((listener, block.tls));
        }

        let acceptor = match &fabric.config.tls {
            Some(tls) => Some(super::build_acceptor(tls)?),
            None => None,
        };

        Ok(Gateway {
            listeners,
            acceptor,
            fabric,
            registry,
        })
    }

    /// Run all accept loops until shutdown.
    pub async fn run(self) -> anyhow::Result<()> {
        let Gateway {
            listeners,
            acceptor,
            fabric,
            registry,
        } = self;

        let mut tasks = Vec::new();
        for (listener, wants_tls) in listeners {
            let fabric = fabric.clone();
            let registry = registry.clone();
            let acceptor = acceptor.clone();
            tasks.push(tokio::spawn(async move {
                let mut shutdown_rx = fabric.shutdown_tx.subscribe();
                loop {
                    tokio::select! {
                        accepted = listener.accept() => {
                            match accepted {
                                Ok((stream, addr)) => {
                                    handle_accept(
                                        &fabric,
                                        &registry,
                                        acceptor.as_ref(),
                                        wants_tls,
                                        stream,
                                        addr,
                                    )
                                    .await;
                                }
                                Err(e) => {
                                    warn!(error = %e, "accept failed");
                                }
                            }
                        }
                        _ = shutdown_rx.recv() => break,
                    }
                }
            }));
        }

        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }
}

async fn handle_accept(
    fabric: &Arc<Fabric>,
    registry: &Arc<Registry>,
    acceptor: Option<&TlsAcceptor>,
    wants_tls: bool,
    stream: TcpStream,
    addr: SocketAddr,
) {
    let ip = addr.ip();

    // Admission: per-IP token bucket, before anything touches the stream.
    if !fabric.admission.check(ip) {
        debug!(ip = %ip, "connection throttled");
        return;
    }

    // Z-lines match the bare address before any bytes are exchanged.
    if let Some(ban) = fabric
        .server_bans
        .lookup_matching(ip, &ip.to_string(), "*")
    {
        debug!(ip = %ip, reason = %ban.reason, "connection rejected by Z-line");
        return;
    }

    // DNSBL verdict, cached 15 minutes.
    let mut require_auth = false;
    if let Some(dnsbl) = &fabric.dnsbl {
        if let Some(hit) = dnsbl.check_ip(ip).await {
            match hit.action {
                DnsblAction::Reject => {
                    info!(ip = %ip, zone = %hit.zone, "connection rejected by DNSBL");
                    return;
                }
                DnsblAction::RequireAuth => {
                    require_auth = true;
                }
                DnsblAction::Mark | DnsblAction::LogOnly => {
                    info!(ip = %ip, zone = %hit.zone, "DNSBL-listed connection admitted");
                }
            }
        }
    }

    let conn_id = ConnectionId::next();
    let fabric = fabric.clone();
    let registry = registry.clone();
    let acceptor = acceptor.cloned();

    tokio::spawn(async move {
        if wants_tls {
            let Some(acceptor) = acceptor else {
                warn!("TLS listener without TLS config, dropping connection");
                return;
            };
            match acceptor.accept(stream).await {
                Ok(tls_stream) => {
                    // Client cert fingerprint, when one was presented.
                    let fp = tls_stream
                        .get_ref()
                        .1
                        .peer_certificates()
                        .and_then(|certs| certs.first())
                        .map(|cert| certfp::fingerprint_der(cert.as_ref()));

                    Connection {
                        conn_id,
                        stream: tls_stream,
                        addr,
                        secure: true,
                        certfp: fp,
                        fabric,
                        registry,
                        require_auth,
                    }
                    .run()
                    .await;
                }
                Err(e) => {
                    debug!(ip = %addr.ip(), error = %e, "TLS handshake failed");
                }
            }
        } else {
            Connection {
                conn_id,
                stream,
                addr,
                secure: false,
                certfp: None,
                fabric,
                registry,
                require_auth,
            }
            .run()
            .await;
        }
    });
}
