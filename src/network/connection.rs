//! Per-connection task: framed I/O, penalty accounting, liveness, and
//! dispatch.
//!
//! One task per accepted connection drives a `tokio::select!` loop over
//! the inbound frame stream, the outbound queue, and a liveness tick. The
//! task is the only reader of the socket and the only writer, so outbound
//! messages are never interleaved mid-line.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use loom_proto::{LineCodec, Message, Numeric, ProtocolError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, info, instrument, warn};

use crate::error::HandlerError;
use crate::handlers::{Context, Registry};
use crate::security::flood::{command_cost, FloodVerdict, PenaltyMeter};
use crate::state::session::{Session, SessionPhase};
use crate::state::uid::ConnectionId;
use crate::state::Fabric;

/// Liveness tick interval.
const TICK_INTERVAL: Duration = Duration::from_secs(10);

/// A client connection being served.
pub struct Connection<S> {
    pub conn_id: ConnectionId,
    pub stream: S,
    pub addr: SocketAddr,
    pub secure: bool,
    pub certfp: Option<String>,
    pub fabric: Arc<Fabric>,
    pub registry: Arc<Registry>,
    /// DNSBL verdict carried over from accept.
    pub require_auth: bool,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Serve the connection until it quits, errors, or times out.
    #[instrument(skip(self), fields(conn = %self.conn_id, addr = %self.addr), name = "connection")]
    pub async fn run(self) {
        let Connection {
            conn_id,
            stream,
            addr,
            secure,
            certfp,
            fabric,
            registry,
            require_auth,
        } = self;

        info!(secure, "client connected");

        let (mut outgoing_rx, queued_bytes) = fabric.broker.register(conn_id);
        let mut framed = Framed::new(stream, LineCodec::new());

        let mut session = Session::new(
            conn_id,
            addr.ip(),
            secure,
            certfp,
            addr.ip().to_string(),
        );
        session.dnsbl_require_auth = require_auth;

        let limits = &fabric.config.limits;
        let mut meter = PenaltyMeter::new(limits.max_penalty_ms, limits.max_penalty_ms);

        let mut last_activity = Instant::now();
        let mut ping_sent = false;
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        let mut close_reason: Option<String> = None;

        loop {
            tokio::select! {
                inbound = framed.next() => {
                    match inbound {
                        Some(Ok(msg)) => {
                            last_activity = Instant::now();
                            ping_sent = false;

                            match meter.charge(command_cost(&msg.command)) {
                                FloodVerdict::Proceed => {}
                                FloodVerdict::Defer(wait) => {
                                    debug!(wait_ms = wait.as_millis() as u64, "deferring for flood credit");
                                    tokio::time::sleep(wait).await;
                                }
                                FloodVerdict::Terminate => {
                                    close_reason = Some("Flood".to_string());
                                    break;
                                }
                            }

                            if let Some(user_arc) = fabric.users.get(conn_id) {
                                user_arc.write().await.last_activity =
                                    chrono::Utc::now().timestamp();
                            }

                            let mut ctx = Context {
                                fabric: &fabric,
                                session: &mut session,
                            };
                            let outcome = registry.dispatch(&mut ctx, &msg).await;

                            if session.pending_penalty_ms > 0 {
                                meter.penalize(session.pending_penalty_ms);
                                session.pending_penalty_ms = 0;
                            }

                            match outcome {
                                Ok(()) => {}
                                Err(HandlerError::Close(reason)) => {
                                    close_reason = Some(reason);
                                    break;
                                }
                                Err(HandlerError::Quit) | Err(HandlerError::Send(_)) => break,
                            }
                        }
                        Some(Err(ProtocolError::LineTooLong { .. })) => {
                            close_reason = Some("Line too long".to_string());
                            break;
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "read error");
                            break;
                        }
                        None => {
                            debug!("client closed connection");
                            break;
                        }
                    }
                }

                outbound = outgoing_rx.recv() => {
                    match outbound {
                        Some(msg) => {
                            let cost = msg.to_string().len() + 2;
                            if write_all(&mut framed, msg, &queued_bytes, cost).await.is_err() {
                                break;
                            }
                        }
                        // Broker dropped us: the disconnect worker already
                        // ran the cleanup (and queued any ERROR first).
                        None => break,
                    }
                }

                _ = tick.tick() => {
                    let idle = last_activity.elapsed();
                    let info = &fabric.server_info;
                    let cfg = &fabric.config.server;

                    if session.is_registered() {
                        let interval = Duration::from_secs(cfg.ping_interval_secs);
                        if idle >= interval * 2 {
                            close_reason = Some("Ping timeout".to_string());
                            break;
                        }
                        if idle >= interval && !ping_sent {
                            let ping = Message::new("PING", vec![info.name.clone()]);
                            if framed.send(ping).await.is_err() {
                                break;
                            }
                            ping_sent = true;
                        }
                    } else if idle >= Duration::from_secs(cfg.unregistered_timeout_secs) {
                        close_reason = Some("Registration timeout".to_string());
                        break;
                    }

                    // SASL step timeout aborts the exchange, not the
                    // connection.
                    let expired = session.sasl.as_ref().is_some_and(|ex| {
                        ex.started_at.elapsed()
                            >= Duration::from_secs(cfg.sasl_step_timeout_secs)
                    });
                    if expired {
                        session.sasl = None;
                        if session.phase == SessionPhase::AuthInProgress {
                            session.phase = SessionPhase::CapNegotiating;
                        }
                        let nick = session.display_nick().to_string();
                        let abort = Message::with_prefix(
                            fabric.server_prefix(),
                            Numeric::ERR_SASLABORTED.to_string(),
                            vec![nick, "SASL authentication aborted".to_string()],
                        );
                        let _ = framed.send(abort).await;
                    }
                }
            }
        }

        // Flush the terminal ERROR line, if any.
        if let Some(reason) = &close_reason {
            let _ = framed
                .send(Message::new("ERROR", vec![reason.clone()]))
                .await;
        }

        // Canonical cleanup: a no-op when QUIT already ran it.
        let reason = close_reason.unwrap_or_else(|| "Connection closed".to_string());
        fabric.disconnect_user(conn_id, &reason, true).await;
        if let Some(nick) = &session.nick {
            // Pre-registration claims are not covered by disconnect_user.
            fabric.users.release_nick(nick, conn_id);
        }
        fabric.broker.unregister(conn_id);

        info!(reason = %reason, "connection closed");
    }
}

async fn write_all<S>(
    framed: &mut Framed<S, LineCodec>,
    msg: Arc<Message>,
    queued_bytes: &Arc<AtomicUsize>,
    cost: usize,
) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let result = framed.send((*msg).clone()).await;
    queued_bytes.fetch_sub(cost.min(queued_bytes.load(Ordering::Relaxed)), Ordering::Relaxed);
    result
}
