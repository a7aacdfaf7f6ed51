//! loomd - Loom IRC Daemon
//!
//! A distributed IRCv3 server core built on message-passing fanout over
//! shared repositories.

mod broker;
mod config;
mod error;
mod handlers;
mod links;
mod metrics;
mod network;
mod security;
mod services;
mod state;

use std::path::Path;
use std::sync::Arc;

use tracing::{error, info};

use crate::config::Config;
use crate::handlers::Registry;
use crate::network::gateway::Gateway;
use crate::services::{Collaborators, ConfigOperatorStore, MemoryAccountService, NullHooks};
use crate::state::Fabric;

/// Resolve the configuration path from CLI arguments.
/// Supports `-c <path>`, `--config <path>`, or a bare path.
/// Falls back to `config.toml` when no argument is provided.
fn resolve_config_path() -> String {
    let mut args = std::env::args().skip(1);

    let raw_path = match args.next() {
        Some(flag) if flag == "-c" || flag == "--config" => args.next().unwrap_or_else(|| {
            eprintln!("Missing path after {}", flag);
            std::process::exit(1);
        }),
        Some(path) => path,
        None => "config.toml".to_string(),
    };

    match std::fs::canonicalize(Path::new(&raw_path)) {
        Ok(p) => p.to_string_lossy().into_owned(),
        Err(_) => raw_path,
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first (before tracing, so log_format applies).
    let config_path = resolve_config_path();

    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("ERROR: Failed to load config from {}: {}", config_path, e);
        e
    })?;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match config.server.log_format {
        config::LogFormat::Json => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .json()
                .init();
        }
        config::LogFormat::Pretty => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_target(true)
                .init();
        }
    }

    if let Err(errors) = config::validate(&config) {
        for err in &errors {
            error!(error = %err, "configuration validation failed");
        }
        return Err(anyhow::anyhow!(
            "Configuration validation failed with {} error(s)",
            errors.len()
        ));
    }

    info!(
        server = %config.server.name,
        network = %config.server.network,
        sid = %config.server.sid,
        "starting loomd"
    );

    metrics::init();

    // Collaborators: config-backed accounts and operator blocks.
    let accounts = MemoryAccountService::new();
    for account in &config.accounts {
        accounts.add_account(
            &account.name,
            account.password_hash.clone(),
            account
                .certfp
                .as_deref()
                .map(crate::security::certfp::normalize),
            None,
        );
    }
    let operators = ConfigOperatorStore::new(
        config
            .opers
            .iter()
            .map(|o| services::OperatorBlock {
                name: o.name.clone(),
                hashed_pass: o.password_hash.clone(),
                hostmasks: o.hostmasks.clone(),
            })
            .collect(),
    );
    let collaborators = Collaborators {
        accounts: Arc::new(accounts),
        operators: Arc::new(operators),
        hooks: Arc::new(NullHooks),
    };

    let (fabric, mut disconnect_rx) = Fabric::new(config, collaborators);
    info!("fabric initialized");

    // Graceful shutdown on SIGINT/SIGTERM.
    {
        let shutdown_tx = fabric.shutdown_tx.clone();
        tokio::spawn(async move {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigint =
                signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = sigint.recv() => info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            }
            let _ = shutdown_tx.send(());
        });
    }

    // Disconnect worker: broker overflow and handler-requested kills run
    // through here so channel fanout never blocks on cleanup.
    {
        let fabric = Arc::clone(&fabric);
        tokio::spawn(async move {
            while let Some((conn_id, reason)) = disconnect_rx.recv().await {
                let error_line = Arc::new(loom_proto::Message::new(
                    "ERROR",
                    vec![reason.clone()],
                ));
                fabric.broker.send_to_connection(conn_id, &error_line);
                fabric.disconnect_user(conn_id, &reason, true).await;
                fabric.broker.unregister(conn_id);
            }
        });
    }

    // Maintenance sweep: ban expiry, DNSBL cache, admission buckets.
    {
        let fabric = Arc::clone(&fabric);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut shutdown_rx = fabric.shutdown_tx.subscribe();
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = fabric.server_bans.prune_expired();
                        if removed > 0 {
                            info!(removed, "expired server bans pruned");
                        }
                        if let Some(dnsbl) = &fabric.dnsbl {
                            dnsbl.prune_cache();
                        }
                        fabric.admission.cleanup();
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });
    }

    // Command handler registry.
    let registry = Arc::new(Registry::new());

    // S2S: outbound autoconnects and the inbound listener.
    links::session::spawn_outbound_links(&fabric);
    links::session::spawn_inbound_listener(&fabric);

    // Client gateway; runs until shutdown.
    let gateway = Gateway::bind(fabric.clone(), registry).await?;
    gateway.run().await?;

    info!("gateway stopped, flushing");
    tokio::time::sleep(tokio::time::Duration::from_millis(500)).await;

    Ok(())
}
