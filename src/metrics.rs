//! In-process Prometheus metrics.
//!
//! The registry is process-global; there is no HTTP exporter in the core —
//! counters exist for operators embedding the daemon and for tests.

use lazy_static::lazy_static;
use prometheus::{IntCounter, IntGauge, Registry};

lazy_static! {
    /// Global metrics registry.
    pub static ref REGISTRY: Registry = Registry::new();

    /// Currently connected local users.
    pub static ref CONNECTED_USERS: IntGauge =
        IntGauge::new("loom_connected_users", "Currently connected local users").unwrap();

    /// Currently active channels.
    pub static ref ACTIVE_CHANNELS: IntGauge =
        IntGauge::new("loom_active_channels", "Currently active channels").unwrap();

    /// Messages delivered to clients.
    pub static ref MESSAGES_ROUTED: IntCounter =
        IntCounter::new("loom_messages_routed_total", "Messages delivered to clients").unwrap();

    /// Cross-index invariant repairs performed in release mode.
    pub static ref INVARIANT_REPAIRS: IntCounter = IntCounter::new(
        "loom_invariant_repairs_total",
        "Cross-index repository repairs"
    )
    .unwrap();

    /// Server bans removed by the expiry sweep.
    pub static ref BANS_EXPIRED: IntCounter =
        IntCounter::new("loom_bans_expired_total", "Server bans removed by expiry").unwrap();

    /// Netsplits observed (direct or cascaded link loss).
    pub static ref NETSPLITS: IntCounter =
        IntCounter::new("loom_netsplits_total", "Server link losses").unwrap();

    /// Connections refused by admission control.
    pub static ref CONNECTIONS_THROTTLED: IntCounter = IntCounter::new(
        "loom_connections_throttled_total",
        "Connections refused by per-IP admission"
    )
    .unwrap();
}

/// Register all collectors with the global registry. Registration errors
/// are ignored so repeated calls (tests) are harmless.
pub fn init() {
    let _ = REGISTRY.register(Box::new(CONNECTED_USERS.clone()));
    let _ = REGISTRY.register(Box::new(ACTIVE_CHANNELS.clone()));
    let _ = REGISTRY.register(Box::new(MESSAGES_ROUTED.clone()));
    let _ = REGISTRY.register(Box::new(INVARIANT_REPAIRS.clone()));
    let _ = REGISTRY.register(Box::new(BANS_EXPIRED.clone()));
    let _ = REGISTRY.register(Box::new(NETSPLITS.clone()));
    let _ = REGISTRY.register(Box::new(CONNECTIONS_THROTTLED.clone()));
}
