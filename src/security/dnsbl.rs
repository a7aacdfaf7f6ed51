//! DNSBL (DNS blocklist) lookups at accept time.
//!
//! The source address is reversed (IPv4 octets, IPv6 nibbles) and queried
//! under each configured zone. Verdicts are cached for 15 minutes; an
//! unreachable resolver is treated as "unlisted" per the error taxonomy —
//! dependency failures never surface to the user.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use hickory_resolver::config::ResolverConfig;
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use serde::Deserialize;
use tracing::{debug, warn};

/// Timeout for a single DNSBL query.
const DNSBL_TIMEOUT: Duration = Duration::from_secs(3);

/// Verdict cache lifetime.
const CACHE_TTL: Duration = Duration::from_secs(15 * 60);

/// What to do with a listed client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DnsblAction {
    /// Refuse the connection.
    #[default]
    Reject,
    /// Admit, but mark the session for operators.
    Mark,
    /// Admit only when the client authenticates via SASL.
    RequireAuth,
    /// Admit and log.
    LogOnly,
}

/// One configured blocklist zone.
#[derive(Debug, Clone, Deserialize)]
pub struct DnsblZone {
    pub zone: String,
    /// Expected reply address (e.g. `127.0.0.2`); `None` accepts any.
    #[serde(default)]
    pub reply: Option<IpAddr>,
    #[serde(default)]
    pub action: DnsblAction,
}

/// A positive lookup result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DnsblHit {
    pub zone: String,
    pub action: DnsblAction,
}

#[derive(Clone)]
struct CachedVerdict {
    hit: Option<DnsblHit>,
    at: Instant,
}

/// DNSBL service with a verdict cache.
pub struct DnsblService {
    resolver: TokioResolver,
    zones: Vec<DnsblZone>,
    cache: DashMap<IpAddr, CachedVerdict>,
}

/// Reverse an address into its DNSBL query labels: IPv4 octets reversed,
/// IPv6 expanded to 32 nibbles and reversed.
fn reverse_ip(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => {
            let o = v4.octets();
            format!("{}.{}.{}.{}", o[3], o[2], o[1], o[0])
        }
        IpAddr::V6(v6) => {
            let mut labels = Vec::with_capacity(32);
            for byte in v6.octets().iter().rev() {
                labels.push(format!("{:x}", byte & 0x0f));
                labels.push(format!("{:x}", byte >> 4));
            }
            labels.join(".")
        }
    }
}

impl DnsblService {
    /// Create a service for the configured zones. Resolver configuration
    /// falls back to defaults when the system config is unavailable.
    pub fn new(zones: Vec<DnsblZone>) -> Self {
        let resolver = TokioResolver::builder_tokio()
            .map(|b| b.build())
            .unwrap_or_else(|_| {
                TokioResolver::builder_with_config(
                    ResolverConfig::default(),
                    TokioConnectionProvider::default(),
                )
                .build()
            });

        Self {
            resolver,
            zones,
            cache: DashMap::new(),
        }
    }

    /// Check an address against every zone; first hit wins. Cached for
    /// [`CACHE_TTL`].
    pub async fn check_ip(&self, ip: IpAddr) -> Option<DnsblHit> {
        if let Some(cached) = self.cache.get(&ip) {
            if cached.at.elapsed() < CACHE_TTL {
                return cached.hit.clone();
            }
        }

        let hit = self.query(ip).await;
        self.cache.insert(
            ip,
            CachedVerdict {
                hit: hit.clone(),
                at: Instant::now(),
            },
        );
        hit
    }

    async fn query(&self, ip: IpAddr) -> Option<DnsblHit> {
        let reversed = reverse_ip(ip);

        for zone in &self.zones {
            let query = format!("{}.{}.", reversed, zone.zone);
            debug!(query = %query, "dnsbl lookup");

            let lookup = self.resolver.lookup_ip(query.as_str());
            match tokio::time::timeout(DNSBL_TIMEOUT, lookup).await {
                Ok(Ok(response)) => {
                    let listed = match zone.reply {
                        Some(expected) => response.iter().any(|addr| addr == expected),
                        None => response.iter().next().is_some(),
                    };
                    if listed {
                        debug!(ip = %ip, zone = %zone.zone, "dnsbl hit");
                        return Some(DnsblHit {
                            zone: zone.zone.clone(),
                            action: zone.action,
                        });
                    }
                }
                Ok(Err(e)) => {
                    // NXDOMAIN means unlisted; anything else is logged and
                    // treated as unlisted.
                    if !e.to_string().contains("NXDomain") {
                        warn!(zone = %zone.zone, error = %e, "dnsbl lookup failed");
                    }
                }
                Err(_) => {
                    warn!(zone = %zone.zone, "dnsbl lookup timed out");
                }
            }
        }

        None
    }

    /// Drop expired cache entries. Called from the maintenance sweep.
    pub fn prune_cache(&self) -> usize {
        let before = self.cache.len();
        self.cache.retain(|_, v| v.at.elapsed() < CACHE_TTL);
        before - self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reverses_ipv4_octets() {
        assert_eq!(reverse_ip("1.2.3.4".parse().unwrap()), "4.3.2.1");
        assert_eq!(
            reverse_ip("203.0.113.77".parse().unwrap()),
            "77.113.0.203"
        );
    }

    #[test]
    fn reverses_ipv6_nibbles() {
        let reversed = reverse_ip("2001:db8::1".parse().unwrap());
        assert!(reversed.starts_with("1.0.0.0."));
        assert!(reversed.ends_with("8.b.d.0.1.0.0.2"));
        assert_eq!(reversed.split('.').count(), 32);
    }
}
