//! Per-IP connection admission control.
//!
//! A governor token bucket per source key throttles connection storms.
//! IPv4 buckets key on the address; IPv6 buckets key on the /64 prefix so a
//! single allocation cannot sidestep the limit. Loopback (and configured
//! exemptions) bypass the bucket.

use std::net::{IpAddr, Ipv6Addr};
use std::num::NonZeroU32;

use dashmap::DashMap;
use governor::{Quota, RateLimiter};
use ipnet::Ipv6Net;
use nonzero_ext::nonzero;
use tracing::debug;

type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// Bucket key: exact IPv4 address or IPv6 /64.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum IpKey {
    V4(std::net::Ipv4Addr),
    V6Prefix(Ipv6Addr),
}

impl IpKey {
    fn from_ip(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(v4) => IpKey::V4(v4),
            IpAddr::V6(v6) => {
                let net = Ipv6Net::new(v6, 64).expect("64 is a valid ipv6 prefix length");
                IpKey::V6Prefix(net.network())
            }
        }
    }
}

/// Admission configuration.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    /// Sustained connections per second per key.
    pub connections_per_second: u32,
    /// Burst allowance per key.
    pub connection_burst: u32,
    /// Addresses that bypass the bucket, beyond loopback.
    pub exempt: Vec<IpAddr>,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            connections_per_second: 1,
            connection_burst: 4,
            exempt: Vec::new(),
        }
    }
}

/// Connection admission gate.
pub struct AdmissionControl {
    buckets: DashMap<IpKey, DirectRateLimiter>,
    config: AdmissionConfig,
}

impl AdmissionControl {
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            config,
        }
    }

    fn is_exempt(&self, ip: IpAddr) -> bool {
        ip.is_loopback() || self.config.exempt.contains(&ip)
    }

    /// Whether a new connection from `ip` is admitted.
    pub fn check(&self, ip: IpAddr) -> bool {
        if self.is_exempt(ip) {
            return true;
        }

        let key = IpKey::from_ip(ip);
        let limiter = self.buckets.entry(key).or_insert_with(|| {
            let rate =
                NonZeroU32::new(self.config.connections_per_second).unwrap_or(nonzero!(1u32));
            let burst = NonZeroU32::new(self.config.connection_burst).unwrap_or(nonzero!(1u32));
            RateLimiter::direct(Quota::per_second(rate).allow_burst(burst))
        });

        let allowed = limiter.check().is_ok();
        if !allowed {
            debug!(ip = %ip, "connection admission throttled");
            crate::metrics::CONNECTIONS_THROTTLED.inc();
        }
        allowed
    }

    /// Drop buckets wholesale when the table grows unbounded. Called from
    /// the maintenance sweep.
    pub fn cleanup(&self) {
        const MAX_ENTRIES: usize = 10_000;
        if self.buckets.len() > MAX_ENTRIES {
            self.buckets.clear();
            debug!("cleared admission buckets (exceeded {} entries)", MAX_ENTRIES);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_is_always_admitted() {
        let ctl = AdmissionControl::new(AdmissionConfig {
            connections_per_second: 1,
            connection_burst: 1,
            exempt: Vec::new(),
        });
        for _ in 0..10 {
            assert!(ctl.check("127.0.0.1".parse().unwrap()));
            assert!(ctl.check("::1".parse().unwrap()));
        }
    }

    #[test]
    fn burst_then_throttle() {
        let ctl = AdmissionControl::new(AdmissionConfig {
            connections_per_second: 1,
            connection_burst: 3,
            exempt: Vec::new(),
        });
        let ip: IpAddr = "203.0.113.9".parse().unwrap();
        assert!(ctl.check(ip));
        assert!(ctl.check(ip));
        assert!(ctl.check(ip));
        assert!(!ctl.check(ip));
    }

    #[test]
    fn ipv6_keys_on_slash_64() {
        let ctl = AdmissionControl::new(AdmissionConfig {
            connections_per_second: 1,
            connection_burst: 2,
            exempt: Vec::new(),
        });
        // Same /64, different interface ids: one bucket.
        let a: IpAddr = "2001:db8:1:2::1".parse().unwrap();
        let b: IpAddr = "2001:db8:1:2::ffff".parse().unwrap();
        assert!(ctl.check(a));
        assert!(ctl.check(b));
        assert!(!ctl.check(a));

        // A different /64 gets its own bucket.
        let c: IpAddr = "2001:db8:1:3::1".parse().unwrap();
        assert!(ctl.check(c));
    }

    #[test]
    fn configured_exemptions() {
        let gateway: IpAddr = "198.51.100.7".parse().unwrap();
        let ctl = AdmissionControl::new(AdmissionConfig {
            connections_per_second: 1,
            connection_burst: 1,
            exempt: vec![gateway],
        });
        for _ in 0..5 {
            assert!(ctl.check(gateway));
        }
    }
}
