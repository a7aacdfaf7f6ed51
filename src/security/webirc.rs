//! WEBIRC gateway trust.
//!
//! A trusted gateway (web client proxy) may announce the end user's real
//! host and address before registration. The gateway is matched by source
//! address against a configured allowlist (CIDR, exact IP, or hostname
//! wildcard) and its password is compared in constant time.

use std::net::IpAddr;

use ipnet::IpNet;
use loom_proto::wildcard_match;
use serde::Deserialize;
use subtle::ConstantTimeEq;

/// One configured gateway block.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayBlock {
    /// Gateway name, matched against the second WEBIRC parameter.
    pub name: String,
    /// Shared secret.
    pub password: String,
    /// Allowed sources: CIDR (`192.0.2.0/24`), exact address, or wildcard
    /// pattern matched against the address text.
    pub hosts: Vec<String>,
    /// Whether the gateway may mark sessions secure / carry a certfp.
    #[serde(default)]
    pub trusted_secure: bool,
}

/// Spoof values extracted from an accepted WEBIRC command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebircSpoof {
    pub gateway: String,
    pub host: String,
    pub ip: IpAddr,
    /// `secure` granted via the options field of a trusted gateway.
    pub secure: bool,
}

fn host_matches(pattern: &str, ip: IpAddr) -> bool {
    if let Ok(net) = pattern.parse::<IpNet>() {
        return net.contains(&ip);
    }
    if let Ok(exact) = pattern.parse::<IpAddr>() {
        return exact == ip;
    }
    wildcard_match(pattern, &ip.to_string())
}

/// Match a gateway block for this source address and verify the password.
///
/// Password comparison is constant-time and happens even when the check
/// will fail on other grounds, so timing does not reveal which part was
/// wrong.
pub fn authorize<'a>(
    blocks: &'a [GatewayBlock],
    source: IpAddr,
    name: &str,
    password: &str,
) -> Option<&'a GatewayBlock> {
    let mut authorized = None;
    for block in blocks {
        let name_ok = block.name == name;
        let host_ok = block.hosts.iter().any(|h| host_matches(h, source));
        let pass_ok = block.password.len() == password.len()
            && block
                .password
                .as_bytes()
                .ct_eq(password.as_bytes())
                .unwrap_u8()
                == 1;
        if name_ok && host_ok && pass_ok && authorized.is_none() {
            authorized = Some(block);
        }
    }
    authorized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks() -> Vec<GatewayBlock> {
        vec![GatewayBlock {
            name: "webgate".into(),
            password: "sekrit".into(),
            hosts: vec!["192.0.2.0/24".into(), "2001:db8::1".into(), "10.0.0.*".into()],
            trusted_secure: true,
        }]
    }

    #[test]
    fn cidr_exact_and_wildcard_sources() {
        let blocks = blocks();
        let ok = |ip: &str| authorize(&blocks, ip.parse().unwrap(), "webgate", "sekrit").is_some();
        assert!(ok("192.0.2.55"));
        assert!(ok("2001:db8::1"));
        assert!(ok("10.0.0.7"));
        assert!(!ok("203.0.113.1"));
    }

    #[test]
    fn wrong_password_or_name_rejected() {
        let blocks = blocks();
        let src: IpAddr = "192.0.2.55".parse().unwrap();
        assert!(authorize(&blocks, src, "webgate", "wrong").is_none());
        assert!(authorize(&blocks, src, "othergate", "sekrit").is_none());
    }
}
