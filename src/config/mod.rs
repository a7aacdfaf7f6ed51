//! Configuration loading and validation.
//!
//! TOML on disk, deserialized with serde; `validate` collects every error
//! rather than stopping at the first.

mod defaults;

use std::net::IpAddr;
use std::path::Path;

use serde::Deserialize;

use crate::security::dnsbl::DnsblZone;
use crate::security::webirc::GatewayBlock;
use crate::state::uid::is_valid_sid;

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default, rename = "listen")]
    pub listeners: Vec<ListenConfig>,
    #[serde(default)]
    pub tls: Option<TlsConfig>,
    #[serde(default, rename = "oper")]
    pub opers: Vec<OperConfig>,
    #[serde(default, rename = "account")]
    pub accounts: Vec<AccountConfig>,
    #[serde(default, rename = "link")]
    pub links: Vec<LinkConfig>,
    #[serde(default)]
    pub s2s_listen: Option<ListenConfig>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server name, e.g. `hub.loom.example`.
    pub name: String,
    /// Network name advertised in ISUPPORT.
    pub network: String,
    /// 3-character server id: `[0-9][A-Z0-9][A-Z0-9]`.
    pub sid: String,
    #[serde(default)]
    pub description: String,
    /// Path to the MOTD file; absent means `ERR_NOMOTD`.
    #[serde(default)]
    pub motd_file: Option<String>,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default = "defaults::ping_interval_secs")]
    pub ping_interval_secs: u64,
    #[serde(default = "defaults::unregistered_timeout_secs")]
    pub unregistered_timeout_secs: u64,
    #[serde(default = "defaults::sasl_step_timeout_secs")]
    pub sasl_step_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "defaults::max_channels_per_user")]
    pub max_channels_per_user: usize,
    #[serde(default = "defaults::max_queue_msgs")]
    pub max_queue_msgs: usize,
    #[serde(default = "defaults::max_queue_bytes")]
    pub max_queue_bytes: usize,
    #[serde(default = "defaults::max_penalty_ms")]
    pub max_penalty_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_channels_per_user: defaults::max_channels_per_user(),
            max_queue_msgs: defaults::max_queue_msgs(),
            max_queue_bytes: defaults::max_queue_bytes(),
            max_penalty_ms: defaults::max_penalty_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    #[serde(default)]
    pub admission: AdmissionSection,
    #[serde(default, rename = "dnsbl")]
    pub dnsbl_zones: Vec<DnsblZone>,
    #[serde(default, rename = "webirc")]
    pub webirc_gateways: Vec<GatewayBlock>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AdmissionSection {
    #[serde(default = "defaults::connections_per_second")]
    pub connections_per_second: u32,
    #[serde(default = "defaults::connection_burst")]
    pub connection_burst: u32,
    #[serde(default)]
    pub exempt: Vec<IpAddr>,
}

impl Default for AdmissionSection {
    fn default() -> Self {
        Self {
            connections_per_second: defaults::connections_per_second(),
            connection_burst: defaults::connection_burst(),
            exempt: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenConfig {
    #[serde(default = "defaults::listen_addr")]
    pub addr: String,
    /// Serve TLS on this listener (requires the `[tls]` section).
    #[serde(default)]
    pub tls: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperConfig {
    pub name: String,
    /// Argon2id PHC string.
    pub password_hash: String,
    #[serde(default)]
    pub hostmasks: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountConfig {
    pub name: String,
    /// Argon2id PHC string.
    pub password_hash: String,
    #[serde(default)]
    pub certfp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    /// Remote server name.
    pub name: String,
    /// Remote SID.
    pub sid: String,
    /// `host:port` to connect to (outbound links).
    #[serde(default)]
    pub addr: Option<String>,
    /// Shared link password.
    pub password: String,
    #[serde(default)]
    pub autoconnect: bool,
    #[serde(default = "defaults::truthy")]
    pub tls: bool,
    #[serde(default = "defaults::link_port")]
    pub port: u16,
}

impl Config {
    /// Load and parse a config file.
    pub fn load(path: &str) -> anyhow::Result<Config> {
        let raw = std::fs::read_to_string(Path::new(path))?;
        let config: Config = toml::from_str(&raw)?;
        Ok(config)
    }

    /// Load the MOTD lines, if a file is configured and readable.
    pub fn motd_lines(&self) -> Option<Vec<String>> {
        let path = self.server.motd_file.as_ref()?;
        let raw = std::fs::read_to_string(path).ok()?;
        Some(raw.lines().map(str::to_owned).collect())
    }
}

/// Validate a parsed configuration, returning every problem found.
pub fn validate(config: &Config) -> Result<(), Vec<String>> {
    let mut errors = Vec::new();

    if config.server.name.is_empty() || !config.server.name.contains('.') {
        errors.push("server.name must be a dotted server name".to_string());
    }
    if config.server.network.is_empty() {
        errors.push("server.network must not be empty".to_string());
    }
    if !is_valid_sid(&config.server.sid) {
        errors.push(format!(
            "server.sid {:?} must match [0-9][A-Z0-9][A-Z0-9]",
            config.server.sid
        ));
    }
    if config.listeners.is_empty() {
        errors.push("at least one [[listen]] block is required".to_string());
    }
    if config.listeners.iter().any(|l| l.tls) && config.tls.is_none() {
        errors.push("a TLS listener requires the [tls] section".to_string());
    }
    for link in &config.links {
        if !is_valid_sid(&link.sid) {
            errors.push(format!("link {:?} has invalid sid {:?}", link.name, link.sid));
        }
        if link.sid == config.server.sid {
            errors.push(format!("link {:?} reuses our own sid", link.name));
        }
        if link.autoconnect && link.addr.is_none() {
            errors.push(format!("autoconnect link {:?} needs addr", link.name));
        }
        if link.password.is_empty() {
            errors.push(format!("link {:?} has an empty password", link.name));
        }
    }
    for oper in &config.opers {
        if !oper.password_hash.starts_with("$argon2") {
            errors.push(format!(
                "oper {:?} password_hash is not an argon2 PHC string",
                oper.name
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        [server]
        name = "hub.loom.example"
        network = "LoomNet"
        sid = "001"

        [[listen]]
        addr = "127.0.0.1:6667"
    "#;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.server.ping_interval_secs, 90);
        assert_eq!(config.server.unregistered_timeout_secs, 30);
        assert_eq!(config.limits.max_channels_per_user, 50);
        assert_eq!(config.limits.max_queue_msgs, 256);
        assert_eq!(config.limits.max_queue_bytes, 1024 * 1024);
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn load_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(MINIMAL.as_bytes()).unwrap();
        let config = Config::load(f.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.sid, "001");
    }

    #[test]
    fn validation_collects_all_errors() {
        let raw = r#"
            [server]
            name = "nodots"
            network = ""
            sid = "XYZ"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        let errors = validate(&config).unwrap_err();
        assert!(errors.len() >= 4, "expected several errors, got {errors:?}");
    }

    #[test]
    fn bad_link_blocks_flagged() {
        let raw = r#"
            [server]
            name = "hub.loom.example"
            network = "LoomNet"
            sid = "001"

            [[listen]]
            addr = "127.0.0.1:6667"

            [[link]]
            name = "peer.loom.example"
            sid = "001"
            password = ""
            autoconnect = true
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        let errors = validate(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("reuses our own sid")));
        assert!(errors.iter().any(|e| e.contains("empty password")));
        assert!(errors.iter().any(|e| e.contains("needs addr")));
    }
}
