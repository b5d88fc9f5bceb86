// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Gateway configuration, supplied once at startup.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ZikziError};

/// Process-wide settings for both intake servers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Address both listeners bind to.
    pub bind_address: IpAddr,
    /// Port for raw PostScript sockets (JetDirect style).
    pub raw_port: u16,
    /// Port for IPP over HTTP.
    pub ipp_port: u16,
    /// Root directory for original documents and conversion output.
    pub storage_root: PathBuf,
    /// SQLite database file.
    pub database_path: PathBuf,
    pub auth: AuthConfig,
    pub proxy: ProxyConfig,
    pub converter: ConverterConfig,
    /// Grace period for in-flight connections after shutdown is requested.
    pub shutdown_grace_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            raw_port: 9100,
            ipp_port: 631,
            storage_root: PathBuf::from("data"),
            database_path: PathBuf::from("data/zikzi.db"),
            auth: AuthConfig::default(),
            proxy: ProxyConfig::default(),
            converter: ConverterConfig::default(),
            shutdown_grace_secs: 5,
        }
    }
}

impl GatewayConfig {
    /// Read a JSON config file; absent fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&data)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would only fail later at runtime.
    pub fn validate(&self) -> Result<()> {
        parse_networks(&self.proxy.trusted_proxies)?;
        parse_networks(&self.proxy.proxy_protocol_trusted)?;
        if self.auth.realm.contains('"') {
            return Err(ZikziError::Config(
                "auth realm must not contain a double quote".into(),
            ));
        }
        if self.converter.binary.as_os_str().is_empty() {
            return Err(ZikziError::Config("converter binary is empty".into()));
        }
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// How submissions are attributed to users.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Realm used in Basic/Digest challenges and digest HA1 values.
    pub realm: String,
    /// Authenticate by registered source IP.
    pub ip_auth_enabled: bool,
    /// Authenticate IPP clients by HTTP Basic/Digest.
    pub login_auth_enabled: bool,
    /// Accept jobs from unregistered IPs / anonymous clients as orphans.
    pub allow_unregistered: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            realm: "zikzi".into(),
            ip_auth_enabled: true,
            login_auth_enabled: false,
            allow_unregistered: false,
        }
    }
}

/// Reverse proxy trust settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Trust forwarded-IP headers from any peer when `trusted_proxies` is empty.
    pub trust_proxy: bool,
    /// Peers allowed to set `X-Forwarded-For` / `X-Real-IP`.
    pub trusted_proxies: Vec<String>,
    /// Accept PROXY protocol v1/v2 preambles.
    pub proxy_protocol: bool,
    /// Peers allowed to send PROXY preambles. Empty means every peer must.
    pub proxy_protocol_trusted: Vec<String>,
    /// Read timeout for a PROXY preamble.
    pub header_timeout_secs: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            trust_proxy: false,
            trusted_proxies: Vec::new(),
            proxy_protocol: false,
            proxy_protocol_trusted: Vec::new(),
            header_timeout_secs: 10,
        }
    }
}

impl ProxyConfig {
    pub fn header_timeout(&self) -> Duration {
        Duration::from_secs(self.header_timeout_secs)
    }
}

/// External document converter (Ghostscript compatible command line).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConverterConfig {
    pub binary: PathBuf,
    /// Upper bound for a single converter invocation.
    pub timeout_secs: u64,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("gs"),
            timeout_secs: 300,
        }
    }
}

impl ConverterConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Parse a list of IPs and CIDRs; bare IPs become host networks (/32, /128).
pub fn parse_networks(entries: &[String]) -> Result<Vec<IpNet>> {
    entries
        .iter()
        .map(|entry| {
            let entry = entry.trim();
            if let Ok(net) = entry.parse::<IpNet>() {
                return Ok(net);
            }
            let invalid = || ZikziError::Config(format!("invalid IP or CIDR: {entry:?}"));
            let ip = entry.parse::<IpAddr>().map_err(|_| invalid())?;
            let host_prefix = if ip.is_ipv4() { 32 } else { 128 };
            IpNet::new(ip, host_prefix).map_err(|_| invalid())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_documented_ports() {
        let config = GatewayConfig::default();
        assert_eq!(config.raw_port, 9100);
        assert_eq!(config.ipp_port, 631);
        assert_eq!(config.auth.realm, "zikzi");
        assert!(config.auth.ip_auth_enabled);
        assert!(!config.auth.login_auth_enabled);
        assert_eq!(config.proxy.header_timeout(), Duration::from_secs(10));
        assert_eq!(config.shutdown_grace(), Duration::from_secs(5));
    }

    #[test]
    fn partial_json_takes_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"ipp_port": 8631, "auth": {{"login_auth_enabled": true}}}}"#
        )
        .unwrap();

        let config = GatewayConfig::load(file.path()).unwrap();
        assert_eq!(config.ipp_port, 8631);
        assert_eq!(config.raw_port, 9100);
        assert!(config.auth.login_auth_enabled);
        assert_eq!(config.auth.realm, "zikzi");
    }

    #[test]
    fn invalid_trusted_proxy_is_rejected() {
        let mut config = GatewayConfig::default();
        config.proxy.trusted_proxies = vec!["10.0.0.0/8".into(), "not-an-ip".into()];
        assert!(matches!(config.validate(), Err(ZikziError::Config(_))));
    }

    #[test]
    fn bare_ips_become_host_networks() {
        let nets = parse_networks(&["192.168.1.10".into(), "fd00::1".into()]).unwrap();
        assert_eq!(nets[0].prefix_len(), 32);
        assert_eq!(nets[1].prefix_len(), 128);
    }
}
