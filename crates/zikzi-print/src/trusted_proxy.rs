// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Decides which peers may speak for someone else, either through
// forwarded-IP headers or a PROXY protocol preamble.

use std::net::IpAddr;

use ipnet::IpNet;

use zikzi_core::config::parse_networks;
use zikzi_core::error::Result;

/// A configured list of trusted networks plus the fallback for an empty list.
#[derive(Debug, Clone, Default)]
pub struct TrustedProxyMatcher {
    networks: Vec<IpNet>,
    trust_when_empty: bool,
}

impl TrustedProxyMatcher {
    /// Build from IP/CIDR strings.  An invalid entry is a configuration error.
    pub fn new(entries: &[String], trust_when_empty: bool) -> Result<Self> {
        Ok(Self {
            networks: parse_networks(entries)?,
            trust_when_empty,
        })
    }

    /// Whether any networks are configured.
    pub fn has_networks(&self) -> bool {
        !self.networks.is_empty()
    }

    /// Whether `ip` is trusted.  IPv4-mapped IPv6 peers match as IPv4.
    pub fn is_trusted(&self, ip: IpAddr) -> bool {
        if self.networks.is_empty() {
            return self.trust_when_empty;
        }
        let ip = ip.to_canonical();
        self.networks.iter().any(|net| net.contains(&ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher(entries: &[&str], trust_when_empty: bool) -> TrustedProxyMatcher {
        let entries: Vec<String> = entries.iter().map(|s| s.to_string()).collect();
        TrustedProxyMatcher::new(&entries, trust_when_empty).unwrap()
    }

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn empty_list_follows_global_toggle() {
        assert!(!matcher(&[], false).is_trusted(ip("10.0.0.1")));
        assert!(matcher(&[], true).is_trusted(ip("10.0.0.1")));
    }

    #[test]
    fn configured_list_ignores_toggle() {
        let m = matcher(&["10.0.0.0/24"], true);
        assert!(m.is_trusted(ip("10.0.0.200")));
        assert!(!m.is_trusted(ip("10.0.1.1")));
    }

    #[test]
    fn bare_ips_match_exactly() {
        let m = matcher(&["192.168.1.10", "fd00::1"], false);
        assert!(m.is_trusted(ip("192.168.1.10")));
        assert!(!m.is_trusted(ip("192.168.1.11")));
        assert!(m.is_trusted(ip("fd00::1")));
        assert!(!m.is_trusted(ip("fd00::2")));
    }

    #[test]
    fn mapped_ipv6_peer_matches_ipv4_network() {
        let m = matcher(&["172.16.0.0/16"], false);
        assert!(m.is_trusted(ip("::ffff:172.16.4.5")));
        assert!(!m.is_trusted(ip("::ffff:172.17.4.5")));
    }

    #[test]
    fn invalid_entry_is_rejected() {
        let entries = vec!["10.0.0.0/33".to_string()];
        assert!(TrustedProxyMatcher::new(&entries, false).is_err());
    }
}
