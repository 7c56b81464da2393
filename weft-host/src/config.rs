//! Host-facing DNS configuration and the persisted shutdown checkpoint

use std::net::{IpAddr, Ipv4Addr};

use serde::{Deserialize, Serialize};

/// One domain entry in the host configuration.
///
/// Domain strings here are host-facing: punycode, lowercase, no trailing
/// dot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    pub domain: String,
    /// Routed to the virtual resolver without becoming a search domain.
    #[serde(default)]
    pub match_only: bool,
    /// Temporarily excluded (its upstream group is deactivated).
    #[serde(default)]
    pub disabled: bool,
}

impl DomainConfig {
    pub fn new(domain: impl Into<String>, match_only: bool) -> Self {
        Self {
            domain: domain.into(),
            match_only,
            disabled: false,
        }
    }
}

/// What the host manager installs as the system resolver configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDnsConfig {
    pub server_ip: IpAddr,
    pub server_port: u16,
    /// Whether the virtual resolver becomes the system default. When false,
    /// only the match-only domains are routed to it.
    pub route_all: bool,
    pub domains: Vec<DomainConfig>,
}

impl Default for HostDnsConfig {
    fn default() -> Self {
        Self {
            server_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            server_port: 53,
            route_all: false,
            domains: Vec::new(),
        }
    }
}

impl HostDnsConfig {
    /// The non-disabled, non-match-only domains, i.e. the search list.
    pub fn search_domains(&self) -> Vec<String> {
        self.domains
            .iter()
            .filter(|d| !d.disabled && !d.match_only)
            .map(|d| d.domain.clone())
            .collect()
    }
}

/// Storage key of the shutdown checkpoint.
pub const SHUTDOWN_STATE_KEY: &str = "dns-shutdown";

/// Minimum state needed to restore the host's original DNS after an unclean
/// exit. Written on every successful apply, deleted on clean shutdown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownState {
    /// The host configuration that was active.
    pub config: Option<HostDnsConfig>,
    /// Original resolver file contents, for file-based back ends.
    pub original_resolv_conf: Option<String>,
}
