//! Derivation of the host-facing DNS configuration

use std::net::IpAddr;

use weft_dns::DnsConfig;
use weft_host::{DomainConfig, HostDnsConfig};

/// Derive what the host manager should install from a control-plane config.
///
/// Enabled primary groups make the virtual resolver the system default.
/// Non-primary match domains are routed selectively; group search domains
/// and custom zones become resolvable search entries. Domain strings are
/// host-facing (no trailing dot).
pub fn dns_config_to_host_config(
    config: &DnsConfig,
    server_ip: IpAddr,
    server_port: u16,
) -> HostDnsConfig {
    let mut host = HostDnsConfig {
        server_ip,
        server_port,
        route_all: false,
        domains: Vec::new(),
    };

    for group in &config.name_server_groups {
        if !group.enabled {
            continue;
        }
        if group.primary {
            host.route_all = true;
        }
        for domain in &group.domains {
            host.domains
                .push(DomainConfig::new(domain.without_trailing_dot(), true));
        }
        for domain in &group.search_domains {
            host.domains
                .push(DomainConfig::new(domain.without_trailing_dot(), false));
        }
    }

    for zone in &config.custom_zones {
        host.domains
            .push(DomainConfig::new(zone.domain.without_trailing_dot(), false));
    }

    host
}
