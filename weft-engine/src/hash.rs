//! Structural hashing of control-plane DNS configurations
//!
//! Equal-hash updates are skipped by the orchestrator, so the digest must be
//! deterministic across runs and insensitive to slice order (slices are
//! treated as sets). Element digests are combined with wrapping addition;
//! field boundaries are tagged to keep distinct shapes from colliding.

use weft_dns::{CustomZone, DnsConfig, NameServer, NameServerGroup, SimpleRecord};

/// Structural digest of a DNS configuration.
pub fn config_hash(config: &DnsConfig) -> u64 {
    hash_parts(&[
        b"config",
        &[config.service_enable as u8],
        &combine(config.custom_zones.iter().map(zone_digest)).to_le_bytes(),
        &combine(config.name_server_groups.iter().map(group_digest)).to_le_bytes(),
    ])
}

fn zone_digest(zone: &CustomZone) -> u64 {
    hash_parts(&[
        b"zone",
        zone.domain.as_str().as_bytes(),
        &combine(zone.records.iter().map(record_digest)).to_le_bytes(),
    ])
}

fn record_digest(record: &SimpleRecord) -> u64 {
    hash_parts(&[
        b"record",
        record.name.as_str().as_bytes(),
        record.class.to_string().as_bytes(),
        record.kind.to_string().as_bytes(),
        &record.ttl.to_le_bytes(),
        record.rdata.as_bytes(),
    ])
}

fn group_digest(group: &NameServerGroup) -> u64 {
    hash_parts(&[
        b"group",
        &[group.primary as u8, group.enabled as u8],
        &combine(group.name_servers.iter().map(nameserver_digest)).to_le_bytes(),
        &combine(group.domains.iter().map(|d| hash_parts(&[b"domain", d.as_str().as_bytes()])))
            .to_le_bytes(),
        &combine(
            group
                .search_domains
                .iter()
                .map(|d| hash_parts(&[b"search", d.as_str().as_bytes()])),
        )
        .to_le_bytes(),
    ])
}

fn nameserver_digest(ns: &NameServer) -> u64 {
    hash_parts(&[
        b"ns",
        ns.host_port().as_bytes(),
        ns.ns_type.to_string().as_bytes(),
    ])
}

/// Order-insensitive combination of element digests.
fn combine(digests: impl Iterator<Item = u64>) -> u64 {
    digests.fold(0u64, |acc, d| acc.wrapping_add(d))
}

fn hash_parts(parts: &[&[u8]]) -> u64 {
    let mut hasher = blake3::Hasher::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(prefix)
}
