//! Control-plane DNS configuration model
//!
//! These are the structured values the management plane delivers to the
//! client. Domains inside them are normalized at construction, so everything
//! downstream can compare them directly.

use std::net::IpAddr;

use hickory_proto::rr::rdata::{A, AAAA, CNAME, MX, SRV, TXT};
use hickory_proto::rr::{Name, RData, Record, RecordType};
use std::str::FromStr;

use crate::domain::{format_addr, Domain};
use crate::error::{Error, Result};

/// Transport type of an upstream nameserver. Only UDP is supported by this
/// peer; other kinds are skipped with a warning when building handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameServerType {
    Udp,
    Tcp,
}

impl std::fmt::Display for NameServerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NameServerType::Udp => write!(f, "udp"),
            NameServerType::Tcp => write!(f, "tcp"),
        }
    }
}

/// A single upstream nameserver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameServer {
    pub ip: IpAddr,
    pub port: u16,
    pub ns_type: NameServerType,
}

impl NameServer {
    /// UDP nameserver on the default port.
    pub fn udp(ip: IpAddr, port: u16) -> Self {
        Self {
            ip,
            port,
            ns_type: NameServerType::Udp,
        }
    }

    /// `host:port` form, IPv6 bracketed.
    pub fn host_port(&self) -> String {
        format_addr(self.ip, self.port)
    }
}

/// A group of nameservers claiming a set of match domains.
///
/// A primary group implicitly claims the root zone and must not rely on its
/// `domains` list; a non-primary group must carry at least one domain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameServerGroup {
    pub name_servers: Vec<NameServer>,
    pub domains: Vec<Domain>,
    pub primary: bool,
    pub search_domains: Vec<Domain>,
    pub enabled: bool,
}

impl NameServerGroup {
    /// The UDP subset of this group's servers in `host:port` form.
    pub fn udp_servers(&self) -> Vec<String> {
        self.name_servers
            .iter()
            .filter_map(|ns| match ns.ns_type {
                NameServerType::Udp => Some(ns.host_port()),
                _ => {
                    log::warn!(
                        "skipping nameserver {} with type {}, this peer supports only udp",
                        ns.ip,
                        ns.ns_type
                    );
                    None
                }
            })
            .collect()
    }
}

/// Record classes accepted for local records. Everything outside the
/// Internet class is dropped with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordClass {
    #[default]
    In,
    Other,
}

impl std::fmt::Display for RecordClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordClass::In => write!(f, "IN"),
            RecordClass::Other => write!(f, "non-IN"),
        }
    }
}

/// Record kinds a custom zone may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    A,
    Aaaa,
    Cname,
    Txt,
    Mx,
    Srv,
}

impl RecordKind {
    pub fn record_type(&self) -> RecordType {
        match self {
            RecordKind::A => RecordType::A,
            RecordKind::Aaaa => RecordType::AAAA,
            RecordKind::Cname => RecordType::CNAME,
            RecordKind::Txt => RecordType::TXT,
            RecordKind::Mx => RecordType::MX,
            RecordKind::Srv => RecordType::SRV,
        }
    }
}

impl std::fmt::Display for RecordKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKind::A => write!(f, "A"),
            RecordKind::Aaaa => write!(f, "AAAA"),
            RecordKind::Cname => write!(f, "CNAME"),
            RecordKind::Txt => write!(f, "TXT"),
            RecordKind::Mx => write!(f, "MX"),
            RecordKind::Srv => write!(f, "SRV"),
        }
    }
}

/// A synthetic record served by the local resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimpleRecord {
    /// Fully qualified owner name.
    pub name: Domain,
    pub class: RecordClass,
    pub kind: RecordKind,
    pub ttl: u32,
    /// Textual record data, parsed according to `kind`.
    pub rdata: String,
}

impl SimpleRecord {
    /// Convert into a wire record. Fails on rdata that does not parse for
    /// the record kind.
    pub fn to_record(&self) -> Result<Record> {
        let name = Name::from_str(self.name.as_str())?;
        let rdata = self.parse_rdata()?;
        Ok(Record::from_rdata(name, self.ttl, rdata))
    }

    fn parse_rdata(&self) -> Result<RData> {
        let data = self.rdata.trim();
        let invalid = |detail: &str| {
            Error::InvalidRecord(format!(
                "{} record for {}: {}",
                self.kind, self.name, detail
            ))
        };

        match self.kind {
            RecordKind::A => {
                let ip = data.parse().map_err(|_| invalid("bad IPv4 address"))?;
                Ok(RData::A(A(ip)))
            }
            RecordKind::Aaaa => {
                let ip = data.parse().map_err(|_| invalid("bad IPv6 address"))?;
                Ok(RData::AAAA(AAAA(ip)))
            }
            RecordKind::Cname => {
                let target = Name::from_str(data).map_err(|_| invalid("bad target name"))?;
                Ok(RData::CNAME(CNAME(target)))
            }
            RecordKind::Txt => Ok(RData::TXT(TXT::new(vec![data.to_string()]))),
            RecordKind::Mx => {
                let (pref, host) = data
                    .split_once(' ')
                    .ok_or_else(|| invalid("expected '<preference> <exchange>'"))?;
                let preference = pref.parse().map_err(|_| invalid("bad preference"))?;
                let exchange = Name::from_str(host.trim()).map_err(|_| invalid("bad exchange"))?;
                Ok(RData::MX(MX::new(preference, exchange)))
            }
            RecordKind::Srv => {
                let parts: Vec<&str> = data.split_whitespace().collect();
                if parts.len() != 4 {
                    return Err(invalid("expected '<priority> <weight> <port> <target>'"));
                }
                let priority = parts[0].parse().map_err(|_| invalid("bad priority"))?;
                let weight = parts[1].parse().map_err(|_| invalid("bad weight"))?;
                let port = parts[2].parse().map_err(|_| invalid("bad port"))?;
                let target = Name::from_str(parts[3]).map_err(|_| invalid("bad target"))?;
                Ok(RData::SRV(SRV::new(priority, weight, port, target)))
            }
        }
    }
}

/// A user-defined zone of synthetic records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomZone {
    pub domain: Domain,
    pub records: Vec<SimpleRecord>,
}

/// The full DNS configuration delivered by the control plane.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsConfig {
    pub service_enable: bool,
    pub custom_zones: Vec<CustomZone>,
    pub name_server_groups: Vec<NameServerGroup>,
}

impl DnsConfig {
    /// Validate group-level invariants. Violations reject the whole update.
    pub fn validate(&self) -> Result<()> {
        for group in &self.name_server_groups {
            if !group.primary && group.domains.is_empty() {
                return Err(Error::Config(
                    "received a non-primary nameserver group with an empty domain list".into(),
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn record(kind: RecordKind, rdata: &str) -> SimpleRecord {
        SimpleRecord {
            name: Domain::new("host1.corp.local.").unwrap(),
            class: RecordClass::In,
            kind,
            ttl: 300,
            rdata: rdata.to_string(),
        }
    }

    #[test]
    fn test_a_record_parses() {
        let rec = record(RecordKind::A, "10.0.0.5").to_record().unwrap();
        assert_eq!(rec.record_type(), RecordType::A);
        assert_eq!(rec.ttl(), 300);
    }

    #[test]
    fn test_aaaa_record_parses() {
        let rec = record(RecordKind::Aaaa, "fd00::5").to_record().unwrap();
        assert_eq!(rec.record_type(), RecordType::AAAA);
    }

    #[test]
    fn test_cname_record_parses() {
        let rec = record(RecordKind::Cname, "target.corp.local.")
            .to_record()
            .unwrap();
        assert_eq!(rec.record_type(), RecordType::CNAME);
    }

    #[test]
    fn test_mx_record_parses() {
        let rec = record(RecordKind::Mx, "10 mail.corp.local.")
            .to_record()
            .unwrap();
        assert_eq!(rec.record_type(), RecordType::MX);
    }

    #[test]
    fn test_srv_record_parses() {
        let rec = record(RecordKind::Srv, "0 5 5060 sip.corp.local.")
            .to_record()
            .unwrap();
        assert_eq!(rec.record_type(), RecordType::SRV);
    }

    #[test]
    fn test_bad_rdata_rejected() {
        assert!(record(RecordKind::A, "not-an-ip").to_record().is_err());
        assert!(record(RecordKind::Mx, "nopref").to_record().is_err());
        assert!(record(RecordKind::Srv, "1 2 3").to_record().is_err());
    }

    #[test]
    fn test_udp_servers_skip_tcp() {
        let group = NameServerGroup {
            name_servers: vec![
                NameServer::udp(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)), 53),
                NameServer {
                    ip: IpAddr::V4(Ipv4Addr::new(2, 2, 2, 2)),
                    port: 53,
                    ns_type: NameServerType::Tcp,
                },
            ],
            domains: vec![],
            primary: true,
            search_domains: vec![],
            enabled: true,
        };
        assert_eq!(group.udp_servers(), vec!["1.1.1.1:53".to_string()]);
    }

    #[test]
    fn test_validate_rejects_non_primary_without_domains() {
        let cfg = DnsConfig {
            service_enable: true,
            custom_zones: vec![],
            name_server_groups: vec![NameServerGroup {
                name_servers: vec![NameServer::udp(IpAddr::V4(Ipv4Addr::LOCALHOST), 53)],
                domains: vec![],
                primary: false,
                search_domains: vec![],
                enabled: true,
            }],
        };
        assert!(cfg.validate().is_err());
    }
}
