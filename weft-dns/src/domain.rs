//! Domain name normalization and address formatting
//!
//! Every domain that enters the resolver core passes through [`Domain::new`],
//! which lowercases, punycode-encodes and fully qualifies the name. All maps
//! and comparisons inside the core operate on this normalized form.

use std::fmt;
use std::net::IpAddr;

use crate::error::{Error, Result};

/// The DNS root zone label, matching every name.
pub const ROOT_ZONE: &str = ".";

/// Default DNS port
pub const DEFAULT_DNS_PORT: u16 = 53;

/// A normalized, fully-qualified domain name.
///
/// The inner string is always lowercase, punycode-encoded and carries a
/// trailing dot. The root zone is represented as `"."`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Domain(String);

impl Domain {
    /// Normalize a raw domain string into a [`Domain`].
    ///
    /// Accepts unicode names (IDN), optionally fully qualified, in any case.
    /// Fails on empty input or names punycode cannot encode.
    pub fn new(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidDomain(raw.to_string()));
        }
        if trimmed == ROOT_ZONE {
            return Ok(Domain(ROOT_ZONE.to_string()));
        }

        let relative = trimmed.trim_end_matches('.');
        if relative.is_empty() {
            return Err(Error::InvalidDomain(raw.to_string()));
        }

        let ascii = idna::domain_to_ascii(relative)
            .map_err(|_| Error::InvalidDomain(raw.to_string()))?;
        if ascii.is_empty() {
            return Err(Error::InvalidDomain(raw.to_string()));
        }

        let mut normalized = ascii.to_lowercase();
        normalized.push('.');
        Ok(Domain(normalized))
    }

    /// The root zone `"."`.
    pub fn root() -> Self {
        Domain(ROOT_ZONE.to_string())
    }

    /// The normalized name, with trailing dot.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name without its trailing dot, as host-facing tools expect it.
    /// The root zone stays `"."`.
    pub fn without_trailing_dot(&self) -> &str {
        if self.is_root() {
            ROOT_ZONE
        } else {
            self.0.trim_end_matches('.')
        }
    }

    /// Whether this is the root zone.
    pub fn is_root(&self) -> bool {
        self.0 == ROOT_ZONE
    }

    /// Number of labels; the root zone has zero.
    pub fn label_count(&self) -> usize {
        if self.is_root() {
            0
        } else {
            self.0.trim_end_matches('.').split('.').count()
        }
    }

    /// Whether this zone is a suffix of `name` on a label boundary.
    ///
    /// `name` must be a normalized FQDN (lowercase, trailing dot). The root
    /// zone matches every name.
    pub fn is_suffix_of(&self, name: &str) -> bool {
        if self.is_root() {
            return true;
        }
        if name == self.0 {
            return true;
        }
        name.len() > self.0.len()
            && name.ends_with(&self.0)
            && name.as_bytes()[name.len() - self.0.len() - 1] == b'.'
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Domain {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Domain::new(&value)
    }
}

impl From<Domain> for String {
    fn from(d: Domain) -> Self {
        d.0
    }
}

/// Lowercase a query name and make sure it carries a trailing dot, so it can
/// be compared against [`Domain`] zones.
pub fn normalize_query_name(name: &str) -> String {
    let mut n = name.to_lowercase();
    if !n.ends_with('.') {
        n.push('.');
    }
    n
}

/// Format a nameserver address as `host:port`, bracketing IPv6 literals.
pub fn format_addr(ip: IpAddr, port: u16) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{}:{}", v4, port),
        IpAddr::V6(v6) => format!("[{}]:{}", v6, port),
    }
}

/// Normalize a raw server address string to `host:port` form.
///
/// Bare IPs get the default DNS port appended; IPv6 literals are bracketed.
pub fn normalize_server_addr(raw: &str) -> Result<String> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(Error::Config("empty nameserver address".into()));
    }

    if let Ok(ip) = s.parse::<IpAddr>() {
        return Ok(format_addr(ip, DEFAULT_DNS_PORT));
    }
    if let Ok(sa) = s.parse::<std::net::SocketAddr>() {
        return Ok(format_addr(sa.ip(), sa.port()));
    }
    // [v6] without port
    if let Some(inner) = s.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        if let Ok(ip) = inner.parse::<IpAddr>() {
            return Ok(format_addr(ip, DEFAULT_DNS_PORT));
        }
    }

    Err(Error::Config(format!(
        "cannot parse nameserver address '{}'",
        s
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_normalize_basic() {
        let d = Domain::new("Example.COM").unwrap();
        assert_eq!(d.as_str(), "example.com.");
    }

    #[test]
    fn test_normalize_trailing_dot() {
        let d = Domain::new("corp.local.").unwrap();
        assert_eq!(d.as_str(), "corp.local.");
    }

    #[test]
    fn test_normalize_idempotent() {
        let once = Domain::new("Bücher.example").unwrap();
        let twice = Domain::new(once.as_str()).unwrap();
        assert_eq!(once, twice);
        assert!(once.as_str().starts_with("xn--"));
    }

    #[test]
    fn test_root_zone() {
        let root = Domain::new(".").unwrap();
        assert!(root.is_root());
        assert_eq!(root.label_count(), 0);
        assert_eq!(root, Domain::root());
    }

    #[test]
    fn test_empty_rejected() {
        assert!(Domain::new("").is_err());
        assert!(Domain::new("   ").is_err());
    }

    #[test]
    fn test_label_count() {
        assert_eq!(Domain::new("corp.local.").unwrap().label_count(), 2);
        assert_eq!(Domain::new("a.b.c.d").unwrap().label_count(), 4);
    }

    #[test]
    fn test_suffix_match() {
        let zone = Domain::new("corp.local.").unwrap();
        assert!(zone.is_suffix_of("host1.corp.local."));
        assert!(zone.is_suffix_of("corp.local."));
        assert!(!zone.is_suffix_of("othercorp.local."));
        assert!(!zone.is_suffix_of("example.com."));
        assert!(Domain::root().is_suffix_of("anything.at.all."));
    }

    #[test]
    fn test_without_trailing_dot() {
        assert_eq!(
            Domain::new("corp.local.").unwrap().without_trailing_dot(),
            "corp.local"
        );
        assert_eq!(Domain::root().without_trailing_dot(), ".");
    }

    #[test]
    fn test_format_addr_v4() {
        assert_eq!(
            format_addr(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)), 53),
            "1.1.1.1:53"
        );
    }

    #[test]
    fn test_format_addr_v6() {
        assert_eq!(
            format_addr(IpAddr::V6(Ipv6Addr::LOCALHOST), 5353),
            "[::1]:5353"
        );
    }

    #[test]
    fn test_normalize_server_addr() {
        assert_eq!(normalize_server_addr("8.8.8.8").unwrap(), "8.8.8.8:53");
        assert_eq!(
            normalize_server_addr("8.8.8.8:5353").unwrap(),
            "8.8.8.8:5353"
        );
        assert_eq!(normalize_server_addr("::1").unwrap(), "[::1]:53");
        assert_eq!(normalize_server_addr("[::1]").unwrap(), "[::1]:53");
        assert_eq!(normalize_server_addr("[::1]:5353").unwrap(), "[::1]:5353");
        assert!(normalize_server_addr("not an ip").is_err());
        assert!(normalize_server_addr("").is_err());
    }

    #[test]
    fn test_normalize_query_name() {
        assert_eq!(normalize_query_name("Host1.Corp.Local"), "host1.corp.local.");
        assert_eq!(normalize_query_name("example.com."), "example.com.");
    }
}
