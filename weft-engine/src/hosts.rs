//! Holder for the host's original resolver addresses
//!
//! Captured before DNS takeover so they can back the root-zone stand-in
//! handler and the last-resort fallback.

use std::collections::BTreeSet;
use std::sync::RwLock;

use weft_dns::normalize_server_addr;

/// Thread-safe set of the host's original resolvers in `host:port` form.
pub struct HostsDnsHolder {
    servers: RwLock<BTreeSet<String>>,
}

impl HostsDnsHolder {
    pub fn new() -> Self {
        Self {
            servers: RwLock::new(BTreeSet::new()),
        }
    }

    /// Replace the stored set. Entries that do not parse are dropped with a
    /// warning; bare IPs get the default DNS port.
    pub fn set(&self, addrs: &[String]) {
        let mut normalized = BTreeSet::new();
        for addr in addrs {
            match normalize_server_addr(addr) {
                Ok(server) => {
                    normalized.insert(server);
                }
                Err(err) => log::warn!("ignoring host DNS server '{}': {}", addr, err),
            }
        }
        *self.servers.write().expect("hosts lock poisoned") = normalized;
    }

    /// The current set, sorted.
    pub fn get(&self) -> Vec<String> {
        self.servers
            .read()
            .expect("hosts lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.read().expect("hosts lock poisoned").is_empty()
    }
}

impl Default for HostsDnsHolder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_normalizes_and_sorts() {
        let holder = HostsDnsHolder::new();
        holder.set(&[
            "9.9.9.9".to_string(),
            "1.1.1.1:5353".to_string(),
            "bogus".to_string(),
        ]);
        assert_eq!(
            holder.get(),
            vec!["1.1.1.1:5353".to_string(), "9.9.9.9:53".to_string()]
        );
    }

    #[test]
    fn test_set_replaces() {
        let holder = HostsDnsHolder::new();
        holder.set(&["1.1.1.1".to_string()]);
        holder.set(&["8.8.8.8".to_string()]);
        assert_eq!(holder.get(), vec!["8.8.8.8:53".to_string()]);
    }

    #[test]
    fn test_empty() {
        let holder = HostsDnsHolder::new();
        assert!(holder.is_empty());
        holder.set(&["1.1.1.1".to_string()]);
        assert!(!holder.is_empty());
    }
}
