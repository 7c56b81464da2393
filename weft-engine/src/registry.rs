//! Process-wide server slot for platform hooks
//!
//! Mobile integrations call back into the permanent-upstream server from
//! platform code that cannot carry a handle, so the instance is published
//! in a process-scoped slot with an explicit set/clear lifecycle.

use std::sync::RwLock;

use crate::server::DnsServer;

static SERVER_DNS: RwLock<Option<DnsServer>> = RwLock::new(None);

/// Publish `server` as the process-wide DNS server.
pub fn set_server_dns(server: DnsServer) {
    *SERVER_DNS.write().expect("registry lock poisoned") = Some(server);
}

/// Clear the process-wide slot.
pub fn clear_server_dns() {
    *SERVER_DNS.write().expect("registry lock poisoned") = None;
}

/// The published server, if any.
pub fn server_dns() -> Option<DnsServer> {
    SERVER_DNS.read().expect("registry lock poisoned").clone()
}
