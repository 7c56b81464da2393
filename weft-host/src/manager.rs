//! Host-manager abstraction
//!
//! The orchestrator only ever talks to the host through these traits; the
//! per-OS back ends live in their own modules and are selected by the
//! platform factory in `lib.rs`.

use std::net::IpAddr;

use crate::config::{HostDnsConfig, ShutdownState};
use crate::error::Result;

/// Persists the shutdown checkpoint between applies.
pub trait StateManager: Send + Sync {
    /// Replace the in-memory checkpoint.
    fn update_state(&self, state: ShutdownState);

    /// Drop the checkpoint (clean shutdown).
    fn delete_state(&self);

    /// Flush the checkpoint to durable storage.
    fn persist(&self) -> Result<()>;
}

/// Installs and removes the virtual resolver as the host's DNS.
pub trait HostManager: Send + Sync {
    /// Make `cfg` the active host DNS configuration, updating the shutdown
    /// checkpoint through `state` first so a crash mid-apply stays
    /// recoverable.
    fn apply_dns_config(&self, cfg: &HostDnsConfig, state: &dyn StateManager) -> Result<()>;

    /// Revert the host to the resolvers captured before takeover.
    fn restore_host_dns(&self) -> Result<()>;

    /// Whether this back end can install a resolver on a non-default port.
    fn support_custom_port(&self) -> bool;

    /// The resolvers that were active before takeover, when this back end
    /// captures them. Empty means the capability is unsupported.
    fn original_nameservers(&self) -> Vec<IpAddr> {
        Vec::new()
    }
}

/// Placeholder manager used before initialization and after teardown.
/// Accepts every apply without touching the system.
pub struct NoopHostManager;

impl HostManager for NoopHostManager {
    fn apply_dns_config(&self, _cfg: &HostDnsConfig, _state: &dyn StateManager) -> Result<()> {
        Ok(())
    }

    fn restore_host_dns(&self) -> Result<()> {
        Ok(())
    }

    fn support_custom_port(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingState(AtomicUsize);

    impl StateManager for CountingState {
        fn update_state(&self, _state: ShutdownState) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
        fn delete_state(&self) {}
        fn persist(&self) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_noop_accepts_everything() {
        let manager = NoopHostManager;
        let state = CountingState(AtomicUsize::new(0));
        assert!(manager
            .apply_dns_config(&HostDnsConfig::default(), &state)
            .is_ok());
        assert!(manager.restore_host_dns().is_ok());
        assert!(manager.support_custom_port());
        assert!(manager.original_nameservers().is_empty());
        assert_eq!(state.0.load(Ordering::SeqCst), 0);
    }
}
