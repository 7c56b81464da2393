//! weft-host - host-side DNS takeover for the weft mesh-VPN client
//!
//! This crate makes the virtual in-tunnel resolver the host's DNS and puts
//! everything back afterwards:
//!
//! - **Manager trait**: install a host DNS configuration, restore the
//!   originals, report capabilities (custom ports, captured nameservers)
//! - **Per-OS back ends**: resolv.conf on Linux, the SystemConfiguration
//!   dynamic store on macOS, NRPT registry rules on Windows
//! - **Shutdown checkpoint**: the state persisted on every apply so an
//!   unclean exit can still be rolled back
//!
//! # Platform Requirements
//!
//! All back ends need the privileges of the VPN daemon itself: write access
//! to `/etc/resolv.conf` on Linux, root for `scutil` on macOS, and
//! Administrator for registry edits on Windows.

pub mod config;
pub mod error;
pub mod manager;

#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(target_os = "macos")]
pub mod macos;

#[cfg(target_os = "windows")]
pub mod windows;

use std::sync::Arc;

pub use config::{DomainConfig, HostDnsConfig, ShutdownState, SHUTDOWN_STATE_KEY};
pub use error::{Error, Result};
pub use manager::{HostManager, NoopHostManager, StateManager};

/// Create the host manager for the current platform.
pub fn new_host_manager() -> Result<Arc<dyn HostManager>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Arc::new(linux::ResolvConfManager::new()?))
    }
    #[cfg(target_os = "macos")]
    {
        Ok(Arc::new(macos::ScutilManager::new()?))
    }
    #[cfg(target_os = "windows")]
    {
        Ok(Arc::new(windows::NrptManager::new()?))
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        Err(Error::Unsupported)
    }
}
