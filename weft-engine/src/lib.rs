//! weft-engine - split-horizon DNS orchestration for the weft mesh-VPN client
//!
//! The engine ties the DNS data path to the rest of the client:
//!
//! - [`DnsServer`] applies serialized control-plane updates, builds the
//!   per-zone handler set, keeps the host's resolver configuration in sync
//!   and reacts to upstream deactivation
//! - [`StatusRecorder`] collects per-group health snapshots
//! - [`SearchDomainNotifier`] pushes search-domain changes to mobile
//!   platform callbacks
//! - [`HostsDnsHolder`] keeps the host's original resolvers for the
//!   root-zone stand-in and last-resort fallback
//!
//! # Architecture
//!
//! ```text
//!  control plane ──serial──▶ DnsServer ──────▶ weft-host (system resolver)
//!                               │
//!                               ▼
//!                        weft-dns chain ◀──── queries (listener / netstack)
//!                        local / upstream / fallback handlers
//! ```

pub mod error;
mod hash;
mod host_config;
mod hosts;
mod notifier;
mod registry;
mod server;
mod status;

pub use error::{Error, Result};
pub use hash::config_hash;
pub use host_config::dns_config_to_host_config;
pub use hosts::HostsDnsHolder;
pub use notifier::{SearchDomainListener, SearchDomainNotifier};
pub use registry::{clear_server_dns, server_dns, set_server_dns};
pub use server::{DnsServer, HostManagerFactory, ServerOptions};
pub use status::{group_key, NsGroupState, StatusRecorder};

// The overlay-interface abstraction lives with the service front ends.
pub use weft_dns::OverlayInterface;
