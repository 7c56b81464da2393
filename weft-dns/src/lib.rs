//! weft-dns - split-horizon DNS resolvers for the weft mesh-VPN client
//!
//! This crate provides the DNS data path that runs next to the VPN tunnel:
//!
//! - Normalized domain handling (lowercase, punycode, fully qualified)
//! - A local resolver serving synthetic records for overlay peers and
//!   user-defined custom zones
//! - An upstream resolver forwarding queries to UDP nameservers with
//!   failure tracking and temporary deactivation
//! - A priority-ordered handler chain that routes every query to exactly
//!   one backend, with fallthrough on negative answers
//! - Two service front ends: a UDP listener and an in-process hook for
//!   userspace-bind (netstack) mode
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use weft_dns::{Domain, HandlerChain, ListenerService, DnsService, UpstreamResolver};
//! use weft_dns::PRIORITY_DEFAULT;
//!
//! # async fn example() -> weft_dns::Result<()> {
//! let chain = Arc::new(HandlerChain::new());
//! let upstream = Arc::new(UpstreamResolver::new(
//!     vec!["1.1.1.1:53".to_string()],
//!     Domain::root(),
//! ));
//! chain.add_handler(Domain::root(), upstream, PRIORITY_DEFAULT);
//!
//! let service = ListenerService::new(None);
//! service.register_mux(chain);
//! service.listen().await?;
//! # Ok(())
//! # }
//! ```

mod chain;
mod config;
mod domain;
pub mod error;
mod handler;
mod local;
mod service;
mod upstream;

pub use chain::HandlerChain;
pub use config::{
    CustomZone, DnsConfig, NameServer, NameServerGroup, NameServerType, RecordClass, RecordKind,
    SimpleRecord,
};
pub use domain::{
    format_addr, normalize_query_name, normalize_server_addr, Domain, DEFAULT_DNS_PORT, ROOT_ZONE,
};
pub use error::{Error, Result};
pub use handler::{
    response_with_code, DnsHandler, HandlerId, HandlerOutcome, PRIORITY_DEFAULT,
    PRIORITY_FALLBACK, PRIORITY_MATCH_DOMAIN, PRIORITY_UPSTREAM,
};
pub use local::LocalResolver;
pub use service::{DnsService, ListenerService, MemoryService, OverlayInterface};
pub use upstream::{
    DeactivateHook, ReactivateHook, UpstreamResolver, DEFAULT_FAILURE_THRESHOLD,
    DEFAULT_REACTIVATE_AFTER, DEFAULT_UPSTREAM_TIMEOUT,
};
