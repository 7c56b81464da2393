//! Upstream resolver with failure tracking and temporary deactivation
//!
//! Forwards queries for one match zone to a list of UDP upstream servers in
//! declared order. Sustained failure quarantines the resolver: it answers
//! SERVFAIL without network traffic, notifies the orchestrator through its
//! deactivate hook and schedules a reactivation attempt with exponential
//! back-off.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, Query, ResponseCode};
use hickory_proto::rr::{Name, RecordType};
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};

use crate::domain::Domain;
use crate::error::{Error, Result};
use crate::handler::{response_with_code, DnsHandler, HandlerId, HandlerOutcome};

/// Per-server exchange deadline
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

/// Consecutive all-servers failures before the resolver deactivates itself
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Base reactivation back-off after a deactivation
pub const DEFAULT_REACTIVATE_AFTER: Duration = Duration::from_secs(60);

/// Upper bound for the exponential reactivation back-off
const REACTIVATE_CAP: Duration = Duration::from_secs(16 * 60);

/// Window for the availability probe
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Maximum UDP DNS response size
const MAX_UDP_RESPONSE_SIZE: usize = 4096;

type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Invoked once when the resolver quarantines itself after sustained failure.
pub type DeactivateHook = Arc<dyn Fn(String) -> HookFuture + Send + Sync>;

/// Invoked once when the resolver leaves quarantine.
pub type ReactivateHook = Arc<dyn Fn() -> HookFuture + Send + Sync>;

struct Callbacks {
    deactivate: DeactivateHook,
    reactivate: ReactivateHook,
}

impl Default for Callbacks {
    fn default() -> Self {
        Self {
            deactivate: Arc::new(|_| Box::pin(async {})),
            reactivate: Arc::new(|| Box::pin(async {})),
        }
    }
}

/// Forwards queries for one zone to a list of UDP upstream servers.
pub struct UpstreamResolver {
    servers: Vec<String>,
    zone: Domain,
    id: HandlerId,
    timeout: Duration,
    probe_timeout: Duration,
    reactivate_after: Duration,
    failure_threshold: u32,
    failures: Arc<AtomicU32>,
    quarantined: Arc<AtomicBool>,
    backoff_exp: Arc<AtomicU32>,
    callbacks: Arc<RwLock<Callbacks>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl UpstreamResolver {
    /// Create a resolver for `zone` over `servers` (`host:port` strings,
    /// tried in order).
    pub fn new(servers: Vec<String>, zone: Domain) -> Self {
        let id = resolver_id(&servers, &zone);
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            servers,
            zone,
            id,
            timeout: DEFAULT_UPSTREAM_TIMEOUT,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            reactivate_after: DEFAULT_REACTIVATE_AFTER,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            failures: Arc::new(AtomicU32::new(0)),
            quarantined: Arc::new(AtomicBool::new(false)),
            backoff_exp: Arc::new(AtomicU32::new(0)),
            callbacks: Arc::new(RwLock::new(Callbacks::default())),
            shutdown_tx,
        }
    }

    /// Override the per-server exchange deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self.probe_timeout = timeout.min(self.probe_timeout);
        self
    }

    /// Override the reactivation back-off base.
    pub fn with_reactivation_period(mut self, period: Duration) -> Self {
        self.reactivate_after = period;
        self
    }

    /// Override the consecutive-failure threshold.
    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    /// Install the orchestrator's deactivate/reactivate hooks.
    pub fn set_callbacks(&self, deactivate: DeactivateHook, reactivate: ReactivateHook) {
        let mut callbacks = self.callbacks.write().expect("callbacks lock poisoned");
        callbacks.deactivate = deactivate;
        callbacks.reactivate = reactivate;
    }

    /// The servers this resolver forwards to.
    pub fn servers(&self) -> &[String] {
        &self.servers
    }

    /// The zone this resolver matches.
    pub fn zone(&self) -> &Domain {
        &self.zone
    }

    /// Whether the resolver is currently quarantined.
    pub fn is_quarantined(&self) -> bool {
        self.quarantined.load(Ordering::SeqCst)
    }

    /// Quarantine the resolver, fire the deactivate hook once and schedule
    /// a reactivation attempt.
    async fn disable(&self, reason: String) {
        if self.quarantined.swap(true, Ordering::SeqCst) {
            return;
        }

        log::warn!(
            "temporarily deactivating upstream servers {:?} for zone {}: {}",
            self.servers,
            self.zone,
            reason
        );

        let deactivate = {
            let callbacks = self.callbacks.read().expect("callbacks lock poisoned");
            callbacks.deactivate.clone()
        };
        deactivate(reason).await;

        self.schedule_reactivation();
    }

    fn schedule_reactivation(&self) {
        let exp = self.backoff_exp.fetch_add(1, Ordering::SeqCst);
        let delay = exponential_backoff(self.reactivate_after, exp);

        let quarantined = self.quarantined.clone();
        let failures = self.failures.clone();
        let callbacks = self.callbacks.clone();
        let servers = self.servers.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    log::info!("reactivating upstream servers {:?}", servers);
                    quarantined.store(false, Ordering::SeqCst);
                    failures.store(0, Ordering::SeqCst);
                    let reactivate = {
                        let callbacks = callbacks.read().expect("callbacks lock poisoned");
                        callbacks.reactivate.clone()
                    };
                    reactivate().await;
                }
                _ = shutdown_rx.recv() => {}
            }
        });
    }

    fn probe_query(&self) -> Message {
        let apex = if self.zone.is_root() {
            Name::root()
        } else {
            Name::from_str(self.zone.as_str()).unwrap_or_else(|_| Name::root())
        };
        let mut query = Message::new();
        query.set_id(rand::random::<u16>());
        query.set_recursion_desired(true);
        query.add_query(Query::query(apex, RecordType::SOA));
        query
    }
}

#[async_trait]
impl DnsHandler for UpstreamResolver {
    async fn handle(&self, query: &Message) -> HandlerOutcome {
        if self.is_quarantined() {
            return HandlerOutcome::Answer(response_with_code(query, ResponseCode::ServFail));
        }

        let query_bytes = match query.to_vec() {
            Ok(bytes) => bytes,
            Err(err) => {
                log::debug!("failed to serialize query: {}", err);
                return HandlerOutcome::Answer(response_with_code(query, ResponseCode::FormErr));
            }
        };

        let mut last_failure = String::from("no upstream servers configured");
        for server in &self.servers {
            match exchange(server, &query_bytes, query.id(), self.timeout).await {
                Ok(response) if response.response_code() != ResponseCode::ServFail => {
                    self.failures.store(0, Ordering::SeqCst);
                    self.backoff_exp.store(0, Ordering::SeqCst);
                    return HandlerOutcome::Answer(response);
                }
                Ok(_) => {
                    last_failure = format!("upstream {} answered SERVFAIL", server);
                    log::debug!("{}", last_failure);
                }
                Err(err) => {
                    last_failure = format!("upstream {} failed: {}", server, err);
                    log::debug!("{}", last_failure);
                }
            }
        }

        let failures = self.failures.fetch_add(1, Ordering::SeqCst) + 1;
        log::warn!(
            "all upstream servers failed for zone {} ({} consecutive): {}",
            self.zone,
            failures,
            last_failure
        );
        if failures >= self.failure_threshold {
            self.disable(last_failure).await;
        }

        HandlerOutcome::Answer(response_with_code(query, ResponseCode::ServFail))
    }

    fn id(&self) -> HandlerId {
        self.id.clone()
    }

    async fn probe_availability(&self) {
        if self.servers.is_empty() || self.is_quarantined() {
            return;
        }

        let query = self.probe_query();
        let query_bytes = match query.to_vec() {
            Ok(bytes) => bytes,
            Err(err) => {
                log::debug!("failed to serialize probe query: {}", err);
                return;
            }
        };

        let (tx, mut rx) = mpsc::channel::<bool>(self.servers.len());
        for server in &self.servers {
            let server = server.clone();
            let query_bytes = query_bytes.clone();
            let timeout = self.probe_timeout;
            let id = query.id();
            let tx = tx.clone();
            tokio::spawn(async move {
                let ok = exchange(&server, &query_bytes, id, timeout).await.is_ok();
                let _ = tx.send(ok).await;
            });
        }
        drop(tx);

        let any_answered = tokio::time::timeout(self.probe_timeout, async {
            while let Some(ok) = rx.recv().await {
                if ok {
                    return true;
                }
            }
            false
        })
        .await
        .unwrap_or(false);

        if any_answered {
            self.failures.store(0, Ordering::SeqCst);
        } else {
            self.disable("probe: no upstream server responded".to_string())
                .await;
        }
    }

    async fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// One UDP exchange with a single upstream server.
async fn exchange(
    server: &str,
    query_bytes: &[u8],
    query_id: u16,
    timeout: Duration,
) -> Result<Message> {
    let addr = SocketAddr::from_str(server)
        .map_err(|_| Error::Upstream(format!("invalid upstream address '{}'", server)))?;

    let bind_addr = if addr.is_ipv6() {
        SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0)
    } else {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    };

    let socket = UdpSocket::bind(bind_addr).await?;
    socket.send_to(query_bytes, addr).await?;

    let mut buf = vec![0u8; MAX_UDP_RESPONSE_SIZE];
    let (len, _) = tokio::time::timeout(timeout, socket.recv_from(&mut buf))
        .await
        .map_err(|_| Error::Upstream(format!("query to {} timed out", server)))??;

    let response = Message::from_vec(&buf[..len])?;
    if response.id() != query_id {
        return Err(Error::Upstream(format!(
            "mismatched response id from {}",
            server
        )));
    }
    Ok(response)
}

fn exponential_backoff(base: Duration, exp: u32) -> Duration {
    let factor = 1u32 << exp.min(16);
    (base * factor).min(REACTIVATE_CAP.max(base))
}

/// Stable resolver identity over the sorted server list and the zone.
fn resolver_id(servers: &[String], zone: &Domain) -> HandlerId {
    let mut sorted = servers.to_vec();
    sorted.sort();
    let mut hasher = blake3::Hasher::new();
    for server in &sorted {
        hasher.update(server.as_bytes());
        hasher.update(b"|");
    }
    hasher.update(zone.as_str().as_bytes());
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest.as_bytes()[..8]);
    format!("upstream-{:016x}", u64::from_le_bytes(prefix))
}
