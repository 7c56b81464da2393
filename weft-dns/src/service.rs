//! DNS service front ends
//!
//! Two ways for queries to reach the handler chain: a UDP socket bound on a
//! loopback or in-tunnel address, or an in-process hook that a userspace
//! network stack calls directly when the data plane never touches kernel
//! sockets.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use hickory_proto::op::{Message, ResponseCode};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use crate::domain::DEFAULT_DNS_PORT;
use crate::error::{Error, Result};
use crate::handler::{response_with_code, DnsHandler, HandlerOutcome};

/// Maximum DNS datagram we accept or send without truncation
const MAX_DNS_MESSAGE_SIZE: usize = 512;

/// Receive buffer size for inbound queries
const RECV_BUFFER_SIZE: usize = 4096;

/// The mesh-VPN interface as the DNS core sees it.
pub trait OverlayInterface: Send + Sync {
    /// Interface name, for logs.
    fn name(&self) -> &str;

    /// The device's in-tunnel address.
    fn address(&self) -> Ipv4Addr;

    /// The overlay network as `(base address, prefix length)`.
    fn network(&self) -> (Ipv4Addr, u8);

    /// Whether packets flow through an in-process userspace stack instead of
    /// kernel sockets.
    fn is_userspace_bind(&self) -> bool;
}

/// Front end that receives DNS queries and feeds them to the root mux.
#[async_trait]
pub trait DnsService: Send + Sync {
    /// Start receiving queries. Idempotent.
    async fn listen(&self) -> Result<()>;

    /// Stop receiving queries.
    async fn stop(&self);

    /// Install the root-zone mux every query is dispatched through.
    fn register_mux(&self, handler: Arc<dyn DnsHandler>);

    /// The address the virtual resolver is reachable at.
    fn runtime_ip(&self) -> IpAddr;

    /// The port the virtual resolver is reachable at.
    fn runtime_port(&self) -> u16;
}

/// Resolve one raw datagram through the mux, producing the reply bytes.
async fn resolve_message(mux: Option<Arc<dyn DnsHandler>>, data: &[u8]) -> Option<Vec<u8>> {
    let query = match Message::from_vec(data) {
        Ok(query) => query,
        Err(err) => {
            log::debug!("dropping malformed DNS query: {}", err);
            return None;
        }
    };

    let response = match mux {
        Some(mux) => match mux.handle(&query).await {
            HandlerOutcome::Answer(response) => response,
            HandlerOutcome::NotMine => response_with_code(&query, ResponseCode::ServFail),
        },
        None => response_with_code(&query, ResponseCode::ServFail),
    };

    match encode_response(&response, &query) {
        Ok(bytes) => Some(bytes),
        Err(err) => {
            log::debug!("failed to serialize DNS response: {}", err);
            None
        }
    }
}

/// Serialize a response, truncating it per RFC 1035 when it exceeds the UDP
/// message limit.
fn encode_response(response: &Message, query: &Message) -> Result<Vec<u8>> {
    let bytes = response.to_vec()?;
    if bytes.len() <= MAX_DNS_MESSAGE_SIZE {
        return Ok(bytes);
    }
    let mut truncated = response_with_code(query, response.response_code());
    truncated.set_truncated(true);
    Ok(truncated.to_vec()?)
}

/// UDP-socket-backed DNS service.
pub struct ListenerService {
    configured: SocketAddr,
    runtime: RwLock<Option<SocketAddr>>,
    mux: Arc<RwLock<Option<Arc<dyn DnsHandler>>>>,
    shutdown_tx: broadcast::Sender<()>,
    listening: AtomicBool,
}

impl ListenerService {
    /// Create a listener for `addr`, defaulting to `127.0.0.1:53`.
    pub fn new(addr: Option<SocketAddr>) -> Self {
        let configured = addr.unwrap_or_else(|| {
            SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_DNS_PORT)
        });
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            configured,
            runtime: RwLock::new(None),
            mux: Arc::new(RwLock::new(None)),
            shutdown_tx,
            listening: AtomicBool::new(false),
        }
    }

    async fn bind(&self) -> Result<UdpSocket> {
        match UdpSocket::bind(self.configured).await {
            Ok(socket) => Ok(socket),
            Err(err) if self.configured.port() == DEFAULT_DNS_PORT => {
                log::warn!(
                    "failed to bind DNS listener on {}: {}; falling back to a high port",
                    self.configured,
                    err
                );
                let fallback = SocketAddr::new(self.configured.ip(), 0);
                UdpSocket::bind(fallback).await.map_err(Error::from)
            }
            Err(err) => Err(err.into()),
        }
    }
}

#[async_trait]
impl DnsService for ListenerService {
    async fn listen(&self) -> Result<()> {
        if self.listening.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let socket = match self.bind().await {
            Ok(socket) => socket,
            Err(err) => {
                self.listening.store(false, Ordering::SeqCst);
                return Err(err);
            }
        };
        let local = socket.local_addr()?;
        *self.runtime.write().expect("runtime lock poisoned") = Some(local);
        log::info!("DNS service listening on {}", local);

        let socket = Arc::new(socket);
        let mux = self.mux.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut buf = vec![0u8; RECV_BUFFER_SIZE];
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        log::info!("DNS service on {} shutting down", local);
                        break;
                    }
                    result = socket.recv_from(&mut buf) => {
                        match result {
                            Ok((len, src)) => {
                                let data = buf[..len].to_vec();
                                let socket = socket.clone();
                                let mux = mux.read().expect("mux lock poisoned").clone();
                                tokio::spawn(async move {
                                    if let Some(reply) = resolve_message(mux, &data).await {
                                        if let Err(err) = socket.send_to(&reply, src).await {
                                            log::debug!("failed to send DNS response to {}: {}", src, err);
                                        }
                                    }
                                });
                            }
                            Err(err) => {
                                log::error!("DNS service recv error: {}", err);
                            }
                        }
                    }
                }
            }
        });

        Ok(())
    }

    async fn stop(&self) {
        if self.listening.swap(false, Ordering::SeqCst) {
            let _ = self.shutdown_tx.send(());
        }
    }

    fn register_mux(&self, handler: Arc<dyn DnsHandler>) {
        *self.mux.write().expect("mux lock poisoned") = Some(handler);
    }

    fn runtime_ip(&self) -> IpAddr {
        self.runtime
            .read()
            .expect("runtime lock poisoned")
            .map(|a| a.ip())
            .unwrap_or_else(|| self.configured.ip())
    }

    fn runtime_port(&self) -> u16 {
        self.runtime
            .read()
            .expect("runtime lock poisoned")
            .map(|a| a.port())
            .unwrap_or_else(|| self.configured.port())
    }
}

/// In-process DNS service for userspace-bind mode.
///
/// No OS socket is opened; the userspace network stack hands datagrams to
/// [`MemoryService::handle_message`] and writes the returned reply back into
/// the tunnel. The advertised resolver address is the second-to-last host of
/// the overlay network.
pub struct MemoryService {
    ip: Ipv4Addr,
    mux: RwLock<Option<Arc<dyn DnsHandler>>>,
}

impl MemoryService {
    pub fn new(iface: &dyn OverlayInterface) -> Self {
        let (base, prefix) = iface.network();
        Self {
            ip: second_to_last_host(base, prefix),
            mux: RwLock::new(None),
        }
    }

    /// The in-process hook: resolve one raw DNS message, returning the reply
    /// bytes, or `None` for unparseable input.
    pub async fn handle_message(&self, data: &[u8]) -> Option<Vec<u8>> {
        let mux = self.mux.read().expect("mux lock poisoned").clone();
        resolve_message(mux, data).await
    }
}

#[async_trait]
impl DnsService for MemoryService {
    async fn listen(&self) -> Result<()> {
        log::debug!("in-memory DNS service ready on {}", self.ip);
        Ok(())
    }

    async fn stop(&self) {}

    fn register_mux(&self, handler: Arc<dyn DnsHandler>) {
        *self.mux.write().expect("mux lock poisoned") = Some(handler);
    }

    fn runtime_ip(&self) -> IpAddr {
        IpAddr::V4(self.ip)
    }

    fn runtime_port(&self) -> u16 {
        DEFAULT_DNS_PORT
    }
}

/// The second-to-last usable IPv4 address of `base/prefix`.
fn second_to_last_host(base: Ipv4Addr, prefix: u8) -> Ipv4Addr {
    if prefix >= 31 {
        log::warn!("overlay network /{} too small for a virtual resolver address", prefix);
        return base;
    }
    let mask = u32::MAX << (32 - prefix);
    let network = u32::from(base) & mask;
    let size = 1u32 << (32 - prefix);
    Ipv4Addr::from(network + size - 2)
}
