//! Shared fixtures for the orchestrator integration tests

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use hickory_proto::op::{Message, Query, ResponseCode};
use hickory_proto::rr::rdata::A;
use hickory_proto::rr::{Name, RData, Record, RecordType};
use std::str::FromStr;
use tokio::net::UdpSocket;

use weft_dns::{response_with_code, OverlayInterface};
use weft_host::{HostDnsConfig, HostManager, ShutdownState, StateManager};

/// Kernel-mode overlay interface fixture.
pub struct TestIface;

impl OverlayInterface for TestIface {
    fn name(&self) -> &str {
        "wt0"
    }
    fn address(&self) -> Ipv4Addr {
        Ipv4Addr::new(100, 64, 0, 2)
    }
    fn network(&self) -> (Ipv4Addr, u8) {
        (Ipv4Addr::new(100, 64, 0, 0), 16)
    }
    fn is_userspace_bind(&self) -> bool {
        false
    }
}

/// Host manager double recording every applied configuration.
pub struct MockHostManager {
    pub custom_port: bool,
    pub applied: Mutex<Vec<HostDnsConfig>>,
    pub restores: AtomicUsize,
}

impl MockHostManager {
    pub fn new(custom_port: bool) -> Arc<Self> {
        Arc::new(Self {
            custom_port,
            applied: Mutex::new(Vec::new()),
            restores: AtomicUsize::new(0),
        })
    }

    pub fn last_applied(&self) -> Option<HostDnsConfig> {
        self.applied.lock().unwrap().last().cloned()
    }

    pub fn applied_configs(&self) -> Vec<HostDnsConfig> {
        self.applied.lock().unwrap().clone()
    }
}

impl HostManager for MockHostManager {
    fn apply_dns_config(
        &self,
        cfg: &HostDnsConfig,
        state: &dyn StateManager,
    ) -> weft_host::Result<()> {
        self.applied.lock().unwrap().push(cfg.clone());
        state.update_state(ShutdownState {
            config: Some(cfg.clone()),
            original_resolv_conf: None,
        });
        Ok(())
    }

    fn restore_host_dns(&self) -> weft_host::Result<()> {
        self.restores.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn support_custom_port(&self) -> bool {
        self.custom_port
    }
}

/// State manager double counting checkpoint traffic.
#[derive(Default)]
pub struct MockStateManager {
    pub updates: AtomicUsize,
    pub deletes: AtomicUsize,
    pub persists: AtomicUsize,
}

impl StateManager for MockStateManager {
    fn update_state(&self, _state: ShutdownState) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }
    fn delete_state(&self) {
        self.deletes.fetch_add(1, Ordering::SeqCst);
    }
    fn persist(&self) -> weft_host::Result<()> {
        self.persists.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Loopback UDP server answering every A query with `ip`.
pub async fn answering_upstream(ip: Ipv4Addr) -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        while let Ok((len, src)) = socket.recv_from(&mut buf).await {
            let Ok(query) = Message::from_vec(&buf[..len]) else {
                continue;
            };
            let mut response = response_with_code(&query, ResponseCode::NoError);
            if let Some(q) = query.queries().first() {
                response.add_answer(Record::from_rdata(q.name().clone(), 60, RData::A(A(ip))));
            }
            let _ = socket.send_to(&response.to_vec().unwrap(), src).await;
        }
    });
    addr
}

/// Loopback UDP server that swallows every query.
pub async fn silent_upstream() -> SocketAddr {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 4096];
        while socket.recv_from(&mut buf).await.is_ok() {}
    });
    addr
}

/// Send one A query to the virtual resolver and wait for the reply.
pub async fn query_a(server: (IpAddr, u16), name: &str) -> Message {
    let mut query = Message::new();
    query.set_id(rand_id(name));
    query.set_recursion_desired(true);
    query.add_query(Query::query(Name::from_str(name).unwrap(), RecordType::A));

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(&query.to_vec().unwrap(), server)
        .await
        .unwrap();

    let mut buf = vec![0u8; 4096];
    let (len, _) = tokio::time::timeout(Duration::from_secs(3), client.recv_from(&mut buf))
        .await
        .expect("query timed out")
        .unwrap();
    Message::from_vec(&buf[..len]).unwrap()
}

/// The single A-record address of a response.
pub fn answer_ip(response: &Message) -> Option<Ipv4Addr> {
    response.answers().iter().find_map(|r| match r.data() {
        Some(RData::A(a)) => Some(a.0),
        _ => None,
    })
}

fn rand_id(seed: &str) -> u16 {
    seed.bytes().fold(17u16, |acc, b| acc.wrapping_mul(31).wrapping_add(b as u16))
}
