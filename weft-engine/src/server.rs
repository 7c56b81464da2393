//! The DNS orchestrator
//!
//! `DnsServer` owns the handler chain, the service front end and the host
//! manager. It applies serialized control-plane updates, reconciles handler
//! registrations, reacts to upstream deactivation and keeps the host's DNS
//! configuration in sync. A single mutex serializes every
//! configuration-mutating path; query tasks never take it.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;

use weft_dns::{
    format_addr, CustomZone, DeactivateHook, DnsConfig, DnsHandler, DnsService, Domain,
    HandlerChain, HandlerId, ListenerService, LocalResolver, MemoryService, NameServerGroup,
    OverlayInterface, ReactivateHook, RecordClass, SimpleRecord, UpstreamResolver,
    DEFAULT_DNS_PORT, DEFAULT_FAILURE_THRESHOLD, DEFAULT_REACTIVATE_AFTER,
    DEFAULT_UPSTREAM_TIMEOUT, PRIORITY_DEFAULT, PRIORITY_FALLBACK, PRIORITY_MATCH_DOMAIN,
    PRIORITY_UPSTREAM,
};
use weft_host::{HostDnsConfig, HostManager, NoopHostManager, ShutdownState, StateManager};

use crate::error::{Error, Result};
use crate::hash::config_hash;
use crate::host_config::dns_config_to_host_config;
use crate::hosts::HostsDnsHolder;
use crate::notifier::{SearchDomainListener, SearchDomainNotifier};
use crate::registry;
use crate::status::{group_key, NsGroupState, StatusRecorder};

/// Creates the platform host manager on demand.
pub type HostManagerFactory =
    Box<dyn Fn() -> weft_host::Result<Arc<dyn HostManager>> + Send + Sync>;

/// Construction-time tuning for [`DnsServer`].
pub struct ServerOptions {
    /// Listener address override; defaults to `127.0.0.1:53`.
    pub custom_address: Option<SocketAddr>,
    /// Keep the DNS service running without touching the host's resolver
    /// configuration.
    pub disable_sys: bool,
    /// Per-server upstream exchange deadline.
    pub upstream_timeout: Duration,
    /// Back-off base before a deactivated upstream group is retried.
    pub reactivation_period: Duration,
    /// Consecutive all-servers failures before an upstream group
    /// deactivates.
    pub failure_threshold: u32,
    /// Host-manager constructor override, used by tests and embedders.
    pub host_manager_factory: Option<HostManagerFactory>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            custom_address: None,
            disable_sys: false,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            reactivation_period: DEFAULT_REACTIVATE_AFTER,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            host_manager_factory: None,
        }
    }
}

struct RegisteredHandler {
    domain: Domain,
    priority: i32,
    handler: Arc<dyn DnsHandler>,
}

type RegisteredHandlerMap = HashMap<(HandlerId, Domain), RegisteredHandler>;

/// Mutable orchestrator state, guarded by the server mutex.
struct ServerState {
    host_manager: Arc<dyn HostManager>,
    host_manager_is_noop: bool,
    update_serial: u64,
    previous_config_hash: u64,
    current_config: HostDnsConfig,
    handlers: RegisteredHandlerMap,
    extra_domains: HashMap<Domain, usize>,
    /// Identity of the stand-in root handler built from the host's original
    /// resolvers, when one is registered.
    host_root_id: Option<HandlerId>,
}

struct ServerInner {
    mux: Mutex<ServerState>,
    service: Arc<dyn DnsService>,
    handler_chain: Arc<HandlerChain>,
    local_resolver: Arc<LocalResolver>,
    iface: Arc<dyn OverlayInterface>,
    status: Arc<StatusRecorder>,
    state_manager: Option<Arc<dyn StateManager>>,
    hosts_dns_holder: HostsDnsHolder,
    search_domain_notifier: StdMutex<Option<SearchDomainNotifier>>,
    host_manager_factory: HostManagerFactory,
    disable_sys: bool,
    permanent: bool,
    upstream_timeout: Duration,
    reactivation_period: Duration,
    failure_threshold: u32,
    stopped: AtomicBool,
}

/// The split-horizon DNS server orchestrator.
#[derive(Clone)]
pub struct DnsServer {
    inner: Arc<ServerInner>,
}

impl DnsServer {
    /// Create a server for `iface`, choosing the service front end from the
    /// interface mode: an in-process hook for userspace-bind, a UDP
    /// listener otherwise.
    pub fn new(
        iface: Arc<dyn OverlayInterface>,
        status: Arc<StatusRecorder>,
        state_manager: Option<Arc<dyn StateManager>>,
        options: ServerOptions,
    ) -> Self {
        let service: Arc<dyn DnsService> = if iface.is_userspace_bind() {
            Arc::new(MemoryService::new(&*iface))
        } else {
            Arc::new(ListenerService::new(options.custom_address))
        };
        Self::with_service(iface, service, status, state_manager, options)
    }

    /// Create a server around an explicit service front end.
    pub fn with_service(
        iface: Arc<dyn OverlayInterface>,
        service: Arc<dyn DnsService>,
        status: Arc<StatusRecorder>,
        state_manager: Option<Arc<dyn StateManager>>,
        options: ServerOptions,
    ) -> Self {
        Self::build(iface, service, status, state_manager, options, false)
    }

    fn build(
        iface: Arc<dyn OverlayInterface>,
        service: Arc<dyn DnsService>,
        status: Arc<StatusRecorder>,
        state_manager: Option<Arc<dyn StateManager>>,
        options: ServerOptions,
        permanent: bool,
    ) -> Self {
        let handler_chain = Arc::new(HandlerChain::new());
        // The chain is the single root-zone mux; per-zone routing is
        // entirely internal to it.
        service.register_mux(handler_chain.clone());

        let host_manager_factory = options
            .host_manager_factory
            .unwrap_or_else(|| Box::new(weft_host::new_host_manager));

        let inner = Arc::new(ServerInner {
            mux: Mutex::new(ServerState {
                host_manager: Arc::new(NoopHostManager),
                host_manager_is_noop: true,
                update_serial: 0,
                previous_config_hash: 0,
                current_config: HostDnsConfig::default(),
                handlers: HashMap::new(),
                extra_domains: HashMap::new(),
                host_root_id: None,
            }),
            service,
            handler_chain,
            local_resolver: Arc::new(LocalResolver::new()),
            iface,
            status,
            state_manager,
            hosts_dns_holder: HostsDnsHolder::new(),
            search_domain_notifier: StdMutex::new(None),
            host_manager_factory,
            disable_sys: options.disable_sys,
            permanent,
            upstream_timeout: options.upstream_timeout,
            reactivation_period: options.reactivation_period,
            failure_threshold: options.failure_threshold,
            stopped: AtomicBool::new(false),
        });

        Self { inner }
    }

    /// Create the permanent-upstream server used on mobile platforms.
    ///
    /// Queries always flow through the in-process service; the host's DNS
    /// servers seed a root-zone handler immediately so the device resolves
    /// before the first control-plane update arrives. The instance is
    /// published in the process-wide registry for platform callbacks.
    pub async fn new_permanent_upstream(
        iface: Arc<dyn OverlayInterface>,
        hosts_dns: Vec<String>,
        config: DnsConfig,
        listener: Arc<dyn SearchDomainListener>,
        status: Arc<StatusRecorder>,
        options: ServerOptions,
    ) -> Self {
        log::debug!("host dns address list is: {:?}", hosts_dns);
        let service: Arc<dyn DnsService> = Arc::new(MemoryService::new(&*iface));
        let server = Self::build(iface, service, status, None, options, true);

        server.inner.hosts_dns_holder.set(&hosts_dns);
        {
            let mut state = server.inner.mux.lock().await;
            server.inner.add_host_root_zone(&mut state).await;
            state.current_config = dns_config_to_host_config(
                &config,
                server.inner.service.runtime_ip(),
                server.inner.service.runtime_port(),
            );
            let initial = state.current_config.search_domains();
            *server
                .inner
                .search_domain_notifier
                .lock()
                .expect("notifier lock poisoned") = Some(SearchDomainNotifier::new(initial, listener));
        }

        registry::set_server_dns(server.clone());
        server
    }

    /// Start the listener (permanent mode) and install the platform host
    /// manager unless system DNS management is disabled or the data plane
    /// runs in userspace. Idempotent once a real host manager is in place.
    pub async fn initialize(&self) -> Result<()> {
        self.check_stopped()?;
        let mut state = self.inner.mux.lock().await;

        if !state.host_manager_is_noop {
            return Ok(());
        }

        if self.inner.permanent {
            self.inner.service.listen().await?;
        }

        if self.inner.disable_sys || self.inner.iface.is_userspace_bind() {
            log::info!("system DNS is disabled, not setting up host manager");
            return Ok(());
        }

        let manager = (self.inner.host_manager_factory)()?;
        state.host_manager = manager;
        state.host_manager_is_noop = false;
        Ok(())
    }

    /// The virtual resolver's IP: the real listener address in
    /// listener-backed mode, the synthetic in-overlay address in
    /// userspace-bind mode.
    pub fn dns_ip(&self) -> IpAddr {
        self.inner.service.runtime_ip()
    }

    /// The virtual resolver's port.
    pub fn dns_port(&self) -> u16 {
        self.inner.service.runtime_port()
    }

    /// Process a configuration update from the control plane.
    ///
    /// Stale serials are rejected. Updates hashing equal to the previous
    /// one advance the serial without reapplying anything.
    pub async fn update_dns_server(&self, serial: u64, update: DnsConfig) -> Result<()> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            log::info!("not updating DNS server as it is stopped");
            return Err(Error::Stopped);
        }

        let mut state = self.inner.mux.lock().await;

        if serial < state.update_serial {
            return Err(Error::StaleUpdate {
                behind: state.update_serial - serial,
            });
        }

        let hash = config_hash(&update);
        if state.previous_config_hash == hash {
            log::debug!("not applying the dns configuration update as there is nothing new");
            state.update_serial = serial;
            return Ok(());
        }

        self.apply_configuration(&mut state, &update).await?;

        state.update_serial = serial;
        state.previous_config_hash = hash;
        Ok(())
    }

    /// Register `handler` for `domains` at `priority` and surface the
    /// domains to the host as match-only zones.
    pub async fn register_handler(
        &self,
        domains: Vec<Domain>,
        handler: Arc<dyn DnsHandler>,
        priority: i32,
    ) -> Result<()> {
        self.check_stopped()?;
        let mut state = self.inner.mux.lock().await;

        log::debug!(
            "registering handler {} for {:?} with priority {}",
            handler.id(),
            domains,
            priority
        );
        for domain in &domains {
            if let Some(displaced) =
                self.inner
                    .handler_chain
                    .add_handler(domain.clone(), handler.clone(), priority)
            {
                displaced.stop().await;
            }
            *state.extra_domains.entry(domain.clone()).or_insert(0) += 1;
        }

        self.inner.apply_host_config(&mut state).await;
        Ok(())
    }

    /// Undo a matching [`DnsServer::register_handler`].
    pub async fn deregister_handler(&self, domains: Vec<Domain>, priority: i32) -> Result<()> {
        self.check_stopped()?;
        let mut state = self.inner.mux.lock().await;

        log::debug!("deregistering handler for {:?} with priority {}", domains, priority);
        for domain in &domains {
            self.inner.handler_chain.remove_handler(domain, priority);
            if let Some(count) = state.extra_domains.get_mut(domain) {
                *count -= 1;
                if *count == 0 {
                    state.extra_domains.remove(domain);
                }
            }
        }

        self.inner.apply_host_config(&mut state).await;
        Ok(())
    }

    /// The current search-domain list: every non-disabled, non-match-only
    /// domain of the active host configuration.
    pub async fn search_domains(&self) -> Vec<String> {
        let state = self.inner.mux.lock().await;
        state.current_config.search_domains()
    }

    /// Probe every registered handler in parallel and wait for all probes
    /// to finish.
    pub async fn probe_availability(&self) {
        let handlers: Vec<Arc<dyn DnsHandler>> = {
            let state = self.inner.mux.lock().await;
            let mut seen = HashMap::new();
            for registered in state.handlers.values() {
                seen.entry(registered.handler.id())
                    .or_insert_with(|| registered.handler.clone());
            }
            seen.into_values().collect()
        };

        let mut probes = JoinSet::new();
        for handler in handlers {
            probes.spawn(async move { handler.probe_availability().await });
        }
        while probes.join_next().await.is_some() {}
    }

    /// Refresh the host's DNS servers. Installs a root-zone stand-in from
    /// them unless a root handler is already registered.
    pub async fn on_updated_host_dns_server(&self, hosts_dns: Vec<String>) {
        self.inner.hosts_dns_holder.set(&hosts_dns);

        let mut state = self.inner.mux.lock().await;
        let has_root_handler = state.handlers.values().any(|h| h.domain.is_root());
        if has_root_handler {
            log::debug!("on new host DNS config but skip to apply it");
            return;
        }

        log::debug!("update host DNS settings: {:?}", hosts_dns);
        self.inner.add_host_root_zone(&mut state).await;
    }

    /// Tear everything down: restore the host DNS, delete the shutdown
    /// checkpoint, stop every handler and the service, clear the
    /// extra-domain refcounts.
    pub async fn stop(&self) {
        if self.inner.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut state = self.inner.mux.lock().await;

        if let Err(err) = self.inner.disable_dns(&mut state).await {
            log::error!("failed to disable DNS: {}", err);
        }

        let handlers: Vec<RegisteredHandler> = state.handlers.drain().map(|(_, h)| h).collect();
        for registered in handlers {
            self.inner
                .handler_chain
                .remove_handler(&registered.domain, registered.priority);
            registered.handler.stop().await;
        }
        state.host_root_id = None;
        state.extra_domains.clear();

        if self.inner.permanent {
            registry::clear_server_dns();
        }
    }

    fn check_stopped(&self) -> Result<()> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(Error::Stopped);
        }
        Ok(())
    }

    async fn apply_configuration(
        &self,
        state: &mut ServerState,
        update: &DnsConfig,
    ) -> Result<()> {
        if update.service_enable {
            if let Err(err) = self.inner.enable_dns(state).await {
                log::error!("failed to enable DNS: {}", err);
            }
        } else if !self.inner.permanent {
            if let Err(err) = self.inner.disable_dns(state).await {
                log::error!("failed to disable DNS: {}", err);
            }
        }

        let (mut entries, zones, records) = self.build_local_handler_update(&update.custom_zones);
        entries.extend(self.build_upstream_handler_update(&update.name_server_groups)?);

        self.update_mux(state, entries).await;

        self.inner.local_resolver.update(zones, records);

        state.current_config = dns_config_to_host_config(
            update,
            self.inner.service.runtime_ip(),
            self.inner.service.runtime_port(),
        );

        if self.inner.service.runtime_port() != DEFAULT_DNS_PORT
            && !state.host_manager.support_custom_port()
        {
            log::warn!(
                "the DNS manager of this host doesn't support custom ports; disabling primary DNS setup. \
                 See https://github.com/weft-net/weft/blob/main/docs/dns.md"
            );
            state.current_config.route_all = false;
        }

        self.inner.apply_host_config(state).await;

        self.inner.persist_async();

        let search = state.current_config.search_domains();
        if let Some(notifier) = &*self
            .inner
            .search_domain_notifier
            .lock()
            .expect("notifier lock poisoned")
        {
            notifier.on_new_search_domains(search);
        }

        self.inner
            .update_ns_group_states(&update.name_server_groups);

        Ok(())
    }

    fn build_local_handler_update(
        &self,
        custom_zones: &[CustomZone],
    ) -> (Vec<RegisteredHandler>, Vec<Domain>, Vec<SimpleRecord>) {
        let mut entries = Vec::new();
        let mut zones = Vec::new();
        let mut records = Vec::new();

        for zone in custom_zones {
            if zone.records.is_empty() {
                log::warn!(
                    "received a custom zone with empty records, skipping domain: {}",
                    zone.domain
                );
                continue;
            }

            entries.push(RegisteredHandler {
                domain: zone.domain.clone(),
                priority: PRIORITY_MATCH_DOMAIN,
                handler: self.inner.local_resolver.clone(),
            });
            zones.push(zone.domain.clone());

            for record in &zone.records {
                if record.class != RecordClass::In {
                    log::warn!("received an invalid class type: {}", record.class);
                    continue;
                }
                // Zone records carry the fqdn, so the table is flat.
                records.push(record.clone());
            }
        }

        (entries, zones, records)
    }

    fn build_upstream_handler_update(
        &self,
        groups: &[NameServerGroup],
    ) -> Result<Vec<RegisteredHandler>> {
        for group in groups {
            if group.name_servers.is_empty() {
                log::warn!("received a nameserver group with empty nameserver list");
            }
            if !group.primary && group.domains.is_empty() {
                return Err(Error::Config(
                    "received a non-primary nameserver group with an empty domain list".into(),
                ));
            }
        }

        let mut entries = Vec::new();
        for (domain, domain_groups) in group_by_domain(groups) {
            let base_priority = if domain.is_root() {
                PRIORITY_DEFAULT
            } else {
                PRIORITY_UPSTREAM
            };
            entries.extend(self.create_handlers_for_domain_group(
                &domain,
                &domain_groups,
                base_priority,
            ));
        }
        Ok(entries)
    }

    fn create_handlers_for_domain_group(
        &self,
        domain: &Domain,
        groups: &[&NameServerGroup],
        base_priority: i32,
    ) -> Vec<RegisteredHandler> {
        let mut entries = Vec::new();

        for (i, &group) in groups.iter().enumerate() {
            // Decrement per group so same-zone groups never collide.
            let priority = base_priority - i as i32;
            if leaks_priority(domain, base_priority, priority) {
                break;
            }

            let servers = group.udp_servers();
            if servers.is_empty() {
                log::error!("received a nameserver group with an invalid nameserver list");
                continue;
            }

            log::debug!(
                "creating handler for domain={} with priority={}",
                domain,
                priority
            );
            let resolver = Arc::new(
                UpstreamResolver::new(servers, domain.clone())
                    .with_timeout(self.inner.upstream_timeout)
                    .with_reactivation_period(self.inner.reactivation_period)
                    .with_failure_threshold(self.inner.failure_threshold),
            );

            // The hooks temporarily exclude the group from the host
            // configuration and put it back; the serial and original config
            // stay untouched.
            let (deactivate, reactivate) =
                upstream_callbacks(&self.inner, group, resolver.clone(), priority);
            resolver.set_callbacks(deactivate, reactivate);

            entries.push(RegisteredHandler {
                domain: domain.clone(),
                priority,
                handler: resolver,
            });
        }

        entries
    }

    async fn update_mux(&self, state: &mut ServerState, entries: Vec<RegisteredHandler>) {
        let had_root = state.handlers.values().any(|h| h.domain.is_root());

        // There is a short window with no registered handlers while the
        // sets swap; queries in flight keep their snapshots.
        let old: Vec<RegisteredHandler> = state.handlers.drain().map(|(_, h)| h).collect();
        for registered in old {
            self.inner
                .handler_chain
                .remove_handler(&registered.domain, registered.priority);
            registered.handler.stop().await;
        }
        state.host_root_id = None;

        let mut contains_root = false;
        for entry in entries {
            if entry.domain.is_root() {
                contains_root = true;
            }
            if let Some(displaced) = self.inner.handler_chain.add_handler(
                entry.domain.clone(),
                entry.handler.clone(),
                entry.priority,
            ) {
                displaced.stop().await;
            }
            state
                .handlers
                .insert((entry.handler.id(), entry.domain.clone()), entry);
        }

        // Restore the host root-zone stand-in when the update dropped the
        // only root handler.
        if !contains_root && had_root {
            self.inner.add_host_root_zone(state).await;
        }
    }
}

impl ServerInner {
    async fn enable_dns(&self, state: &mut ServerState) -> Result<()> {
        self.service.listen().await?;

        if !state.host_manager_is_noop {
            return Ok(());
        }
        if self.disable_sys || self.iface.is_userspace_bind() {
            return Ok(());
        }

        log::info!("DNS service enabled, initializing host manager");
        state.host_manager = (self.host_manager_factory)()?;
        state.host_manager_is_noop = false;
        Ok(())
    }

    async fn disable_dns(&self, state: &mut ServerState) -> Result<()> {
        let result = self.teardown_host_manager(state).await;
        self.service.stop().await;
        result
    }

    async fn teardown_host_manager(&self, state: &mut ServerState) -> Result<()> {
        if state.host_manager_is_noop {
            return Ok(());
        }

        if !state.host_manager.original_nameservers().is_empty() {
            log::debug!("deregistering original nameservers as fallback handlers");
            for handler in self
                .handler_chain
                .remove_handler(&Domain::root(), PRIORITY_FALLBACK)
            {
                handler.stop().await;
            }
        }

        if let Err(err) = state.host_manager.restore_host_dns() {
            log::error!("failed to restore host DNS settings: {}", err);
        } else if let Some(state_manager) = &self.state_manager {
            state_manager.delete_state();
        }

        state.host_manager = Arc::new(NoopHostManager);
        state.host_manager_is_noop = true;
        Ok(())
    }

    /// Install the current host configuration, with the externally
    /// requested extra domains merged in as match-only entries, and refresh
    /// the fallback handler from the host's original resolvers.
    async fn apply_host_config(&self, state: &mut ServerState) {
        if self.stopped.load(Ordering::SeqCst) {
            return;
        }

        let mut config = state.current_config.clone();

        let existing: Vec<String> = config.domains.iter().map(|d| d.domain.clone()).collect();
        for domain in state.extra_domains.keys() {
            let domain = domain.without_trailing_dot();
            if !existing.iter().any(|d| d == domain) {
                config
                    .domains
                    .push(weft_host::DomainConfig::new(domain, true));
            }
        }
        log::debug!(
            "applying host config with extra match domains: {:?}",
            state.extra_domains.keys().collect::<Vec<_>>()
        );

        let state_manager = self
            .state_manager
            .as_deref()
            .unwrap_or(&NOOP_STATE_MANAGER);
        if let Err(err) = state.host_manager.apply_dns_config(&config, state_manager) {
            log::error!("failed to apply DNS host manager update: {}", err);
        }

        self.register_fallback(state, &config).await;
    }

    /// Keep the host's original nameservers reachable as a last-resort
    /// root-zone handler, excluding the virtual resolver itself.
    async fn register_fallback(&self, state: &mut ServerState, config: &HostDnsConfig) {
        let originals = state.host_manager.original_nameservers();
        if originals.is_empty() {
            return;
        }

        let servers: Vec<String> = originals
            .iter()
            .filter(|ip| {
                if **ip == config.server_ip {
                    log::debug!(
                        "skipping original nameserver {} as it is the virtual resolver",
                        ip
                    );
                    false
                } else {
                    true
                }
            })
            .map(|ip| format_addr(*ip, DEFAULT_DNS_PORT))
            .collect();
        if servers.is_empty() {
            return;
        }

        log::info!(
            "registering original nameservers {:?} as fallback handlers with priority {}",
            servers,
            PRIORITY_FALLBACK
        );

        let resolver = Arc::new(
            UpstreamResolver::new(servers, Domain::root()).with_timeout(self.upstream_timeout),
        );
        // Always active: the fallback never deactivates itself.
        if let Some(displaced) =
            self.handler_chain
                .add_handler(Domain::root(), resolver, PRIORITY_FALLBACK)
        {
            displaced.stop().await;
        }
    }

    /// Register a root-zone handler built from the host's original DNS
    /// servers so names keep resolving without a primary group.
    async fn add_host_root_zone(&self, state: &mut ServerState) {
        let servers = self.hosts_dns_holder.get();
        if servers.is_empty() {
            log::debug!("no host DNS servers available, skipping root zone handler creation");
            return;
        }

        let resolver = Arc::new(
            UpstreamResolver::new(servers, Domain::root()).with_timeout(self.upstream_timeout),
        );
        let id = resolver.id();

        if let Some(displaced) = self.handler_chain.add_handler(
            Domain::root(),
            resolver.clone(),
            PRIORITY_DEFAULT,
        ) {
            displaced.stop().await;
        }
        state.handlers.insert(
            (id.clone(), Domain::root()),
            RegisteredHandler {
                domain: Domain::root(),
                priority: PRIORITY_DEFAULT,
                handler: resolver,
            },
        );
        state.host_root_id = Some(id);
    }

    /// Drop the stand-in root handler installed by
    /// [`ServerInner::add_host_root_zone`], if present.
    async fn remove_host_root_zone(&self, state: &mut ServerState) {
        let Some(id) = state.host_root_id.take() else {
            return;
        };
        if let Some(handler) =
            self.handler_chain
                .remove_exact(&Domain::root(), PRIORITY_DEFAULT, &id)
        {
            handler.stop().await;
        }
        state.handlers.remove(&(id, Domain::root()));
    }

    fn persist_async(&self) {
        let Some(state_manager) = self.state_manager.clone() else {
            return;
        };
        tokio::task::spawn_blocking(move || {
            if let Err(err) = state_manager.persist() {
                log::error!("failed to persist dns state: {}", err);
            }
        });
    }

    fn update_ns_group_states(&self, groups: &[NameServerGroup]) {
        let states = groups
            .iter()
            .map(|group| NsGroupState {
                id: group_key(group),
                servers: group.name_servers.iter().map(|ns| ns.host_port()).collect(),
                domains: group
                    .domains
                    .iter()
                    .map(|d| d.without_trailing_dot().to_string())
                    .collect(),
                // The probe determines the live state; default enabled.
                enabled: true,
                error: None,
            })
            .collect();
        self.status.update_dns_states(states);
    }

    fn update_ns_state(&self, group: &NameServerGroup, error: Option<String>, enabled: bool) {
        let id = group_key(group);
        let mut states = self.status.get_dns_states();
        for state in &mut states {
            if state.id == id {
                state.enabled = enabled;
                state.error = error;
                break;
            }
        }
        self.status.update_dns_states(states);
    }
}

struct NoopStateManager;

impl StateManager for NoopStateManager {
    fn update_state(&self, _state: ShutdownState) {}
    fn delete_state(&self) {}
    fn persist(&self) -> weft_host::Result<()> {
        Ok(())
    }
}

static NOOP_STATE_MANAGER: NoopStateManager = NoopStateManager;

/// Group nameserver groups by match zone; primary groups claim the root
/// zone. Zone order is deterministic, input order is kept within a zone.
fn group_by_domain<'a>(
    groups: &'a [NameServerGroup],
) -> std::collections::BTreeMap<Domain, Vec<&'a NameServerGroup>> {
    let mut grouped: std::collections::BTreeMap<Domain, Vec<&NameServerGroup>> =
        std::collections::BTreeMap::new();

    for group in groups {
        if group.primary {
            grouped.entry(Domain::root()).or_default().push(group);
            continue;
        }
        for domain in &group.domains {
            grouped.entry(domain.clone()).or_default().push(group);
        }
    }

    grouped
}

/// Whether assigning `priority` would cross into the next lower tier.
fn leaks_priority(domain: &Domain, base_priority: i32, priority: i32) -> bool {
    if base_priority == PRIORITY_UPSTREAM && priority <= PRIORITY_DEFAULT {
        log::warn!(
            "too many handlers for domain={}, would overlap with default priority tier (diff={}). Skipping remaining handlers",
            domain,
            PRIORITY_UPSTREAM - PRIORITY_DEFAULT
        );
        return true;
    }
    if base_priority == PRIORITY_DEFAULT && priority <= PRIORITY_FALLBACK {
        log::warn!(
            "too many handlers for domain={}, would overlap with fallback priority tier (diff={}). Skipping remaining handlers",
            domain,
            PRIORITY_DEFAULT - PRIORITY_FALLBACK
        );
        return true;
    }
    false
}

/// Build the deactivate/reactivate hooks wired into an upstream resolver.
///
/// Deactivation records the indices of the group's domains in the current
/// host config; reactivation undoes exactly those slots and aborts the undo
/// for any slot reshaped by a later update.
fn upstream_callbacks(
    inner: &Arc<ServerInner>,
    group: &NameServerGroup,
    handler: Arc<UpstreamResolver>,
    priority: i32,
) -> (DeactivateHook, ReactivateHook) {
    let remove_index: Arc<StdMutex<HashMap<String, Option<usize>>>> =
        Arc::new(StdMutex::new(HashMap::new()));

    let deactivate: DeactivateHook = {
        let inner = inner.clone();
        let group = group.clone();
        let remove_index = remove_index.clone();
        Arc::new(move |err: String| {
            let inner = inner.clone();
            let group = group.clone();
            let remove_index = remove_index.clone();
            Box::pin(async move {
                let mut state = inner.mux.lock().await;

                log::info!(
                    "temporarily deactivating nameserver group {:?} due to sustained failure",
                    group.name_servers
                );

                let mut indices: HashMap<String, Option<usize>> = group
                    .domains
                    .iter()
                    .map(|d| (d.without_trailing_dot().to_string(), None))
                    .collect();

                if group.primary {
                    state.current_config.route_all = false;
                    inner.handler_chain.remove_handler(&Domain::root(), priority);
                }

                for i in 0..state.current_config.domains.len() {
                    let name = state.current_config.domains[i].domain.clone();
                    if indices.contains_key(&name) {
                        state.current_config.domains[i].disabled = true;
                        if let Ok(zone) = Domain::new(&name) {
                            inner.handler_chain.remove_handler(&zone, priority);
                        }
                        indices.insert(name, Some(i));
                    }
                }

                *remove_index.lock().expect("remove index lock poisoned") = indices;

                inner.apply_host_config(&mut state).await;
                inner.persist_async();

                // Permanent (mobile) mode must not blackhole the device
                // when its only primary goes away.
                if inner.permanent && group.primary && !inner.hosts_dns_holder.is_empty() {
                    inner.add_host_root_zone(&mut state).await;
                }

                inner.update_ns_state(&group, Some(err), false);
            })
        })
    };

    let reactivate: ReactivateHook = {
        let inner = inner.clone();
        let group = group.clone();
        Arc::new(move || {
            let inner = inner.clone();
            let group = group.clone();
            let handler = handler.clone();
            let remove_index = remove_index.clone();
            Box::pin(async move {
                let mut state = inner.mux.lock().await;

                let recorded = remove_index
                    .lock()
                    .expect("remove index lock poisoned")
                    .clone();
                for (name, index) in recorded {
                    let Some(index) = index else { continue };
                    // Skip slots reshaped by a later update.
                    if index >= state.current_config.domains.len()
                        || state.current_config.domains[index].domain != name
                    {
                        continue;
                    }
                    state.current_config.domains[index].disabled = false;
                    if let Ok(zone) = Domain::new(&name) {
                        if let Some(displaced) = inner.handler_chain.add_handler(
                            zone,
                            handler.clone(),
                            priority,
                        ) {
                            displaced.stop().await;
                        }
                    }
                }

                log::debug!(
                    "reactivating temporarily disabled nameserver group {:?}",
                    group.name_servers
                );

                if group.primary {
                    // Drop the stand-in root handler added on deactivation
                    // before re-claiming the root zone.
                    inner.remove_host_root_zone(&mut state).await;
                    state.current_config.route_all = true;
                    if let Some(displaced) = inner.handler_chain.add_handler(
                        Domain::root(),
                        handler.clone(),
                        priority,
                    ) {
                        displaced.stop().await;
                    }
                }

                inner.apply_host_config(&mut state).await;
                inner.update_ns_state(&group, None, true);
            })
        })
    };

    (deactivate, reactivate)
}
