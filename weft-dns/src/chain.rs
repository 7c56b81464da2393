//! Priority-ordered handler chain
//!
//! The chain is the single mux registered with the DNS service for the root
//! zone; all per-zone routing happens here. Mutations come from one writer
//! (the orchestrator) while query tasks read concurrently, so entries live
//! behind a read-write lock and dispatch works on a snapshot of the matching
//! candidates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use hickory_proto::op::{Message, ResponseCode};

use crate::domain::{normalize_query_name, Domain};
use crate::handler::{response_with_code, DnsHandler, HandlerId, HandlerOutcome};

struct ChainEntry {
    zone: Domain,
    priority: i32,
    seq: u64,
    handler: Arc<dyn DnsHandler>,
}

/// Routes each query to the highest-priority handler whose zone matches the
/// query name, falling through on negative answers.
pub struct HandlerChain {
    entries: RwLock<Vec<ChainEntry>>,
    next_seq: AtomicU64,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Register `handler` for `zone` at `priority`.
    ///
    /// Idempotent per `(zone, priority, handler-id)`: an existing entry with
    /// the same key is replaced and returned so the caller can stop it.
    pub fn add_handler(
        &self,
        zone: Domain,
        handler: Arc<dyn DnsHandler>,
        priority: i32,
    ) -> Option<Arc<dyn DnsHandler>> {
        let id = handler.id();
        let mut entries = self.entries.write().expect("chain lock poisoned");

        let replaced = entries
            .iter()
            .position(|e| e.zone == zone && e.priority == priority && e.handler.id() == id)
            .map(|pos| entries.remove(pos).handler);

        log::debug!(
            "adding handler {} for zone {} with priority {}",
            id,
            zone,
            priority
        );
        let incoming = handler.clone();
        entries.push(ChainEntry {
            zone,
            priority,
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            handler,
        });

        // A literal re-registration of the same instance is not a
        // replacement the caller should stop.
        replaced.filter(|old| !Arc::ptr_eq(old, &incoming))
    }

    /// Remove every entry registered for `(zone, priority)`, regardless of
    /// handler identity. Returns the removed handlers.
    pub fn remove_handler(&self, zone: &Domain, priority: i32) -> Vec<Arc<dyn DnsHandler>> {
        let mut entries = self.entries.write().expect("chain lock poisoned");
        let mut removed = Vec::new();
        entries.retain(|e| {
            if e.zone == *zone && e.priority == priority {
                removed.push(e.handler.clone());
                false
            } else {
                true
            }
        });
        if !removed.is_empty() {
            log::debug!(
                "removed {} handler(s) for zone {} at priority {}",
                removed.len(),
                zone,
                priority
            );
        }
        removed
    }

    /// Remove the single entry matching `(zone, priority, handler-id)`.
    pub fn remove_exact(
        &self,
        zone: &Domain,
        priority: i32,
        id: &str,
    ) -> Option<Arc<dyn DnsHandler>> {
        let mut entries = self.entries.write().expect("chain lock poisoned");
        entries
            .iter()
            .position(|e| e.zone == *zone && e.priority == priority && e.handler.id() == id)
            .map(|pos| entries.remove(pos).handler)
    }

    /// Whether any entry is registered for `(zone, priority)`.
    pub fn has_handler(&self, zone: &Domain, priority: i32) -> bool {
        self.entries
            .read()
            .expect("chain lock poisoned")
            .iter()
            .any(|e| e.zone == *zone && e.priority == priority)
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.entries.read().expect("chain lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot the candidates for `qname`: every entry whose zone is a
    /// suffix of the name, longest zone first, then priority descending,
    /// then insertion order.
    fn candidates(&self, qname: &str) -> Vec<(Domain, Arc<dyn DnsHandler>)> {
        let entries = self.entries.read().expect("chain lock poisoned");
        let mut matched: Vec<&ChainEntry> = entries
            .iter()
            .filter(|e| e.zone.is_suffix_of(qname))
            .collect();
        matched.sort_by(|a, b| {
            b.zone
                .label_count()
                .cmp(&a.zone.label_count())
                .then(b.priority.cmp(&a.priority))
                .then(a.seq.cmp(&b.seq))
        });
        matched
            .into_iter()
            .map(|e| (e.zone.clone(), e.handler.clone()))
            .collect()
    }
}

impl Default for HandlerChain {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DnsHandler for HandlerChain {
    async fn handle(&self, query: &Message) -> HandlerOutcome {
        let Some(question) = query.queries().first() else {
            return HandlerOutcome::Answer(response_with_code(query, ResponseCode::FormErr));
        };
        let qname = normalize_query_name(&question.name().to_string());

        // Snapshot under the read lock, dispatch without it.
        let candidates = self.candidates(&qname);

        let mut last_response: Option<Message> = None;
        for (zone, handler) in candidates {
            match handler.handle(query).await {
                HandlerOutcome::NotMine => continue,
                HandlerOutcome::Answer(response) => match response.response_code() {
                    ResponseCode::NoError => {
                        // An empty NOERROR only settles the query at the
                        // zone apex; otherwise let lower entries try.
                        if !response.answers().is_empty() || qname == *zone.as_str() {
                            return HandlerOutcome::Answer(response);
                        }
                        last_response = Some(response);
                    }
                    ResponseCode::NXDomain | ResponseCode::ServFail => {
                        last_response = Some(response);
                    }
                    _ => return HandlerOutcome::Answer(response),
                },
            }
        }

        match last_response {
            Some(response) => HandlerOutcome::Answer(response),
            None => HandlerOutcome::NotMine,
        }
    }

    fn id(&self) -> HandlerId {
        "handler-chain".to_string()
    }
}
