//! The query-handler abstraction shared by every resolver backend
//!
//! Handlers form a closed set (local records, upstream forwarders, host
//! fallback) discriminated by a stable [`HandlerId`]; the chain and the
//! orchestrator only ever talk to them through this trait.

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, ResponseCode};

/// Stable identity of a handler. Re-registering the same identity replaces
/// the previous registration instead of duplicating it.
pub type HandlerId = String;

/// Priority tier for handlers registered for match domains (local zones and
/// match-only upstream groups).
pub const PRIORITY_MATCH_DOMAIN: i32 = 300;

/// Priority tier for non-primary upstream groups.
pub const PRIORITY_UPSTREAM: i32 = 200;

/// Priority tier for primary upstream groups and the host root-zone
/// stand-in when no primary is configured.
pub const PRIORITY_DEFAULT: i32 = 100;

/// Priority tier for the host's original nameservers kept as last resort.
pub const PRIORITY_FALLBACK: i32 = 0;

/// What a handler produced for a query.
#[derive(Debug)]
pub enum HandlerOutcome {
    /// A concrete DNS response, possibly negative (NXDOMAIN/SERVFAIL).
    Answer(Message),
    /// The query name is outside this handler's zones; the chain moves on.
    NotMine,
}

/// A resolver backend the chain can dispatch to.
#[async_trait]
pub trait DnsHandler: Send + Sync {
    /// Resolve one query.
    async fn handle(&self, query: &Message) -> HandlerOutcome;

    /// Stable identity over the handler's configuration.
    fn id(&self) -> HandlerId;

    /// Actively test reachability. Default: always healthy.
    async fn probe_availability(&self) {}

    /// Release owned resources and cancel background work.
    async fn stop(&self) {}
}

/// Build a response message carrying `code` for `query`, echoing the
/// question section and request id.
pub fn response_with_code(query: &Message, code: ResponseCode) -> Message {
    let mut response = Message::new();
    response.set_id(query.id());
    response.set_message_type(MessageType::Response);
    response.set_op_code(query.op_code());
    response.set_recursion_desired(query.recursion_desired());
    response.set_recursion_available(true);
    response.set_response_code(code);
    for q in query.queries() {
        response.add_query(q.clone());
    }
    response
}
