//! Local resolver for synthetic overlay records
//!
//! Serves the records of user-defined custom zones from an in-memory table.
//! The table is rebuilt wholesale on every control-plane update.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::{Record, RecordType};

use crate::config::SimpleRecord;
use crate::domain::{normalize_query_name, Domain};
use crate::handler::{response_with_code, DnsHandler, HandlerId, HandlerOutcome};

const LOCAL_RESOLVER_ID: &str = "local-resolver";

#[derive(Default)]
struct RecordTable {
    zones: Vec<Domain>,
    records: HashMap<(String, RecordType), Vec<Record>>,
}

/// Answers queries from an in-memory table of synthetic records.
pub struct LocalResolver {
    table: RwLock<Arc<RecordTable>>,
}

impl LocalResolver {
    pub fn new() -> Self {
        Self {
            table: RwLock::new(Arc::new(RecordTable::default())),
        }
    }

    /// Atomically replace the record table.
    ///
    /// `zones` is the set of managed zones; queries inside a managed zone
    /// without a matching record get NXDOMAIN, queries outside every zone
    /// are not ours. Records that fail to parse are skipped with a warning.
    pub fn update(&self, zones: Vec<Domain>, records: Vec<SimpleRecord>) {
        let mut table = RecordTable {
            zones,
            records: HashMap::new(),
        };

        for simple in records {
            let record = match simple.to_record() {
                Ok(record) => record,
                Err(err) => {
                    log::warn!("skipping local record: {}", err);
                    continue;
                }
            };
            let key = (simple.name.as_str().to_string(), record.record_type());
            table.records.entry(key).or_default().push(record);
        }

        let unique: HashSet<_> = table.records.keys().map(|(name, _)| name).collect();
        log::debug!(
            "local resolver table updated: {} names, {} zones",
            unique.len(),
            table.zones.len()
        );

        *self.table.write().expect("local table lock poisoned") = Arc::new(table);
    }

    fn snapshot(&self) -> Arc<RecordTable> {
        self.table.read().expect("local table lock poisoned").clone()
    }
}

impl Default for LocalResolver {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DnsHandler for LocalResolver {
    async fn handle(&self, query: &Message) -> HandlerOutcome {
        let Some(question) = query.queries().first() else {
            return HandlerOutcome::Answer(response_with_code(query, ResponseCode::FormErr));
        };
        let qname = normalize_query_name(&question.name().to_string());
        let qtype = question.query_type();
        let table = self.snapshot();

        let answers = table
            .records
            .get(&(qname.clone(), qtype))
            .cloned()
            .or_else(|| {
                // A CNAME at the name also answers address queries.
                if matches!(qtype, RecordType::A | RecordType::AAAA) {
                    table.records.get(&(qname.clone(), RecordType::CNAME)).cloned()
                } else {
                    None
                }
            });

        if let Some(answers) = answers {
            let mut response = response_with_code(query, ResponseCode::NoError);
            response.set_authoritative(true);
            for record in answers {
                response.add_answer(record);
            }
            return HandlerOutcome::Answer(response);
        }

        if table.zones.iter().any(|zone| zone.is_suffix_of(&qname)) {
            return HandlerOutcome::Answer(response_with_code(query, ResponseCode::NXDomain));
        }

        HandlerOutcome::NotMine
    }

    fn id(&self) -> HandlerId {
        LOCAL_RESOLVER_ID.to_string()
    }
}
