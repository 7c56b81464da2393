//! Search-domain change notifier for mobile platforms
//!
//! Mobile integrations register a listener that receives the current search
//! domain list; the notifier deduplicates so the platform callback only
//! fires on actual change.

use std::sync::{Arc, Mutex};

/// Platform callback receiving search-domain updates.
pub trait SearchDomainListener: Send + Sync {
    fn on_search_domains(&self, domains: Vec<String>);
}

/// Pushes the search-domain list to a platform listener on change.
pub struct SearchDomainNotifier {
    listener: Arc<dyn SearchDomainListener>,
    last: Mutex<Vec<String>>,
}

impl SearchDomainNotifier {
    pub fn new(initial: Vec<String>, listener: Arc<dyn SearchDomainListener>) -> Self {
        Self {
            listener,
            last: Mutex::new(initial),
        }
    }

    /// Deliver `domains` if it differs (order-sensitively) from the last
    /// delivered list.
    pub fn on_new_search_domains(&self, domains: Vec<String>) {
        let mut last = self.last.lock().expect("notifier lock poisoned");
        if *last == domains {
            return;
        }
        *last = domains.clone();
        drop(last);
        log::debug!("notifying listener of new search domains: {:?}", domains);
        self.listener.on_search_domains(domains);
    }
}
