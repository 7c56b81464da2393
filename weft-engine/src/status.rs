//! Per-group health snapshots for the status reporter

use std::sync::RwLock;

use weft_dns::NameServerGroup;

/// Health snapshot of one nameserver group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsGroupState {
    /// Stable key over the group's servers and domains.
    pub id: String,
    pub servers: Vec<String>,
    pub domains: Vec<String>,
    pub enabled: bool,
    pub error: Option<String>,
}

/// Stable identity of a nameserver group for status reporting.
pub fn group_key(group: &NameServerGroup) -> String {
    let servers: Vec<String> = group.name_servers.iter().map(|ns| ns.host_port()).collect();
    let domains: Vec<&str> = group
        .domains
        .iter()
        .map(|d| d.without_trailing_dot())
        .collect();
    format!("{:?}_{:?}", servers, domains)
}

type StatusListener = Box<dyn Fn(&[NsGroupState]) + Send + Sync>;

/// Collects per-group DNS state and pushes changes to an optional listener.
pub struct StatusRecorder {
    states: RwLock<Vec<NsGroupState>>,
    listener: RwLock<Option<StatusListener>>,
}

impl StatusRecorder {
    pub fn new() -> Self {
        Self {
            states: RwLock::new(Vec::new()),
            listener: RwLock::new(None),
        }
    }

    /// Register a callback invoked on every state change.
    pub fn set_listener(&self, listener: StatusListener) {
        *self.listener.write().expect("status lock poisoned") = Some(listener);
    }

    /// Replace the full snapshot set.
    pub fn update_dns_states(&self, states: Vec<NsGroupState>) {
        {
            let mut current = self.states.write().expect("status lock poisoned");
            *current = states;
        }
        let states = self.states.read().expect("status lock poisoned");
        if let Some(listener) = &*self.listener.read().expect("status lock poisoned") {
            listener(&states);
        }
    }

    /// The current snapshot set.
    pub fn get_dns_states(&self) -> Vec<NsGroupState> {
        self.states.read().expect("status lock poisoned").clone()
    }
}

impl Default for StatusRecorder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use weft_dns::{Domain, NameServer};

    fn group(primary: bool) -> NameServerGroup {
        NameServerGroup {
            name_servers: vec![NameServer::udp(IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1)), 53)],
            domains: if primary {
                vec![]
            } else {
                vec![Domain::new("corp.local.").unwrap()]
            },
            primary,
            search_domains: vec![],
            enabled: true,
        }
    }

    #[test]
    fn test_group_key_stable_and_distinct() {
        assert_eq!(group_key(&group(false)), group_key(&group(false)));
        assert_ne!(group_key(&group(false)), group_key(&group(true)));
    }

    #[test]
    fn test_update_and_get() {
        let recorder = StatusRecorder::new();
        recorder.update_dns_states(vec![NsGroupState {
            id: "g1".into(),
            servers: vec!["1.1.1.1:53".into()],
            domains: vec![],
            enabled: true,
            error: None,
        }]);
        let states = recorder.get_dns_states();
        assert_eq!(states.len(), 1);
        assert!(states[0].enabled);
    }

    #[test]
    fn test_listener_notified() {
        let recorder = StatusRecorder::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        recorder.set_listener(Box::new(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        recorder.update_dns_states(vec![]);
        recorder.update_dns_states(vec![]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
