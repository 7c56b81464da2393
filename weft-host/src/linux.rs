//! Linux resolv.conf back end
//!
//! Rewrites `/etc/resolv.conf`, keeping the original contents in memory and
//! in the shutdown checkpoint so they can be restored after a clean stop or
//! an unclean exit. Plain resolv.conf cannot express per-domain routing or
//! custom ports, so match-only domains degrade to best effort and
//! `support_custom_port` is false.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::config::{HostDnsConfig, ShutdownState};
use crate::error::{Error, Result};
use crate::manager::{HostManager, StateManager};

/// Default resolver file location
pub const RESOLV_CONF_PATH: &str = "/etc/resolv.conf";

const FILE_HEADER: &str = "# Generated by weft. The original configuration is restored on shutdown.";

struct Original {
    contents: String,
    nameservers: Vec<IpAddr>,
}

/// Host manager that owns `/etc/resolv.conf`.
pub struct ResolvConfManager {
    path: PathBuf,
    original: RwLock<Original>,
}

impl ResolvConfManager {
    /// Capture the current resolver file and take ownership of it.
    pub fn new() -> Result<Self> {
        Self::with_path(RESOLV_CONF_PATH)
    }

    /// Like [`ResolvConfManager::new`] with an explicit file location.
    pub fn with_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let contents = std::fs::read_to_string(&path)?;
        let nameservers = parse_nameservers(&contents);
        log::info!(
            "captured {} original nameserver(s) from {}",
            nameservers.len(),
            path.display()
        );
        Ok(Self {
            path,
            original: RwLock::new(Original {
                contents,
                nameservers,
            }),
        })
    }

    fn render(&self, cfg: &HostDnsConfig) -> String {
        let mut out = String::new();
        out.push_str(FILE_HEADER);
        out.push('\n');

        let search = cfg.search_domains();
        if !search.is_empty() {
            out.push_str("search ");
            out.push_str(&search.join(" "));
            out.push('\n');
        }

        out.push_str(&format!("nameserver {}\n", cfg.server_ip));

        if !cfg.route_all {
            // Selective routing is not expressible here; keep the originals
            // reachable as secondary resolvers.
            let original = self.original.read().expect("original lock poisoned");
            for ns in &original.nameservers {
                if *ns != cfg.server_ip {
                    out.push_str(&format!("nameserver {}\n", ns));
                }
            }
        }

        out
    }
}

impl HostManager for ResolvConfManager {
    fn apply_dns_config(&self, cfg: &HostDnsConfig, state: &dyn StateManager) -> Result<()> {
        if !cfg.route_all {
            log::warn!(
                "resolv.conf cannot route domains selectively; installing {} with the original resolvers as fallback",
                cfg.server_ip
            );
        }

        {
            let original = self.original.read().expect("original lock poisoned");
            state.update_state(ShutdownState {
                config: Some(cfg.clone()),
                original_resolv_conf: Some(original.contents.clone()),
            });
        }

        let rendered = self.render(cfg);
        std::fs::write(&self.path, rendered)?;
        log::info!(
            "installed {} as the system resolver via {}",
            cfg.server_ip,
            self.path.display()
        );
        Ok(())
    }

    fn restore_host_dns(&self) -> Result<()> {
        let original = self.original.read().expect("original lock poisoned");
        std::fs::write(&self.path, &original.contents)?;
        log::info!("restored original {}", self.path.display());
        Ok(())
    }

    fn support_custom_port(&self) -> bool {
        false
    }

    fn original_nameservers(&self) -> Vec<IpAddr> {
        self.original
            .read()
            .expect("original lock poisoned")
            .nameservers
            .clone()
    }
}

/// Restore a resolver file from a shutdown checkpoint left by an unclean
/// exit.
pub fn restore_from_state(state: &ShutdownState, path: impl AsRef<Path>) -> Result<()> {
    let contents = state
        .original_resolv_conf
        .as_ref()
        .ok_or_else(|| Error::State("checkpoint has no resolver file contents".into()))?;
    std::fs::write(path.as_ref(), contents)?;
    Ok(())
}

fn parse_nameservers(contents: &str) -> Vec<IpAddr> {
    contents
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let rest = line.strip_prefix("nameserver")?;
            rest.trim().parse().ok()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainConfig;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct RecordingState {
        updates: AtomicUsize,
        last: Mutex<Option<ShutdownState>>,
    }

    impl RecordingState {
        fn new() -> Self {
            Self {
                updates: AtomicUsize::new(0),
                last: Mutex::new(None),
            }
        }
    }

    impl StateManager for RecordingState {
        fn update_state(&self, state: ShutdownState) {
            self.updates.fetch_add(1, Ordering::SeqCst);
            *self.last.lock().unwrap() = Some(state);
        }
        fn delete_state(&self) {}
        fn persist(&self) -> Result<()> {
            Ok(())
        }
    }

    fn temp_resolv_conf(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "weft-resolv-test-{}-{:?}",
            std::process::id(),
            std::thread::current().id()
        ));
        std::fs::write(&path, contents).unwrap();
        path
    }

    const ORIGINAL: &str = "# original\nnameserver 192.168.1.1\nnameserver 192.168.1.2\nsearch lan\n";

    #[test]
    fn test_captures_original_nameservers() {
        let path = temp_resolv_conf(ORIGINAL);
        let manager = ResolvConfManager::with_path(&path).unwrap();
        assert_eq!(
            manager.original_nameservers(),
            vec![
                IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)),
                IpAddr::V4(Ipv4Addr::new(192, 168, 1, 2)),
            ]
        );
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_apply_writes_resolver_and_checkpoint() {
        let path = temp_resolv_conf(ORIGINAL);
        let manager = ResolvConfManager::with_path(&path).unwrap();
        let state = RecordingState::new();

        let cfg = HostDnsConfig {
            server_ip: IpAddr::V4(Ipv4Addr::new(100, 64, 255, 254)),
            server_port: 53,
            route_all: true,
            domains: vec![DomainConfig::new("corp.local", false)],
        };
        manager.apply_dns_config(&cfg, &state).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("nameserver 100.64.255.254"));
        assert!(written.contains("search corp.local"));
        // Full takeover: originals are not listed.
        assert!(!written.contains("192.168.1.1"));

        assert_eq!(state.updates.load(Ordering::SeqCst), 1);
        let checkpoint = state.last.lock().unwrap().clone().unwrap();
        assert_eq!(checkpoint.original_resolv_conf.as_deref(), Some(ORIGINAL));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_match_only_keeps_originals_as_fallback() {
        let path = temp_resolv_conf(ORIGINAL);
        let manager = ResolvConfManager::with_path(&path).unwrap();
        let state = RecordingState::new();

        let cfg = HostDnsConfig {
            server_ip: IpAddr::V4(Ipv4Addr::new(100, 64, 255, 254)),
            server_port: 53,
            route_all: false,
            domains: vec![DomainConfig::new("corp.local", true)],
        };
        manager.apply_dns_config(&cfg, &state).unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.contains("nameserver 100.64.255.254"));
        assert!(written.contains("nameserver 192.168.1.1"));
        assert!(!written.contains("search corp.local"));

        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_restore_rewrites_original() {
        let path = temp_resolv_conf(ORIGINAL);
        let manager = ResolvConfManager::with_path(&path).unwrap();
        let state = RecordingState::new();

        let cfg = HostDnsConfig {
            server_ip: IpAddr::V4(Ipv4Addr::new(100, 64, 255, 254)),
            route_all: true,
            ..Default::default()
        };
        manager.apply_dns_config(&cfg, &state).unwrap();
        manager.restore_host_dns().unwrap();

        assert_eq!(std::fs::read_to_string(&path).unwrap(), ORIGINAL);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_restore_from_checkpoint() {
        let path = temp_resolv_conf("nameserver 100.64.255.254\n");
        let state = ShutdownState {
            config: None,
            original_resolv_conf: Some(ORIGINAL.to_string()),
        };
        restore_from_state(&state, &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), ORIGINAL);
        std::fs::remove_file(path).ok();
    }

    #[test]
    fn test_parse_nameservers_ignores_noise() {
        let parsed = parse_nameservers("# comment\nsearch lan\nnameserver 1.1.1.1\nnameserver bogus\n");
        assert_eq!(parsed, vec![IpAddr::V4(Ipv4Addr::new(1, 1, 1, 1))]);
    }
}
