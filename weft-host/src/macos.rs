//! macOS host DNS back end
//!
//! Publishes the virtual resolver through the SystemConfiguration dynamic
//! store using `scutil`, the same way the interface layer drives `ifconfig`
//! and `route`. Match-only domains become supplemental match domains, so
//! the resolver can claim zones without becoming the system default.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::RwLock;

use crate::config::{HostDnsConfig, ShutdownState};
use crate::error::{Error, Result};
use crate::manager::{HostManager, StateManager};

const STORE_KEY: &str = "State:/Network/Service/weft/DNS";

/// Host manager backed by the SystemConfiguration dynamic store.
pub struct ScutilManager {
    installed: RwLock<bool>,
}

impl ScutilManager {
    pub fn new() -> Result<Self> {
        Ok(Self {
            installed: RwLock::new(false),
        })
    }

    fn run_scutil(script: &str) -> Result<()> {
        let mut child = Command::new("scutil")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::Command {
                command: "scutil".into(),
                detail: e.to_string(),
            })?;

        child
            .stdin
            .as_mut()
            .ok_or_else(|| Error::Command {
                command: "scutil".into(),
                detail: "stdin unavailable".into(),
            })?
            .write_all(script.as_bytes())?;

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(Error::Command {
                command: "scutil".into(),
                detail: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

impl HostManager for ScutilManager {
    fn apply_dns_config(&self, cfg: &HostDnsConfig, state: &dyn StateManager) -> Result<()> {
        state.update_state(ShutdownState {
            config: Some(cfg.clone()),
            original_resolv_conf: None,
        });

        let mut script = String::from("d.init\n");
        script.push_str(&format!("d.add ServerAddresses * {}\n", cfg.server_ip));
        if cfg.server_port != 53 {
            script.push_str(&format!("d.add ServerPort # {}\n", cfg.server_port));
        }

        let search = cfg.search_domains();
        if !search.is_empty() {
            script.push_str(&format!("d.add SearchDomains * {}\n", search.join(" ")));
        }

        if !cfg.route_all {
            let match_domains: Vec<&str> = cfg
                .domains
                .iter()
                .filter(|d| !d.disabled)
                .map(|d| d.domain.as_str())
                .collect();
            if match_domains.is_empty() {
                log::debug!("no active match domains and route-all disabled; removing store key");
                return self.restore_host_dns();
            }
            script.push_str(&format!(
                "d.add SupplementalMatchDomains * {}\n",
                match_domains.join(" ")
            ));
        }

        script.push_str(&format!("set {}\nquit\n", STORE_KEY));
        Self::run_scutil(&script)?;
        *self.installed.write().expect("installed lock poisoned") = true;
        log::info!("installed {} in the dynamic store", cfg.server_ip);
        Ok(())
    }

    fn restore_host_dns(&self) -> Result<()> {
        let mut installed = self.installed.write().expect("installed lock poisoned");
        if !*installed {
            return Ok(());
        }
        Self::run_scutil(&format!("remove {}\nquit\n", STORE_KEY))?;
        *installed = false;
        log::info!("removed the weft DNS entry from the dynamic store");
        Ok(())
    }

    fn support_custom_port(&self) -> bool {
        true
    }
}
