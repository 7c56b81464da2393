//! Windows host DNS back end
//!
//! Installs Name Resolution Policy Table rules through the registry with
//! `reg`, matching how the interface layer drives `netsh` and `reg` for NAT
//! setup. One rule is created per routed namespace; `route_all` adds a rule
//! for the root namespace.

use std::process::Command;
use std::sync::RwLock;

use crate::config::{HostDnsConfig, ShutdownState};
use crate::error::{Error, Result};
use crate::manager::{HostManager, StateManager};

const NRPT_BASE: &str =
    r"HKLM\SYSTEM\CurrentControlSet\Services\Dnscache\Parameters\DnsPolicyConfig";
const RULE_PREFIX: &str = "weft-dns";

/// Host manager backed by NRPT registry rules.
pub struct NrptManager {
    rule_names: RwLock<Vec<String>>,
}

impl NrptManager {
    pub fn new() -> Result<Self> {
        Ok(Self {
            rule_names: RwLock::new(Vec::new()),
        })
    }

    fn run(program: &str, args: &[&str]) -> Result<()> {
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| Error::Command {
                command: program.into(),
                detail: e.to_string(),
            })?;
        if !output.status.success() {
            return Err(Error::Command {
                command: format!("{} {}", program, args.join(" ")),
                detail: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }

    fn add_rule(name: &str, namespace: &str, server: &str) -> Result<()> {
        let key = format!(r"{}\{}", NRPT_BASE, name);
        Self::run("reg", &["add", &key, "/f"])?;
        Self::run(
            "reg",
            &[
                "add", &key, "/v", "Name", "/t", "REG_MULTI_SZ", "/d", namespace, "/f",
            ],
        )?;
        Self::run(
            "reg",
            &[
                "add", &key, "/v", "GenericDNSServers", "/t", "REG_SZ", "/d", server, "/f",
            ],
        )?;
        Self::run(
            "reg",
            &[
                "add", &key, "/v", "ConfigOptions", "/t", "REG_DWORD", "/d", "0x8", "/f",
            ],
        )
    }

    fn delete_rules(&self) -> Result<()> {
        let mut names = self.rule_names.write().expect("rules lock poisoned");
        for name in names.drain(..) {
            let key = format!(r"{}\{}", NRPT_BASE, name);
            if let Err(err) = Self::run("reg", &["delete", &key, "/f"]) {
                log::warn!("failed to delete NRPT rule {}: {}", name, err);
            }
        }
        Ok(())
    }
}

impl HostManager for NrptManager {
    fn apply_dns_config(&self, cfg: &HostDnsConfig, state: &dyn StateManager) -> Result<()> {
        state.update_state(ShutdownState {
            config: Some(cfg.clone()),
            original_resolv_conf: None,
        });

        self.delete_rules()?;

        let server = cfg.server_ip.to_string();
        let mut created = Vec::new();

        if cfg.route_all {
            let name = format!("{}-root", RULE_PREFIX);
            Self::add_rule(&name, ".", &server)?;
            created.push(name);
        }

        for (i, domain) in cfg.domains.iter().filter(|d| !d.disabled).enumerate() {
            let name = format!("{}-{}", RULE_PREFIX, i);
            Self::add_rule(&name, &format!(".{}", domain.domain), &server)?;
            created.push(name);
        }

        *self.rule_names.write().expect("rules lock poisoned") = created;

        // Nudge the resolver cache so new rules take effect promptly.
        if let Err(err) = Self::run("ipconfig", &["/flushdns"]) {
            log::debug!("flushdns failed: {}", err);
        }

        log::info!("installed {} NRPT rule(s) for {}", cfg.domains.len(), server);
        Ok(())
    }

    fn restore_host_dns(&self) -> Result<()> {
        self.delete_rules()?;
        if let Err(err) = Self::run("ipconfig", &["/flushdns"]) {
            log::debug!("flushdns failed: {}", err);
        }
        Ok(())
    }

    fn support_custom_port(&self) -> bool {
        // NRPT rules carry bare server addresses without ports.
        false
    }
}
