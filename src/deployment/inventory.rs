//! Static inventory deployment
//!
//! Drives servers listed in a YAML inventory over ssh. "Launching" a server
//! runs the inventory's launch command with the server's inputs exported as
//! environment variables (`logging/remote_server` becomes
//! `LOGGING_REMOTE_SERVER`); its state is read back from the status command.
//!
//! ```yaml
//! name: rsyslog smoke test
//! commands:
//!   launch: sudo /usr/local/bin/configure-logging && sudo systemctl restart rsyslog
//!   status: systemctl is-active rsyslog
//! servers:
//!   - name: Logging with rsyslog
//!     private_address: 10.0.0.5
//!     reachable_address: 203.0.113.5
//!   - name: Base ServerTemplate
//!     reachable_address: 203.0.113.6
//!     user: ubuntu
//! ```

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Deployment, LifecycleState, ServerHandle};
use crate::common::{shell_quote, Error, Result};
use crate::probe::{ProbeTarget, RemoteProbe};

/// Parsed inventory file
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Inventory {
    pub name: String,
    #[serde(default)]
    pub commands: LifecycleCommands,
    pub servers: Vec<InventoryServer>,
}

/// Commands the inventory backend runs on a server
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LifecycleCommands {
    #[serde(default = "default_launch")]
    pub launch: String,
    #[serde(default = "default_stop")]
    pub stop: String,
    /// Prints one word describing the state, see [`parse_state`]
    #[serde(default = "default_status")]
    pub status: String,
    /// Exits zero when monitoring is healthy
    #[serde(default = "default_monitoring")]
    pub monitoring: String,
}

impl Default for LifecycleCommands {
    fn default() -> Self {
        Self {
            launch: default_launch(),
            stop: default_stop(),
            status: default_status(),
            monitoring: default_monitoring(),
        }
    }
}

fn default_launch() -> String {
    "sudo systemctl restart rsyslog".to_string()
}
fn default_stop() -> String {
    "sudo systemctl stop rsyslog".to_string()
}
fn default_status() -> String {
    "systemctl is-active rsyslog".to_string()
}
fn default_monitoring() -> String {
    "pgrep -x collectd".to_string()
}

/// One server entry
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct InventoryServer {
    pub name: String,
    #[serde(default)]
    pub private_address: Option<String>,
    #[serde(alias = "public_address")]
    pub reachable_address: String,
    /// Login user, overriding the probe default
    #[serde(default)]
    pub user: Option<String>,
}

impl Inventory {
    /// Load and validate an inventory file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let inventory: Inventory = serde_yaml::from_str(&content)?;
        inventory.validate()?;
        Ok(inventory)
    }

    fn validate(&self) -> Result<()> {
        if self.servers.is_empty() {
            return Err(Error::Inventory(format!(
                "deployment '{}' lists no servers",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for server in &self.servers {
            if !seen.insert(server.name.as_str()) {
                return Err(Error::Inventory(format!(
                    "server '{}' is listed twice",
                    server.name
                )));
            }
            if server.reachable_address.trim().is_empty() {
                return Err(Error::Inventory(format!(
                    "server '{}' has no reachable address",
                    server.name
                )));
            }
        }
        Ok(())
    }

    fn server(&self, name: &str) -> Result<&InventoryServer> {
        self.servers
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::Inventory(format!("unknown server '{}'", name)))
    }

    /// Where probe commands for a server connect
    pub fn probe_target(&self, name: &str) -> Result<ProbeTarget> {
        let entry = self.server(name)?;
        Ok(ProbeTarget::new(&entry.name, &entry.reachable_address).with_user(entry.user.clone()))
    }
}

/// Map a status word to a lifecycle state
///
/// Understands both platform vocabulary (`operational`, `booting`,
/// `stranded`) and systemd's `is-active` output.
pub fn parse_state(output: &str) -> Option<LifecycleState> {
    let word = output.split_whitespace().next()?.to_lowercase();
    let state = match word.as_str() {
        "operational" | "active" | "running" => LifecycleState::Operational,
        "pending" | "booting" | "launching" | "activating" | "starting" | "reloading" => {
            LifecycleState::Launching
        }
        "stopped" | "inactive" | "terminated" | "unprovisioned" | "deactivating" => {
            LifecycleState::Unprovisioned
        }
        "failed" | "stranded" | "error" => LifecycleState::Failed,
        _ => return None,
    };
    Some(state)
}

/// Environment variable name for an input key
pub fn input_env_name(key: &str) -> String {
    key.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect()
}

/// Deployment backed by an inventory file and a remote probe
pub struct InventoryDeployment<P> {
    inventory: Inventory,
    probe: P,
    inputs: Mutex<HashMap<String, BTreeMap<String, String>>>,
    states: Mutex<HashMap<String, LifecycleState>>,
}

impl<P: RemoteProbe> InventoryDeployment<P> {
    pub fn new(inventory: Inventory, probe: P) -> Self {
        Self {
            inventory,
            probe,
            inputs: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
        }
    }

    pub fn inventory(&self) -> &Inventory {
        &self.inventory
    }

    /// The probe used for lifecycle commands
    pub fn probe(&self) -> &P {
        &self.probe
    }

    fn target(&self, server: &ServerHandle) -> Result<ProbeTarget> {
        self.inventory.probe_target(server.id())
    }

    fn inputs_of(&self, name: &str) -> BTreeMap<String, String> {
        self.inputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    fn record_state(&self, name: &str, state: LifecycleState) {
        self.states
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), state);
    }

    /// Launch command with the server's inputs in its environment
    fn launch_command(&self, name: &str) -> String {
        let mut command = String::from("env");
        for (key, value) in self.inputs_of(name) {
            command.push(' ');
            command.push_str(&input_env_name(&key));
            command.push('=');
            command.push_str(&shell_quote(&value));
        }
        command.push_str(" sh -c ");
        command.push_str(&shell_quote(&self.inventory.commands.launch));
        command
    }
}

#[async_trait]
impl<P: RemoteProbe> Deployment for InventoryDeployment<P> {
    fn name(&self) -> &str {
        &self.inventory.name
    }

    async fn servers(&self) -> Result<Vec<ServerHandle>> {
        let states = self.states.lock().unwrap_or_else(|e| e.into_inner()).clone();
        Ok(self
            .inventory
            .servers
            .iter()
            .map(|s| {
                ServerHandle::new(s.name.clone())
                    .with_state(states.get(&s.name).copied().unwrap_or_default())
                    .with_login_user(s.user.clone())
                    .with_inputs(self.inputs_of(&s.name))
            })
            .collect())
    }

    async fn set_input(&self, server: &ServerHandle, key: &str, value: &str) -> Result<()> {
        self.inventory.server(server.id())?;
        self.inputs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(server.id().to_string())
            .or_default()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn launch(&self, server: &ServerHandle) -> Result<()> {
        let target = self.target(server)?;
        let command = self.launch_command(server.id());
        let result = self.probe.run(&target, &command).await?;
        if !result.success() {
            return Err(Error::launch_failure(
                server.id(),
                format!(
                    "launch command exited with {}: {}",
                    result.exit_status(),
                    result.output().trim()
                ),
            ));
        }
        self.record_state(server.id(), LifecycleState::Launching);
        Ok(())
    }

    async fn stop(&self, server: &ServerHandle) -> Result<()> {
        let target = self.target(server)?;
        let command = &self.inventory.commands.stop;
        let result = self.probe.run(&target, command).await?;
        if !result.success() {
            tracing::warn!(
                server = %server,
                exit_status = result.exit_status(),
                "Stop command failed"
            );
        }
        Ok(())
    }

    async fn observe_state(&self, server: &ServerHandle) -> Result<LifecycleState> {
        let target = self.target(server)?;
        let command = &self.inventory.commands.status;
        let result = self.probe.run(&target, command).await?;

        let state = match parse_state(result.output()) {
            Some(state) => state,
            None if result.is_empty() && !result.success() => {
                return Err(Error::ProbeCommand {
                    target: result.target().to_string(),
                    command: command.clone(),
                    exit_status: result.exit_status(),
                    output: String::new(),
                });
            }
            None => {
                tracing::warn!(server = %server, output = %result.output().trim(), "Unrecognised status, assuming launching");
                LifecycleState::Launching
            }
        };
        self.record_state(server.id(), state);
        Ok(state)
    }

    async fn check_monitoring(&self, server: &ServerHandle) -> Result<()> {
        let target = self.target(server)?;
        let command = &self.inventory.commands.monitoring;
        let result = self.probe.run(&target, command).await?;
        if !result.success() {
            return Err(Error::MonitoringCheck {
                server: server.id().to_string(),
                reason: format!(
                    "'{}' exited with {}: {}",
                    command,
                    result.exit_status(),
                    result.output().trim()
                ),
            });
        }
        Ok(())
    }

    async fn private_address(&self, server: &ServerHandle) -> Result<Option<String>> {
        Ok(self.inventory.server(server.id())?.private_address.clone())
    }

    async fn reachable_address(&self, server: &ServerHandle) -> Result<String> {
        Ok(self.inventory.server(server.id())?.reachable_address.clone())
    }
}
