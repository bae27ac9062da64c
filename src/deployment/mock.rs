//! In-memory deployment for tests and `--simulate` runs
//!
//! Simulates just enough of a deployment to exercise the verifier end to
//! end: servers with a boot sequence, inputs that take effect at launch,
//! and syslog forwarding from a client to the server its
//! `logging/remote_server` input points at. The same object answers probe
//! commands (`logger`, `lsb_release`, `grep`), so it implements both
//! [`Deployment`] and [`RemoteProbe`].
//!
//! Faults can be injected per protocol, per server and per command.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::{Deployment, LifecycleState, ServerHandle, PROTOCOL_INPUT, REMOTE_SERVER_INPUT};
use crate::common::{Error, Result};
use crate::probe::{ProbeResult, ProbeTarget, RemoteProbe};
use crate::verifier::LogPathTable;

const UBUNTU_12: &str = "Description:\tUbuntu 12.04.5 LTS";
const CENTOS_6: &str = "Description:\tCentOS release 6.5 (Final)";

/// One simulated server, configured with builder methods
#[derive(Debug, Clone)]
pub struct MockServer {
    id: String,
    private_address: Option<String>,
    has_private_address: bool,
    reachable_address: Option<String>,
    platform: Option<String>,
    boot_polls: u32,
    never_converges: bool,
    fails_boot: bool,
    monitoring_fails: bool,
    observe_delay: Duration,
    initial_state: LifecycleState,
}

impl MockServer {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            private_address: None,
            has_private_address: true,
            reachable_address: None,
            platform: Some(CENTOS_6.to_string()),
            boot_polls: 0,
            never_converges: false,
            fails_boot: false,
            monitoring_fails: false,
            observe_delay: Duration::ZERO,
            initial_state: LifecycleState::Unprovisioned,
        }
    }

    pub fn private_address(mut self, address: impl Into<String>) -> Self {
        self.private_address = Some(address.into());
        self.has_private_address = true;
        self
    }

    /// Server only has a public address
    pub fn no_private_address(mut self) -> Self {
        self.private_address = None;
        self.has_private_address = false;
        self
    }

    pub fn reachable_address(mut self, address: impl Into<String>) -> Self {
        self.reachable_address = Some(address.into());
        self
    }

    /// Output of `lsb_release -a | grep -i description`
    pub fn platform(mut self, description: impl Into<String>) -> Self {
        self.platform = Some(description.into());
        self
    }

    pub fn ubuntu_12(self) -> Self {
        self.platform(UBUNTU_12)
    }

    /// `lsb_release` is not installed
    pub fn no_lsb_release(mut self) -> Self {
        self.platform = None;
        self
    }

    /// Number of observations that still report `Launching` after launch
    pub fn boot_polls(mut self, polls: u32) -> Self {
        self.boot_polls = polls;
        self
    }

    pub fn never_converges(mut self) -> Self {
        self.never_converges = true;
        self
    }

    /// Boot ends in `Failed`
    pub fn fails_boot(mut self) -> Self {
        self.fails_boot = true;
        self
    }

    pub fn monitoring_fails(mut self) -> Self {
        self.monitoring_fails = true;
        self
    }

    /// Each state observation takes this long
    pub fn observe_delay(mut self, delay: Duration) -> Self {
        self.observe_delay = delay;
        self
    }

    /// Server is already operational when the run starts
    pub fn running(mut self) -> Self {
        self.initial_state = LifecycleState::Operational;
        self
    }
}

#[derive(Debug)]
struct SimulatedServer {
    spec: MockServer,
    private_address: Option<String>,
    reachable_address: String,
    log_path: String,
    state: LifecycleState,
    boot_polls_left: u32,
    pending_inputs: BTreeMap<String, String>,
    inputs: BTreeMap<String, String>,
    log: Vec<LogLine>,
}

#[derive(Debug, Clone)]
struct LogLine {
    text: String,
    visible_at: Instant,
}

impl SimulatedServer {
    fn handle(&self) -> ServerHandle {
        ServerHandle::new(self.spec.id.clone())
            .with_state(self.state)
            .with_inputs(self.inputs.clone())
    }

    fn has_address(&self, address: &str) -> bool {
        self.reachable_address == address || self.private_address.as_deref() == Some(address)
    }
}

#[derive(Debug, Default)]
struct MockDeploymentInner {
    servers: Vec<SimulatedServer>,
    dropped_protocols: HashSet<String>,
    delivery_delay: Duration,
    unreachable: HashSet<String>,
    failing_commands: Vec<(String, String)>,
    launch_log: Vec<String>,
    stop_log: Vec<String>,
    commands: Vec<(String, String)>,
}

/// Simulated deployment
#[derive(Debug, Clone)]
pub struct MockDeployment {
    name: String,
    inner: Arc<Mutex<MockDeploymentInner>>,
}

impl MockDeployment {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Arc::new(Mutex::new(MockDeploymentInner::default())),
        }
    }

    /// One Ubuntu 12 Logging server and one CentOS Base client
    pub fn sample() -> Self {
        Self::new("simulated logging deployment")
            .with_server(
                MockServer::new("Logging with rsyslog")
                    .ubuntu_12()
                    .boot_polls(2),
            )
            .with_server(MockServer::new("Base ServerTemplate").boot_polls(1))
    }

    pub fn with_server(self, server: MockServer) -> Self {
        self.add_server(server);
        self
    }

    /// Add a server; unset addresses are filled in from its position
    pub fn add_server(&self, server: MockServer) {
        let mut inner = self.lock();
        let n = inner.servers.len() + 1;
        let private_address = if server.has_private_address {
            Some(
                server
                    .private_address
                    .clone()
                    .unwrap_or_else(|| format!("10.0.0.{}", n)),
            )
        } else {
            None
        };
        let reachable_address = server
            .reachable_address
            .clone()
            .unwrap_or_else(|| format!("203.0.113.{}", n));
        let log_path = LogPathTable::builtin()
            .select(server.platform.as_deref().unwrap_or(""))
            .to_string();
        let state = server.initial_state;

        inner.servers.push(SimulatedServer {
            spec: server,
            private_address,
            reachable_address,
            log_path,
            state,
            boot_polls_left: 0,
            pending_inputs: BTreeMap::new(),
            inputs: BTreeMap::new(),
            log: Vec::new(),
        });
    }

    /// Forwarded messages using this protocol never arrive
    pub fn drop_protocol(&self, protocol: &str) {
        self.lock().dropped_protocols.insert(protocol.to_string());
    }

    /// Forwarded messages become visible on the receiver after `delay`
    pub fn delay_delivery(&self, delay: Duration) {
        self.lock().delivery_delay = delay;
    }

    /// Probes to this server fail at the channel level
    pub fn make_unreachable(&self, server: &str) {
        self.lock().unreachable.insert(server.to_string());
    }

    /// Commands on `server` starting with `prefix` exit with status 2
    pub fn fail_command(&self, server: &str, prefix: &str) {
        self.lock()
            .failing_commands
            .push((server.to_string(), prefix.to_string()));
    }

    /// Servers in launch order
    pub fn launch_log(&self) -> Vec<String> {
        self.lock().launch_log.clone()
    }

    /// Servers in stop order
    pub fn stop_log(&self) -> Vec<String> {
        self.lock().stop_log.clone()
    }

    /// Every probe command as `(server, command)`
    pub fn commands(&self) -> Vec<(String, String)> {
        self.lock().commands.clone()
    }

    /// Inputs in effect since the server's last launch
    pub fn inputs_of(&self, server: &str) -> BTreeMap<String, String> {
        self.lock()
            .servers
            .iter()
            .find(|s| s.spec.id == server)
            .map(|s| s.inputs.clone())
            .unwrap_or_default()
    }

    /// Lines currently in a server's log file
    pub fn log_of(&self, server: &str) -> Vec<String> {
        self.lock()
            .servers
            .iter()
            .find(|s| s.spec.id == server)
            .map(|s| s.log.iter().map(|l| l.text.clone()).collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, MockDeploymentInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn unknown(id: &str) -> Error {
        Error::Inventory(format!("server '{}' is not part of the deployment", id))
    }

    fn emit(inner: &mut MockDeploymentInner, sender: usize, message: &str) {
        let now = Instant::now();
        let (line, protocol, remote) = {
            let server = &inner.servers[sender];
            (
                format!("{} logger: {}", server.spec.id, message),
                server.inputs.get(PROTOCOL_INPUT).cloned(),
                server.inputs.get(REMOTE_SERVER_INPUT).cloned(),
            )
        };
        inner.servers[sender].log.push(LogLine {
            text: line.clone(),
            visible_at: now,
        });

        let (Some(protocol), Some(remote)) = (protocol, remote) else {
            return;
        };
        if inner.dropped_protocols.contains(&protocol) {
            return;
        }
        let visible_at = now + inner.delivery_delay;
        for (i, receiver) in inner.servers.iter_mut().enumerate() {
            if i != sender
                && receiver.has_address(&remote)
                && receiver.state == LifecycleState::Operational
                && receiver.inputs.get(PROTOCOL_INPUT) == Some(&protocol)
            {
                receiver.log.push(LogLine {
                    text: line.clone(),
                    visible_at,
                });
            }
        }
    }

    fn execute(inner: &mut MockDeploymentInner, index: usize, command: &str) -> (String, i32) {
        let id = inner.servers[index].spec.id.clone();
        if inner
            .failing_commands
            .iter()
            .any(|(server, prefix)| *server == id && command.starts_with(prefix.as_str()))
        {
            return (format!("{}: simulated failure\n", command), 2);
        }

        if let Some(rest) = command.strip_prefix("logger ") {
            Self::emit(inner, index, &unquote(rest));
            return (String::new(), 0);
        }

        let server = &inner.servers[index];
        if command.starts_with("lsb_release") {
            return match &server.spec.platform {
                Some(platform) => (format!("{}\n", platform), 0),
                None => (String::new(), 1),
            };
        }

        if let Some(rest) = command.strip_prefix("grep -F -- ") {
            let (pattern, path) = split_quoted(rest);
            let path = unquote(&path);
            if path != server.log_path {
                return (format!("grep: {}: No such file or directory\n", path), 2);
            }
            let now = Instant::now();
            let matches: Vec<&str> = server
                .log
                .iter()
                .filter(|l| l.visible_at <= now && l.text.contains(&pattern))
                .map(|l| l.text.as_str())
                .collect();
            if matches.is_empty() {
                return (String::new(), 1);
            }
            return (format!("{}\n", matches.join("\n")), 0);
        }

        (format!("sh: {}: command not found\n", command), 127)
    }
}

/// Undo `shell_quote`
fn unquote(value: &str) -> String {
    let value = value.trim();
    let value = value
        .strip_prefix('\'')
        .and_then(|v| v.strip_suffix('\''))
        .unwrap_or(value);
    value.replace(r"'\''", "'")
}

/// Split `'quoted' rest` into the unquoted first word and the rest
fn split_quoted(value: &str) -> (String, String) {
    let value = value.trim();
    if let Some(inner) = value.strip_prefix('\'') {
        if let Some(end) = inner.find('\'') {
            return (
                inner[..end].to_string(),
                inner[end + 1..].trim().to_string(),
            );
        }
    }
    match value.split_once(' ') {
        Some((first, rest)) => (first.to_string(), rest.trim().to_string()),
        None => (value.to_string(), String::new()),
    }
}

#[async_trait]
impl Deployment for MockDeployment {
    fn name(&self) -> &str {
        &self.name
    }

    async fn servers(&self) -> Result<Vec<ServerHandle>> {
        Ok(self.lock().servers.iter().map(|s| s.handle()).collect())
    }

    async fn set_input(&self, server: &ServerHandle, key: &str, value: &str) -> Result<()> {
        let mut inner = self.lock();
        let target = inner
            .servers
            .iter_mut()
            .find(|s| s.spec.id == server.id())
            .ok_or_else(|| Self::unknown(server.id()))?;
        target
            .pending_inputs
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn launch(&self, server: &ServerHandle) -> Result<()> {
        let mut inner = self.lock();
        let target = inner
            .servers
            .iter_mut()
            .find(|s| s.spec.id == server.id())
            .ok_or_else(|| Self::unknown(server.id()))?;
        if target.state != LifecycleState::Unprovisioned {
            return Err(Error::launch_failure(
                server.id(),
                format!("server is {}", target.state),
            ));
        }
        target.state = LifecycleState::Launching;
        target.boot_polls_left = target.spec.boot_polls;
        target.inputs = target.pending_inputs.clone();
        inner.launch_log.push(server.id().to_string());
        Ok(())
    }

    async fn stop(&self, server: &ServerHandle) -> Result<()> {
        let mut inner = self.lock();
        let target = inner
            .servers
            .iter_mut()
            .find(|s| s.spec.id == server.id())
            .ok_or_else(|| Self::unknown(server.id()))?;
        target.state = LifecycleState::Unprovisioned;
        target.log.clear();
        inner.stop_log.push(server.id().to_string());
        Ok(())
    }

    async fn observe_state(&self, server: &ServerHandle) -> Result<LifecycleState> {
        let delay = {
            let inner = self.lock();
            inner
                .servers
                .iter()
                .find(|s| s.spec.id == server.id())
                .ok_or_else(|| Self::unknown(server.id()))?
                .spec
                .observe_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut inner = self.lock();
        let target = inner
            .servers
            .iter_mut()
            .find(|s| s.spec.id == server.id())
            .ok_or_else(|| Self::unknown(server.id()))?;

        if target.state == LifecycleState::Launching {
            if target.spec.fails_boot {
                target.state = LifecycleState::Failed;
            } else if target.spec.never_converges {
                // stays launching
            } else if target.boot_polls_left == 0 {
                target.state = LifecycleState::Operational;
            } else {
                target.boot_polls_left -= 1;
            }
        }
        Ok(target.state)
    }

    async fn check_monitoring(&self, server: &ServerHandle) -> Result<()> {
        let inner = self.lock();
        let target = inner
            .servers
            .iter()
            .find(|s| s.spec.id == server.id())
            .ok_or_else(|| Self::unknown(server.id()))?;
        if target.spec.monitoring_fails || target.state != LifecycleState::Operational {
            return Err(Error::MonitoringCheck {
                server: server.id().to_string(),
                reason: "no collectd data received".to_string(),
            });
        }
        Ok(())
    }

    async fn private_address(&self, server: &ServerHandle) -> Result<Option<String>> {
        let inner = self.lock();
        inner
            .servers
            .iter()
            .find(|s| s.spec.id == server.id())
            .map(|s| s.private_address.clone())
            .ok_or_else(|| Self::unknown(server.id()))
    }

    async fn reachable_address(&self, server: &ServerHandle) -> Result<String> {
        let inner = self.lock();
        inner
            .servers
            .iter()
            .find(|s| s.spec.id == server.id())
            .map(|s| s.reachable_address.clone())
            .ok_or_else(|| Self::unknown(server.id()))
    }
}

#[async_trait]
impl RemoteProbe for MockDeployment {
    async fn run(&self, target: &ProbeTarget, command: &str) -> Result<ProbeResult> {
        let mut inner = self.lock();
        inner
            .commands
            .push((target.name.clone(), command.to_string()));

        if inner.unreachable.contains(&target.name) {
            return Err(Error::probe_transport(&target.name, "Connection timed out"));
        }

        let index = inner
            .servers
            .iter()
            .position(|s| s.spec.id == target.name)
            .ok_or_else(|| {
                Error::probe_transport(&target.name, "Could not resolve hostname")
            })?;

        let server = &inner.servers[index];
        if server.reachable_address != target.host {
            return Err(Error::probe_transport(
                &target.name,
                format!("No route to host {}", target.host),
            ));
        }
        if server.state != LifecycleState::Operational {
            return Err(Error::probe_transport(&target.name, "Connection refused"));
        }

        let (output, exit_status) = Self::execute(&mut inner, index, command);
        Ok(ProbeResult::new(target.name.clone(), output, exit_status))
    }
}
