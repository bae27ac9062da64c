//! Deployment model
//!
//! A deployment is the set of servers a test run works against. The
//! provisioning system behind it is external: this module only defines the
//! [`Deployment`] interface the verifier drives, plus role resolution and the
//! lifecycle state machine built on top of it.
//!
//! Deployments are always passed explicitly, so runs against different
//! deployments never share state.

pub mod inventory;
pub mod lifecycle;
pub mod mock;
pub mod resolver;

pub use inventory::InventoryDeployment;
pub use lifecycle::ServerLifecycle;
pub use mock::{MockDeployment, MockServer};
pub use resolver::ServerRoleResolver;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::Result;

/// Input selecting the log forwarding protocol
pub const PROTOCOL_INPUT: &str = "logging/protocol";

/// Input pointing a client at the server that collects its logs
pub const REMOTE_SERVER_INPUT: &str = "logging/remote_server";

/// Lifecycle state of a server
///
/// `Unprovisioned → Launching → Operational`; any state may move to the
/// terminal `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    #[default]
    Unprovisioned,
    Launching,
    Operational,
    Failed,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, LifecycleState::Failed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Unprovisioned => "unprovisioned",
            LifecycleState::Launching => "launching",
            LifecycleState::Operational => "operational",
            LifecycleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Reference to one provisioned server
///
/// The deployment owns the server. A handle is a snapshot: `state` and
/// `inputs` reflect what was last observed and are refreshed only by
/// [`ServerLifecycle`] and the deployment itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandle {
    id: String,
    state: LifecycleState,
    login_user: Option<String>,
    inputs: BTreeMap<String, String>,
}

impl ServerHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: LifecycleState::Unprovisioned,
            login_user: None,
            inputs: BTreeMap::new(),
        }
    }

    pub fn with_state(mut self, state: LifecycleState) -> Self {
        self.state = state;
        self
    }

    pub fn with_login_user(mut self, user: Option<String>) -> Self {
        self.login_user = user;
        self
    }

    pub fn with_inputs(mut self, inputs: BTreeMap<String, String>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Server identity (its nickname in the deployment)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Last observed lifecycle state
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn login_user(&self) -> Option<&str> {
        self.login_user.as_deref()
    }

    /// Inputs as of when the snapshot was taken
    pub fn inputs(&self) -> &BTreeMap<String, String> {
        &self.inputs
    }
}

impl fmt::Display for ServerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// The provisioning system a test run drives
///
/// Only [`ServerLifecycle`] calls `launch` and `stop`.
#[async_trait]
pub trait Deployment: Send + Sync {
    /// Deployment name, for reports
    fn name(&self) -> &str;

    /// Current membership, queried fresh on every call
    async fn servers(&self) -> Result<Vec<ServerHandle>>;

    /// Set a configuration input; takes effect on the next launch
    async fn set_input(&self, server: &ServerHandle, key: &str, value: &str) -> Result<()>;

    /// Request a server start without waiting for it
    async fn launch(&self, server: &ServerHandle) -> Result<()>;

    /// Request a server stop
    async fn stop(&self, server: &ServerHandle) -> Result<()>;

    /// Ask the platform for the server's current state
    async fn observe_state(&self, server: &ServerHandle) -> Result<LifecycleState>;

    /// Health assertion on the server's monitoring
    ///
    /// Fails with `Error::MonitoringCheck`.
    async fn check_monitoring(&self, server: &ServerHandle) -> Result<()>;

    /// Address on the deployment's private network, if it has one
    async fn private_address(&self, server: &ServerHandle) -> Result<Option<String>>;

    /// Address the orchestrator can reach the server on
    async fn reachable_address(&self, server: &ServerHandle) -> Result<String>;
}
