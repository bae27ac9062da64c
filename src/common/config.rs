//! Configuration file handling

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::Result;
use crate::verifier::LogPathRule;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    /// Lifecycle timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Log propagation polling settings
    #[serde(default)]
    pub propagation: PropagationConfig,

    /// Role patterns for the two cooperating servers
    #[serde(default)]
    pub roles: RoleConfig,

    /// Remote execution settings
    #[serde(default)]
    pub probe: ProbeConfig,

    /// Extra platform to log file rules, checked before the builtin ones
    #[serde(default)]
    pub log_paths: Vec<LogPathRule>,
}

/// Timeout settings in seconds
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Timeouts {
    /// How long a server may take to become operational
    #[serde(default = "default_operational")]
    pub operational_secs: u64,

    /// Interval between lifecycle state observations
    #[serde(default = "default_state_poll")]
    pub state_poll_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            operational_secs: default_operational(),
            state_poll_secs: default_state_poll(),
        }
    }
}

impl Timeouts {
    pub fn operational(&self) -> Duration {
        Duration::from_secs(self.operational_secs)
    }

    pub fn state_poll(&self) -> Duration {
        Duration::from_secs(self.state_poll_secs.max(1))
    }
}

fn default_operational() -> u64 {
    1200
}
fn default_state_poll() -> u64 {
    10
}

/// How long to wait for a marker message to show up on the receiver
///
/// The first search happens after `settle_secs`; later searches back off
/// from `poll_interval_ms` by `backoff_multiplier` up to `max_interval_secs`.
/// Nothing is searched after `timeout_secs` has elapsed since emission.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PropagationConfig {
    #[serde(default = "default_settle")]
    pub settle_secs: u64,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_backoff")]
    pub backoff_multiplier: f64,

    #[serde(default = "default_max_interval")]
    pub max_interval_secs: u64,

    #[serde(default = "default_propagation_timeout")]
    pub timeout_secs: u64,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            settle_secs: default_settle(),
            poll_interval_ms: default_poll_interval(),
            backoff_multiplier: default_backoff(),
            max_interval_secs: default_max_interval(),
            timeout_secs: default_propagation_timeout(),
        }
    }
}

impl PropagationConfig {
    pub fn settle(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_secs(self.max_interval_secs).max(self.poll_interval())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Next poll interval after `current`, capped at `max_interval`
    pub fn next_interval(&self, current: Duration) -> Duration {
        let multiplier = if self.backoff_multiplier.is_finite() && self.backoff_multiplier >= 1.0 {
            self.backoff_multiplier
        } else {
            1.0
        };
        let max = self.max_interval();
        Duration::try_from_secs_f64(current.as_secs_f64() * multiplier)
            .unwrap_or(max)
            .min(max)
    }
}

fn default_settle() -> u64 {
    5
}
fn default_poll_interval() -> u64 {
    1000
}
fn default_backoff() -> f64 {
    2.0
}
fn default_max_interval() -> u64 {
    10
}
fn default_propagation_timeout() -> u64 {
    60
}

/// Role patterns
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoleConfig {
    /// Pattern selecting the server that receives forwarded logs
    #[serde(default = "default_receiver")]
    pub receiver: String,

    /// Pattern selecting the client server that emits the marker
    #[serde(default = "default_sender")]
    pub sender: String,

    /// Stop every server in the deployment before each scenario
    #[serde(default = "default_true")]
    pub stop_before_run: bool,
}

impl Default for RoleConfig {
    fn default() -> Self {
        Self {
            receiver: default_receiver(),
            sender: default_sender(),
            stop_before_run: true,
        }
    }
}

fn default_receiver() -> String {
    "Logging".to_string()
}
fn default_sender() -> String {
    "Base".to_string()
}
fn default_true() -> bool {
    true
}

/// SSH settings for remote probes
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProbeConfig {
    /// Login user, unless a server overrides it in the inventory
    #[serde(default = "default_user")]
    pub user: String,

    /// SSH port
    #[serde(default)]
    pub port: Option<u16>,

    /// SSH connection timeout
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Verify host keys (disabled by default: test servers are ephemeral)
    #[serde(default)]
    pub strict_host_key_checking: bool,

    /// Identity file passed with `-i`
    #[serde(default)]
    pub identity_file: Option<PathBuf>,

    /// Extra `-o` options
    #[serde(default)]
    pub options: Vec<String>,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            user: default_user(),
            port: None,
            connect_timeout_secs: default_connect_timeout(),
            strict_host_key_checking: false,
            identity_file: None,
            options: Vec::new(),
        }
    }
}

fn default_user() -> String {
    "root".to_string()
}
fn default_connect_timeout() -> u64 {
    30
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| super::Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        toml::from_str(&content).map_err(|e| super::Error::ConfigParse(e.to_string()))
    }
}
