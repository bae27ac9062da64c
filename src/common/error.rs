//! Error types for logprobe
//!
//! Scenario failures carry enough context (target server, tag, transport)
//! to reproduce the check by hand.

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for logprobe
#[derive(Error, Debug)]
pub enum Error {
    // === Topology Errors ===
    #[error("No servers matching role pattern '{pattern}' found in the deployment")]
    EmptyRoleSet { pattern: String },

    // === Lifecycle Errors ===
    #[error("Server '{server}' did not become {state} within {timeout_secs} seconds")]
    StateTimeout {
        server: String,
        state: String,
        timeout_secs: u64,
    },

    #[error("Server '{server}' failed to launch: {reason}")]
    LaunchFailure { server: String, reason: String },

    #[error("Monitoring check failed on '{server}': {reason}")]
    MonitoringCheck { server: String, reason: String },

    // === Probe Errors ===
    #[error("Could not reach '{target}' to run a probe: {reason}")]
    ProbeTransport { target: String, reason: String },

    #[error("Probe command '{command}' failed on '{target}' (exit {exit_status}): {output}")]
    ProbeCommand {
        target: String,
        command: String,
        exit_status: i32,
        output: String,
    },

    // === Propagation Errors ===
    #[error("Log message \"{tag}\" not found on the Logging server '{target}' (transport: {transport})")]
    MissingLogMessage {
        target: String,
        tag: String,
        transport: String,
    },

    #[error("{failed} of {total} scenarios failed")]
    ScenariosFailed { failed: usize, total: usize },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    #[error("Invalid deployment inventory: {0}")]
    Inventory(String),

    // === IO Errors ===
    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    /// Create a launch failure error
    pub fn launch_failure(server: &str, reason: impl Into<String>) -> Self {
        Self::LaunchFailure {
            server: server.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a probe transport error
    pub fn probe_transport(target: &str, reason: impl Into<String>) -> Self {
        Self::ProbeTransport {
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable code used in scenario reports
    ///
    /// Returns `None` for errors that are not part of the scenario failure
    /// taxonomy (configuration, IO, serialization).
    pub fn failure_code(&self) -> Option<&'static str> {
        let code = match self {
            Error::EmptyRoleSet { .. } => "EMPTY_ROLE_SET",
            Error::StateTimeout { .. } => "STATE_TIMEOUT",
            Error::LaunchFailure { .. } => "LAUNCH_FAILURE",
            Error::MonitoringCheck { .. } => "MONITORING_CHECK",
            Error::ProbeTransport { .. } => "PROBE_TRANSPORT",
            Error::ProbeCommand { .. } => "PROBE_COMMAND",
            Error::MissingLogMessage { .. } => "MISSING_LOG_MESSAGE",
            _ => return None,
        };
        Some(code)
    }
}

/// Serializable failure detail for scenario reports
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TestFailure {
    pub code: String,
    pub message: String,
}

impl From<&Error> for TestFailure {
    fn from(e: &Error) -> Self {
        Self {
            code: e.failure_code().unwrap_or("INTERNAL_ERROR").to_string(),
            message: e.to_string(),
        }
    }
}
