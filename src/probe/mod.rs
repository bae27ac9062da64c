//! Remote command execution
//!
//! A probe runs one command on one server and hands back whatever the
//! command printed together with its exit status. It never interprets the
//! command: a non-zero exit is a normal result, and only a broken channel
//! (no connection, no ssh client) is an error.

mod ssh;

pub use ssh::SshProbe;

use async_trait::async_trait;

use crate::common::Result;

/// Where a probe command runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    /// Server identity, used in results and error messages
    pub name: String,
    /// Host name or address to connect to
    pub host: String,
    /// Login user, if the server overrides the configured default
    pub user: Option<String>,
}

impl ProbeTarget {
    pub fn new(name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: host.into(),
            user: None,
        }
    }

    pub fn with_user(mut self, user: Option<String>) -> Self {
        self.user = user;
        self
    }
}

/// Captured outcome of one remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    target: String,
    output: String,
    exit_status: i32,
}

impl ProbeResult {
    pub fn new(target: impl Into<String>, output: impl Into<String>, exit_status: i32) -> Self {
        Self {
            target: target.into(),
            output: output.into(),
            exit_status,
        }
    }

    /// Identity of the server the command ran on
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Standard output followed by standard error
    pub fn output(&self) -> &str {
        &self.output
    }

    pub fn exit_status(&self) -> i32 {
        self.exit_status
    }

    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    /// True if the command printed nothing but whitespace
    pub fn is_empty(&self) -> bool {
        self.output.trim().is_empty()
    }
}

/// Runs commands on remote servers
#[async_trait]
pub trait RemoteProbe: Send + Sync {
    /// Run `command` on `target`
    ///
    /// Returns `Error::ProbeTransport` only when the command could not be
    /// delivered at all. No retries.
    async fn run(&self, target: &ProbeTarget, command: &str) -> Result<ProbeResult>;
}
