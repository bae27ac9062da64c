//! SSH probe
//!
//! Shells out to the system `ssh` client with `tokio::process::Command`.
//! Authentication is left to the local ssh setup (agent or identity file);
//! batch mode keeps a missing key from blocking on a password prompt.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use super::{ProbeResult, ProbeTarget, RemoteProbe};
use crate::common::config::ProbeConfig;
use crate::common::{Error, Result};

/// Exit status ssh itself uses for connection and authentication errors
const SSH_CHANNEL_FAILURE: i32 = 255;

/// Remote probe over the system ssh client
#[derive(Debug, Clone)]
pub struct SshProbe {
    program: PathBuf,
    config: ProbeConfig,
}

impl SshProbe {
    /// Create a probe using the `ssh` found on PATH
    pub fn new(config: ProbeConfig) -> Result<Self> {
        let program = which::which("ssh")
            .map_err(|e| Error::Config(format!("ssh client not found on PATH: {}", e)))?;
        Ok(Self::with_program(program, config))
    }

    /// Create a probe using an explicit ssh executable
    pub fn with_program(program: PathBuf, config: ProbeConfig) -> Self {
        Self { program, config }
    }

    /// Build the ssh argument list for a target, without the command
    fn args(&self, target: &ProbeTarget) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.config.connect_timeout_secs),
            "-o".to_string(),
            format!(
                "StrictHostKeyChecking={}",
                if self.config.strict_host_key_checking { "yes" } else { "no" }
            ),
        ];

        if !self.config.strict_host_key_checking {
            args.push("-o".to_string());
            args.push("UserKnownHostsFile=/dev/null".to_string());
        }

        if let Some(port) = self.config.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }

        if let Some(identity) = &self.config.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }

        for option in &self.config.options {
            args.push("-o".to_string());
            args.push(option.clone());
        }

        let user = target.user.as_deref().unwrap_or(&self.config.user);
        args.push(format!("{}@{}", user, target.host));
        args
    }
}

#[async_trait]
impl RemoteProbe for SshProbe {
    async fn run(&self, target: &ProbeTarget, command: &str) -> Result<ProbeResult> {
        tracing::debug!(target = %target.name, host = %target.host, %command, "Running probe");

        let output = Command::new(&self.program)
            .args(self.args(target))
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| Error::probe_transport(&target.name, format!("failed to spawn ssh: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);

        let exit_status = match output.status.code() {
            Some(SSH_CHANNEL_FAILURE) => {
                return Err(Error::probe_transport(&target.name, stderr.trim().to_string()));
            }
            Some(code) => code,
            None => {
                return Err(Error::probe_transport(
                    &target.name,
                    "ssh was terminated by a signal",
                ));
            }
        };

        tracing::debug!(target = %target.name, exit_status, "Probe finished");

        Ok(ProbeResult::new(
            target.name.clone(),
            format!("{}{}", stdout, stderr),
            exit_status,
        ))
    }
}
