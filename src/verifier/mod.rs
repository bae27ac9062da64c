//! Log propagation verification
//!
//! Proves that a message logged on a client server shows up in the log file
//! of the server it forwards to. There is no network tap: the only way to
//! observe anything is to run commands on the two servers, so the check is
//! emit a uniquely tagged line on the sender, then search the receiver's log
//! for the tag until it appears or the propagation window closes.
//!
//! Steps, strictly in order:
//! 1. resolve the receiver and sender roles, take the first server of each
//! 2. configure, launch and await the receiver, then check its monitoring
//! 3. point the sender at the receiver's address, launch and await it
//! 4. emit the marker on the sender
//! 5. settle, identify the receiver's platform and log file
//! 6. search for the marker with backoff until found or timed out

mod log_path;
mod tag;
mod transport;

pub use log_path::{LogPathRule, LogPathTable, DEFAULT_LOG_PATH};
pub use tag::{generate_tag, marker_message};
pub use transport::Transport;

use serde::Serialize;
use tokio::time::{sleep, Instant};

use crate::common::config::{Config, PropagationConfig, RoleConfig, Timeouts};
use crate::common::{deadline_after, shell_quote, Error, Result};
use crate::deployment::{
    Deployment, LifecycleState, ServerHandle, ServerLifecycle, ServerRoleResolver,
    PROTOCOL_INPUT, REMOTE_SERVER_INPUT,
};
use crate::probe::{ProbeResult, ProbeTarget, RemoteProbe};

/// Prints the platform description line on the receiver
const PLATFORM_COMMAND: &str = "lsb_release -a | grep -i description";

fn emit_command(message: &str) -> String {
    format!("logger {}", shell_quote(message))
}

fn search_command(tag: &str, log_path: &str) -> String {
    format!("grep -F -- {} {}", shell_quote(tag), shell_quote(log_path))
}

/// Settings for one verifier
#[derive(Debug, Clone, Default)]
pub struct VerifierSettings {
    pub roles: RoleConfig,
    pub timeouts: Timeouts,
    pub propagation: PropagationConfig,
    pub log_paths: LogPathTable,
}

impl VerifierSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            roles: config.roles.clone(),
            timeouts: config.timeouts.clone(),
            propagation: config.propagation.clone(),
            log_paths: LogPathTable::with_rules(&config.log_paths),
        }
    }
}

/// What a successful verification observed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Delivery {
    pub sender: String,
    pub receiver: String,
    /// Address the sender was configured to forward to
    pub receiver_address: String,
    pub tag: String,
    pub log_path: String,
    /// Number of log searches until the tag was found
    pub searches: u32,
    /// Time from emission to the successful search
    pub elapsed_ms: u64,
}

/// Address a client should forward to: private if the server has one
pub async fn forwarding_address(
    deployment: &dyn Deployment,
    server: &ServerHandle,
) -> Result<String> {
    match deployment.private_address(server).await? {
        Some(address) if !address.trim().is_empty() => Ok(address),
        _ => deployment.reachable_address(server).await,
    }
}

/// Any failure while configuring a server counts as a failed launch
fn configure_failure(server: &ServerHandle, err: Error) -> Error {
    if err.failure_code().is_some() {
        err
    } else {
        Error::launch_failure(server.id(), err.to_string())
    }
}

fn command_failed(result: &ProbeResult, command: &str) -> Error {
    Error::ProbeCommand {
        target: result.target().to_string(),
        command: command.to_string(),
        exit_status: result.exit_status(),
        output: result.output().trim().to_string(),
    }
}

/// Drives one deployment through the propagation check
pub struct LogPropagationVerifier<'a> {
    deployment: &'a dyn Deployment,
    probe: &'a dyn RemoteProbe,
    settings: VerifierSettings,
}

impl<'a> LogPropagationVerifier<'a> {
    pub fn new(
        deployment: &'a dyn Deployment,
        probe: &'a dyn RemoteProbe,
        settings: VerifierSettings,
    ) -> Self {
        Self {
            deployment,
            probe,
            settings,
        }
    }

    pub fn deployment(&self) -> &dyn Deployment {
        self.deployment
    }

    /// Verify that a marker crosses from sender to receiver over `transport`
    ///
    /// Returns normally only when the marker was found in the receiver's
    /// log. Every failure is one of the typed scenario errors.
    pub async fn verify(&self, transport: Transport) -> Result<Delivery> {
        let roles = &self.settings.roles;
        let operational_timeout = self.settings.timeouts.operational();
        let resolver = ServerRoleResolver::new(self.deployment);
        let mut lifecycle =
            ServerLifecycle::new(self.deployment, self.settings.timeouts.state_poll());

        if roles.stop_before_run {
            lifecycle.stop_all(operational_timeout).await?;
        }

        let mut receiver = resolver.first(&roles.receiver).await?;
        let mut sender = resolver.first(&roles.sender).await?;
        tracing::info!(
            receiver = %receiver,
            sender = %sender,
            %transport,
            "Selected servers"
        );

        self.deployment
            .set_input(&receiver, PROTOCOL_INPUT, transport.as_input_value())
            .await
            .map_err(|e| configure_failure(&receiver, e))?;
        lifecycle.launch(&mut receiver).await?;
        lifecycle
            .await_state(&mut receiver, LifecycleState::Operational, operational_timeout)
            .await?;
        self.deployment.check_monitoring(&receiver).await?;

        let receiver_address = forwarding_address(self.deployment, &receiver).await?;
        tracing::info!(receiver = %receiver, address = %receiver_address, "Receiver is operational");

        self.deployment
            .set_input(&sender, REMOTE_SERVER_INPUT, &receiver_address)
            .await
            .map_err(|e| configure_failure(&sender, e))?;
        self.deployment
            .set_input(&sender, PROTOCOL_INPUT, transport.as_input_value())
            .await
            .map_err(|e| configure_failure(&sender, e))?;
        lifecycle.launch(&mut sender).await?;
        lifecycle
            .await_state(&mut sender, LifecycleState::Operational, operational_timeout)
            .await?;

        let sender_target = self.probe_target(&sender).await?;
        let receiver_target = self.probe_target(&receiver).await?;

        let tag = generate_tag();
        let message = marker_message(&sender_target.host, &tag);
        let command = emit_command(&message);
        let emitted = self.probe.run(&sender_target, &command).await?;
        if !emitted.success() {
            return Err(command_failed(&emitted, &command));
        }
        let emitted_at = Instant::now();
        tracing::info!(sender = %sender, %tag, "Emitted marker");

        sleep(self.settings.propagation.settle()).await;

        let log_path = self.identify_log_path(&receiver_target).await?;
        let searches = self
            .await_delivery(&receiver_target, &tag, &log_path, transport, emitted_at)
            .await?;

        let elapsed = emitted_at.elapsed();
        tracing::info!(
            receiver = %receiver,
            %tag,
            searches,
            elapsed_ms = elapsed.as_millis() as u64,
            "Marker delivered"
        );

        Ok(Delivery {
            sender: sender.id().to_string(),
            receiver: receiver.id().to_string(),
            receiver_address,
            tag,
            log_path,
            searches,
            elapsed_ms: elapsed.as_millis() as u64,
        })
    }

    async fn probe_target(&self, server: &ServerHandle) -> Result<ProbeTarget> {
        let host = self.deployment.reachable_address(server).await?;
        Ok(ProbeTarget::new(server.id(), host)
            .with_user(server.login_user().map(str::to_string)))
    }

    /// Log file the receiver's syslog daemon writes to
    async fn identify_log_path(&self, receiver: &ProbeTarget) -> Result<String> {
        let result = self.probe.run(receiver, PLATFORM_COMMAND).await?;
        if !result.success() {
            return Err(command_failed(&result, PLATFORM_COMMAND));
        }
        let platform = result.output().trim();
        let path = self.settings.log_paths.select(platform).to_string();
        tracing::debug!(receiver = %receiver.name, platform, log_path = %path, "Identified platform");
        Ok(path)
    }

    /// Search for the tag until found or the propagation window closes
    ///
    /// An empty search result means "not there yet". Output with a
    /// non-zero exit is a broken search command and fails immediately.
    async fn await_delivery(
        &self,
        receiver: &ProbeTarget,
        tag: &str,
        log_path: &str,
        transport: Transport,
        emitted_at: Instant,
    ) -> Result<u32> {
        let propagation = &self.settings.propagation;
        let deadline = deadline_after(emitted_at, propagation.timeout().max(propagation.settle()));
        let command = search_command(tag, log_path);
        let mut interval = propagation.poll_interval();
        let mut searches = 0;

        loop {
            searches += 1;
            let result = self.probe.run(receiver, &command).await?;
            if !result.is_empty() {
                if !result.success() {
                    return Err(command_failed(&result, &command));
                }
                if result.output().contains(tag) {
                    return Ok(searches);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(receiver = %receiver.name, %tag, searches, "Marker never arrived");
                return Err(Error::MissingLogMessage {
                    target: receiver.name.clone(),
                    tag: tag.to_string(),
                    transport: transport.to_string(),
                });
            }
            tracing::debug!(receiver = %receiver.name, searches, ?interval, "Marker not found yet");
            sleep(interval.min(deadline - now)).await;
            interval = propagation.next_interval(interval);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::{MockDeployment, MockServer};
    use std::time::Duration;

    fn logging_deployment() -> MockDeployment {
        MockDeployment::new("logging")
            .with_server(MockServer::new("Logging").ubuntu_12().boot_polls(3))
            .with_server(MockServer::new("Base").boot_polls(1))
    }

    fn verifier(deployment: &MockDeployment) -> LogPropagationVerifier<'_> {
        LogPropagationVerifier::new(deployment, deployment, VerifierSettings::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_marker_delivered_over_udp() {
        let deployment = logging_deployment();
        let delivery = verifier(&deployment).verify(Transport::Udp).await.unwrap();

        assert_eq!(delivery.receiver, "Logging");
        assert_eq!(delivery.sender, "Base");
        assert_eq!(delivery.log_path, "/var/log/syslog");
        assert_eq!(delivery.searches, 1);
        assert!(deployment
            .log_of("Logging")
            .iter()
            .any(|line| line.contains(&delivery.tag)));
        assert_eq!(
            deployment.launch_log(),
            vec!["Logging".to_string(), "Base".to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_search_is_missing_log_message() {
        let deployment = logging_deployment();
        deployment.drop_protocol("udp");

        let start = Instant::now();
        let err = verifier(&deployment).verify(Transport::Udp).await.unwrap_err();

        let tag = match &err {
            Error::MissingLogMessage {
                target,
                tag,
                transport,
            } => {
                assert_eq!(target, "Logging");
                assert_eq!(transport, "udp");
                tag.clone()
            }
            other => panic!("Expected MissingLogMessage, got {other:?}"),
        };
        assert!(err.to_string().contains(&tag));

        let searched = deployment
            .commands()
            .iter()
            .any(|(server, command)| server == "Logging" && command.contains(&tag));
        assert!(searched);

        // boot polling plus the 60s propagation window
        assert!(start.elapsed() <= Duration::from_secs(60 + 60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_delivery_is_found_by_backoff() {
        let deployment = logging_deployment();
        deployment.delay_delivery(Duration::from_secs(9));

        let delivery = verifier(&deployment).verify(Transport::Relp).await.unwrap();
        // settle 5s, then searches at +1s, +2s, +4s
        assert_eq!(delivery.searches, 4);
        assert!((12_000..13_000).contains(&delivery.elapsed_ms));
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwarding_prefers_private_address() {
        let deployment = MockDeployment::new("addresses")
            .with_server(
                MockServer::new("Logging")
                    .private_address("10.1.2.3")
                    .reachable_address("198.51.100.3"),
            )
            .with_server(MockServer::new("Base"));
        let delivery = verifier(&deployment).verify(Transport::Udp).await.unwrap();

        assert_eq!(delivery.receiver_address, "10.1.2.3");
        assert_eq!(
            deployment.inputs_of("Base").get(REMOTE_SERVER_INPUT).map(String::as_str),
            Some("10.1.2.3")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_forwarding_falls_back_to_reachable_address() {
        let deployment = MockDeployment::new("addresses")
            .with_server(
                MockServer::new("Logging")
                    .no_private_address()
                    .reachable_address("198.51.100.3"),
            )
            .with_server(MockServer::new("Base"));
        let delivery = verifier(&deployment).verify(Transport::Udp).await.unwrap();

        assert_eq!(delivery.receiver_address, "198.51.100.3");
        assert_eq!(
            deployment.inputs_of("Base").get(REMOTE_SERVER_INPUT).map(String::as_str),
            Some("198.51.100.3")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_blank_private_address_falls_back_to_reachable() {
        let deployment = MockDeployment::new("addresses")
            .with_server(
                MockServer::new("Logging")
                    .private_address("  ")
                    .reachable_address("198.51.100.3"),
            )
            .with_server(MockServer::new("Base"));
        let delivery = verifier(&deployment).verify(Transport::Udp).await.unwrap();

        assert_eq!(delivery.receiver_address, "198.51.100.3");
        assert_eq!(
            deployment.inputs_of("Base").get(REMOTE_SERVER_INPUT).map(String::as_str),
            Some("198.51.100.3")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_extreme_timing_settings_do_not_overflow() {
        let deployment = logging_deployment();
        deployment.delay_delivery(Duration::from_secs(8));

        let mut settings = VerifierSettings::default();
        settings.timeouts.operational_secs = u64::MAX;
        settings.propagation.timeout_secs = u64::MAX;
        settings.propagation.backoff_multiplier = 1e300;
        settings.propagation.max_interval_secs = 10;
        let verifier = LogPropagationVerifier::new(&deployment, &deployment, settings);

        let delivery = verifier.verify(Transport::Udp).await.unwrap();
        // settle 5s, then searches at +1s and +10s (capped)
        assert_eq!(delivery.searches, 3);
        assert!((16_000..17_000).contains(&delivery.elapsed_ms));
    }

    #[test]
    fn test_search_command_quotes_log_path() {
        assert_eq!(
            search_command("abc", "/var/log/remote logs/all.log"),
            "grep -F -- 'abc' '/var/log/remote logs/all.log'"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_consecutive_runs_use_fresh_tags() {
        let deployment = logging_deployment();
        let verifier = verifier(&deployment);

        let first = verifier.verify(Transport::Udp).await.unwrap();
        let second = verifier.verify(Transport::Udp).await.unwrap();
        assert_ne!(first.tag, second.tag);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_emission_is_probe_command_error() {
        let deployment = logging_deployment();
        deployment.fail_command("Base", "logger");

        let err = verifier(&deployment).verify(Transport::Udp).await.unwrap_err();
        assert!(matches!(err, Error::ProbeCommand { ref target, .. } if target == "Base"));
        assert!(!deployment
            .commands()
            .iter()
            .any(|(_, command)| command.starts_with("grep")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_broken_search_is_probe_command_error() {
        let deployment = logging_deployment();
        deployment.fail_command("Logging", "grep");

        let err = verifier(&deployment).verify(Transport::Udp).await.unwrap_err();
        assert!(matches!(err, Error::ProbeCommand { exit_status: 2, .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_lsb_release_is_probe_command_error() {
        let deployment = MockDeployment::new("no lsb")
            .with_server(MockServer::new("Logging").no_lsb_release())
            .with_server(MockServer::new("Base"));

        let err = verifier(&deployment).verify(Transport::Udp).await.unwrap_err();
        assert!(matches!(err, Error::ProbeCommand { ref command, .. } if command == PLATFORM_COMMAND));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_receiver_is_probe_transport_error() {
        let deployment = logging_deployment();
        deployment.make_unreachable("Logging");

        let err = verifier(&deployment).verify(Transport::Udp).await.unwrap_err();
        assert!(matches!(err, Error::ProbeTransport { ref target, .. } if target == "Logging"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitoring_failure_stops_before_sender_launch() {
        let deployment = MockDeployment::new("monitoring")
            .with_server(MockServer::new("Logging").monitoring_fails())
            .with_server(MockServer::new("Base"));

        let err = verifier(&deployment).verify(Transport::Udp).await.unwrap_err();
        assert!(matches!(err, Error::MonitoringCheck { .. }));
        assert_eq!(deployment.launch_log(), vec!["Logging".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_role_is_empty_role_set() {
        let deployment = MockDeployment::new("no base").with_server(MockServer::new("Logging"));

        let err = verifier(&deployment).verify(Transport::Udp).await.unwrap_err();
        assert!(matches!(err, Error::EmptyRoleSet { ref pattern } if pattern == "Base"));
        assert!(deployment.launch_log().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_every_failure_is_typed() {
        let faults: [fn(&MockDeployment); 4] = [
            |d| d.drop_protocol("udp"),
            |d| d.fail_command("Base", "logger"),
            |d| d.fail_command("Logging", "lsb_release"),
            |d| d.make_unreachable("Base"),
        ];
        for inject in faults {
            let deployment = logging_deployment();
            inject(&deployment);
            let err = verifier(&deployment).verify(Transport::Udp).await.unwrap_err();
            assert!(err.failure_code().is_some(), "untyped failure: {err}");
        }

        let stuck = MockDeployment::new("stuck")
            .with_server(MockServer::new("Logging").never_converges())
            .with_server(MockServer::new("Base"));
        let err = verifier(&stuck).verify(Transport::Udp).await.unwrap_err();
        assert!(matches!(err, Error::StateTimeout { .. }));

        let broken = MockDeployment::new("broken")
            .with_server(MockServer::new("Logging"))
            .with_server(MockServer::new("Base").fails_boot());
        let err = verifier(&broken).verify(Transport::Udp).await.unwrap_err();
        assert!(matches!(err, Error::LaunchFailure { ref server, .. } if server == "Base"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rerun_stops_servers_first() {
        let deployment = logging_deployment();
        let verifier = verifier(&deployment);

        verifier.verify(Transport::Udp).await.unwrap();
        verifier.verify(Transport::RelpSecured).await.unwrap();

        assert_eq!(deployment.stop_log().len(), 4);
        assert_eq!(
            deployment.inputs_of("Logging").get(PROTOCOL_INPUT).map(String::as_str),
            Some("relp-secured")
        );
    }
}
