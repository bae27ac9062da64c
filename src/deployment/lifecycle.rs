//! Server lifecycle
//!
//! The only place servers are launched or stopped. One `ServerLifecycle`
//! covers one verification run: it refuses to launch a server twice, and it
//! turns the platform's observed states into `StateTimeout` and
//! `LaunchFailure` errors.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::{sleep, timeout_at, Instant};

use super::{Deployment, LifecycleState, ServerHandle};
use crate::common::{deadline_after, Error, Result};

/// Launch and convergence tracking for one run
pub struct ServerLifecycle<'a> {
    deployment: &'a dyn Deployment,
    poll_interval: Duration,
    launched: HashSet<String>,
}

impl<'a> ServerLifecycle<'a> {
    pub fn new(deployment: &'a dyn Deployment, poll_interval: Duration) -> Self {
        Self {
            deployment,
            poll_interval,
            launched: HashSet::new(),
        }
    }

    /// Stop every server in the deployment and wait until each is down
    pub async fn stop_all(&mut self, timeout: Duration) -> Result<()> {
        let servers = self.deployment.servers().await?;
        for server in &servers {
            tracing::info!(server = %server, state = %server.state(), "Stopping server");
            self.deployment.stop(server).await?;
        }
        for mut server in servers {
            self.await_state(&mut server, LifecycleState::Unprovisioned, timeout)
                .await?;
        }
        Ok(())
    }

    /// Request a server start
    ///
    /// Does not wait; pair with [`await_state`](Self::await_state). A server
    /// can be launched once per run.
    pub async fn launch(&mut self, server: &mut ServerHandle) -> Result<()> {
        if self.launched.contains(server.id()) {
            return Err(Error::launch_failure(
                server.id(),
                "server was already launched in this run",
            ));
        }

        tracing::info!(server = %server, "Launching server");
        self.deployment.launch(server).await?;
        self.launched.insert(server.id().to_string());
        server.state = LifecycleState::Launching;
        Ok(())
    }

    /// Wait until the server is observed in `target`
    ///
    /// Returns as soon as the target state is observed. `Failed` ends the
    /// wait with `LaunchFailure`; reaching the deadline first, including
    /// while an observation is still in flight, ends it with `StateTimeout`.
    pub async fn await_state(
        &self,
        server: &mut ServerHandle,
        target: LifecycleState,
        timeout: Duration,
    ) -> Result<()> {
        let deadline = deadline_after(Instant::now(), timeout);
        let server_id = server.id().to_string();
        let timed_out = || Error::StateTimeout {
            server: server_id.clone(),
            state: target.to_string(),
            timeout_secs: timeout.as_secs(),
        };

        loop {
            let observed = timeout_at(deadline, self.deployment.observe_state(server))
                .await
                .map_err(|_| timed_out())??;

            if observed == target {
                tracing::info!(server = %server, state = %observed, "Server reached state");
                server.state = observed;
                return Ok(());
            }

            if observed.is_terminal() {
                server.state = observed;
                return Err(Error::launch_failure(
                    server.id(),
                    format!("platform reported {} while waiting for {}", observed, target),
                ));
            }

            server.state = observed;
            let now = Instant::now();
            if now >= deadline {
                return Err(timed_out());
            }
            tracing::debug!(server = %server, state = %observed, waiting_for = %target, "Polling state");
            sleep(self.poll_interval.min(deadline - now)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::{MockDeployment, MockServer, ServerRoleResolver};

    const POLL: Duration = Duration::from_secs(10);

    async fn handle(deployment: &MockDeployment, id: &str) -> ServerHandle {
        ServerRoleResolver::new(deployment).first(id).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_as_soon_as_operational() {
        let deployment =
            MockDeployment::new("lifecycle").with_server(MockServer::new("Logging").boot_polls(2));
        let mut lifecycle = ServerLifecycle::new(&deployment, POLL);
        let mut server = handle(&deployment, "Logging").await;

        lifecycle.launch(&mut server).await.unwrap();
        assert_eq!(server.state(), LifecycleState::Launching);

        let start = Instant::now();
        lifecycle
            .await_state(&mut server, LifecycleState::Operational, Duration::from_secs(600))
            .await
            .unwrap();

        assert_eq!(server.state(), LifecycleState::Operational);
        assert!(start.elapsed() >= POLL * 2);
        assert!(start.elapsed() < POLL * 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_convergence() {
        let deployment = MockDeployment::new("lifecycle")
            .with_server(MockServer::new("Logging").never_converges());
        let mut lifecycle = ServerLifecycle::new(&deployment, POLL);
        let mut server = handle(&deployment, "Logging").await;

        lifecycle.launch(&mut server).await.unwrap();
        let start = Instant::now();
        let err = lifecycle
            .await_state(&mut server, LifecycleState::Operational, Duration::from_secs(35))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::StateTimeout { timeout_secs: 35, .. }));
        assert!(start.elapsed() >= Duration::from_secs(35));
        assert!(start.elapsed() < Duration::from_secs(36));
        assert_eq!(server.state(), LifecycleState::Launching);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_observation_cannot_succeed_after_deadline() {
        let deployment = MockDeployment::new("lifecycle").with_server(
            MockServer::new("Logging").observe_delay(Duration::from_secs(30)),
        );
        let mut lifecycle = ServerLifecycle::new(&deployment, POLL);
        let mut server = handle(&deployment, "Logging").await;

        lifecycle.launch(&mut server).await.unwrap();
        let err = lifecycle
            .await_state(&mut server, LifecycleState::Operational, Duration::from_secs(20))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StateTimeout { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_timeout_still_polls() {
        let deployment =
            MockDeployment::new("lifecycle").with_server(MockServer::new("Logging").boot_polls(1));
        let mut lifecycle = ServerLifecycle::new(&deployment, POLL);
        let mut server = handle(&deployment, "Logging").await;

        lifecycle.launch(&mut server).await.unwrap();
        lifecycle
            .await_state(&mut server, LifecycleState::Operational, Duration::MAX)
            .await
            .unwrap();
        assert_eq!(server.state(), LifecycleState::Operational);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_state_is_launch_failure() {
        let deployment =
            MockDeployment::new("lifecycle").with_server(MockServer::new("Logging").fails_boot());
        let mut lifecycle = ServerLifecycle::new(&deployment, POLL);
        let mut server = handle(&deployment, "Logging").await;

        lifecycle.launch(&mut server).await.unwrap();
        let err = lifecycle
            .await_state(&mut server, LifecycleState::Operational, Duration::from_secs(600))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::LaunchFailure { ref server, .. } if server == "Logging"));
        assert_eq!(server.state(), LifecycleState::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_launch_is_rejected() {
        let deployment = MockDeployment::new("lifecycle").with_server(MockServer::new("Base"));
        let mut lifecycle = ServerLifecycle::new(&deployment, POLL);
        let mut server = handle(&deployment, "Base").await;

        lifecycle.launch(&mut server).await.unwrap();
        let err = lifecycle.launch(&mut server).await.unwrap_err();
        assert!(matches!(err, Error::LaunchFailure { .. }));
        assert_eq!(deployment.launch_log(), vec!["Base".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_all_resets_running_servers() {
        let deployment = MockDeployment::new("lifecycle")
            .with_server(MockServer::new("Logging").running())
            .with_server(MockServer::new("Base"));
        let mut lifecycle = ServerLifecycle::new(&deployment, POLL);

        lifecycle.stop_all(Duration::from_secs(60)).await.unwrap();

        let servers = deployment.servers().await.unwrap();
        assert!(servers
            .iter()
            .all(|s| s.state() == LifecycleState::Unprovisioned));
        assert_eq!(
            deployment.stop_log(),
            vec!["Logging".to_string(), "Base".to_string()]
        );
    }
}
