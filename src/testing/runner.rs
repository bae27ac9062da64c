//! Scenario runner
//!
//! Runs each registered scenario through the verifier in turn. A scenario's
//! failure is recorded in the report and never stops the ones after it.

use colored::Colorize;
use serde::Serialize;
use tokio::time::Instant;
use tracing::Instrument;

use crate::common::{Error, Result, TestFailure};
use crate::verifier::{Delivery, LogPropagationVerifier, Transport};

use super::config::{builtin_scenarios, ScenarioSpec};

/// How one scenario ended
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestOutcome {
    Passed { delivery: Delivery },
    Failed { failure: TestFailure },
}

impl TestOutcome {
    pub fn passed(&self) -> bool {
        matches!(self, TestOutcome::Passed { .. })
    }

    /// Failure detail, if the scenario failed
    pub fn failure(&self) -> Option<&TestFailure> {
        match self {
            TestOutcome::Failed { failure } => Some(failure),
            TestOutcome::Passed { .. } => None,
        }
    }
}

/// Result of one scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub name: String,
    pub transport: Transport,
    #[serde(flatten)]
    pub outcome: TestOutcome,
    pub duration_ms: u64,
}

/// Results of a whole run, in registration order
#[derive(Debug, Clone, Serialize)]
pub struct TestReport {
    pub deployment: String,
    pub results: Vec<ScenarioResult>,
}

impl TestReport {
    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.outcome.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.results.len() - self.passed()
    }

    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }

    pub fn get(&self, name: &str) -> Option<&ScenarioResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Print the per-scenario table and totals
    pub fn print_summary(&self) {
        println!("\n{} {}", "Summary:".cyan(), self.deployment.dimmed());
        for result in &self.results {
            match &result.outcome {
                TestOutcome::Passed { .. } => println!(
                    "  {} {} ({} ms)",
                    "✓".green(),
                    result.name,
                    result.duration_ms
                ),
                TestOutcome::Failed { failure } => println!(
                    "  {} {} [{}] {}",
                    "✗".red(),
                    result.name,
                    failure.code.yellow(),
                    failure.message
                ),
            }
        }

        let totals = format!("{} passed, {} failed", self.passed(), self.failed());
        if self.all_passed() {
            println!("\n{} {}\n", "✓".green().bold(), totals.green().bold());
        } else {
            println!("\n{} {}\n", "✗".red().bold(), totals.red().bold());
        }
    }
}

/// Named scenarios and the loop that runs them
#[derive(Debug, Clone, Default)]
pub struct TestCaseRunner {
    scenarios: Vec<ScenarioSpec>,
}

impl TestCaseRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runner with the smoke_test, relp and relp-secured scenarios
    pub fn builtin() -> Self {
        Self {
            scenarios: builtin_scenarios(),
        }
    }

    pub fn from_specs(specs: Vec<ScenarioSpec>) -> Result<Self> {
        let mut runner = Self::new();
        for spec in specs {
            runner.register(spec)?;
        }
        Ok(runner)
    }

    /// Add a scenario; names must be unique
    pub fn register(&mut self, spec: ScenarioSpec) -> Result<()> {
        if self.scenarios.iter().any(|s| s.name == spec.name) {
            return Err(Error::Config(format!(
                "Scenario '{}' is registered twice",
                spec.name
            )));
        }
        self.scenarios.push(spec);
        Ok(())
    }

    pub fn scenarios(&self) -> &[ScenarioSpec] {
        &self.scenarios
    }

    /// Keep only the named scenarios, in the order given
    pub fn select(&self, names: &[String]) -> Result<Self> {
        let mut selected = Self::new();
        for name in names {
            let spec = self
                .scenarios
                .iter()
                .find(|s| &s.name == name)
                .ok_or_else(|| {
                    let known: Vec<&str> = self.scenarios.iter().map(|s| s.name.as_str()).collect();
                    Error::Config(format!(
                        "Unknown scenario '{}'. Available: {}",
                        name,
                        known.join(", ")
                    ))
                })?;
            selected.register(spec.clone())?;
        }
        Ok(selected)
    }

    /// Keep only the scenarios that use `transport`
    pub fn with_transport(&self, transport: Transport) -> Result<Self> {
        let scenarios: Vec<ScenarioSpec> = self
            .scenarios
            .iter()
            .filter(|s| s.transport == transport)
            .cloned()
            .collect();
        if scenarios.is_empty() {
            return Err(Error::Config(format!(
                "No scenario uses transport '{}'",
                transport
            )));
        }
        Ok(Self { scenarios })
    }

    /// Run every scenario and collect the report
    ///
    /// With `print_progress` each scenario's start and outcome is printed
    /// as it happens.
    pub async fn run(
        &self,
        verifier: &LogPropagationVerifier<'_>,
        print_progress: bool,
    ) -> TestReport {
        let deployment = verifier.deployment().name().to_string();
        let mut results = Vec::with_capacity(self.scenarios.len());

        for spec in &self.scenarios {
            if print_progress {
                println!(
                    "\n{} {} {}",
                    "Running Test:".blue().bold(),
                    spec.name.white().bold(),
                    format!("({})", spec.transport).dimmed()
                );
                if let Some(desc) = &spec.description {
                    println!("  {}", desc.dimmed());
                }
            }

            let started = Instant::now();
            let outcome = async {
                match verifier.verify(spec.transport).await {
                    Ok(delivery) => {
                        tracing::info!(tag = %delivery.tag, "Scenario passed");
                        TestOutcome::Passed { delivery }
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Scenario failed");
                        TestOutcome::Failed {
                            failure: TestFailure::from(&e),
                        }
                    }
                }
            }
            .instrument(tracing::info_span!("scenario", name = %spec.name, transport = %spec.transport))
            .await;
            let duration_ms = started.elapsed().as_millis() as u64;

            if print_progress {
                match &outcome {
                    TestOutcome::Passed { delivery } => println!(
                        "  {} Tag {} found in {} on '{}'",
                        "✓".green(),
                        delivery.tag.dimmed(),
                        delivery.log_path,
                        delivery.receiver
                    ),
                    TestOutcome::Failed { failure } => {
                        println!("  {} {}", "✗".red(), failure.message)
                    }
                }
            }

            results.push(ScenarioResult {
                name: spec.name.clone(),
                transport: spec.transport,
                outcome,
                duration_ms,
            });
        }

        TestReport {
            deployment,
            results,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::{MockDeployment, MockServer};
    use crate::verifier::VerifierSettings;

    fn verifier(deployment: &MockDeployment) -> LogPropagationVerifier<'_> {
        LogPropagationVerifier::new(deployment, deployment, VerifierSettings::default())
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut runner = TestCaseRunner::builtin();
        let err = runner
            .register(ScenarioSpec::new("relp", Transport::Relp))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(runner.scenarios().len(), 3);
    }

    #[test]
    fn test_select_by_name() {
        let runner = TestCaseRunner::builtin();
        let selected = runner
            .select(&["relp-secured".to_string(), "smoke_test".to_string()])
            .unwrap();
        let names: Vec<&str> = selected.scenarios().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["relp-secured", "smoke_test"]);

        assert!(runner.select(&["nope".to_string()]).is_err());
    }

    #[test]
    fn test_filter_by_transport() {
        let runner = TestCaseRunner::builtin()
            .with_transport("RELP".parse().unwrap())
            .unwrap();
        let names: Vec<&str> = runner.scenarios().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["relp"]);

        let only_udp = TestCaseRunner::builtin()
            .select(&["smoke_test".to_string()])
            .unwrap();
        assert!(only_udp.with_transport(Transport::RelpSecured).is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_builtin_scenarios_pass() {
        let deployment = MockDeployment::sample();
        let report = TestCaseRunner::builtin()
            .run(&verifier(&deployment), false)
            .await;

        assert_eq!(report.deployment, "simulated logging deployment");
        assert_eq!(report.results.len(), 3);
        assert!(report.all_passed(), "{:?}", report);
        assert_eq!(
            deployment.inputs_of("Logging with rsyslog").get("logging/protocol"),
            Some(&"relp-secured".to_string())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_scenario_does_not_stop_the_others() {
        let deployment = MockDeployment::sample();
        deployment.drop_protocol("relp");

        let report = TestCaseRunner::builtin()
            .run(&verifier(&deployment), false)
            .await;

        let names: Vec<&str> = report.results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["smoke_test", "relp", "relp-secured"]);
        assert!(report.get("smoke_test").unwrap().outcome.passed());
        assert!(report.get("relp-secured").unwrap().outcome.passed());

        let failure = report.get("relp").unwrap().outcome.failure().unwrap();
        assert_eq!(failure.code, "MISSING_LOG_MESSAGE");
        assert_eq!((report.passed(), report.failed()), (2, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_topology_error_fails_every_scenario() {
        let deployment =
            MockDeployment::new("no receiver").with_server(MockServer::new("Base").boot_polls(1));
        let report = TestCaseRunner::builtin()
            .run(&verifier(&deployment), false)
            .await;

        assert_eq!(report.failed(), 3);
        assert!(report
            .results
            .iter()
            .all(|r| r.outcome.failure().map(|f| f.code.as_str()) == Some("EMPTY_ROLE_SET")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_report_serializes_outcomes() {
        let deployment = MockDeployment::sample();
        deployment.drop_protocol("udp");
        let runner = TestCaseRunner::builtin()
            .select(&["smoke_test".to_string()])
            .unwrap();
        let report = runner.run(&verifier(&deployment), false).await;

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["results"][0]["name"], "smoke_test");
        assert_eq!(json["results"][0]["transport"], "udp");
        assert_eq!(json["results"][0]["status"], "failed");
        assert_eq!(json["results"][0]["failure"]["code"], "MISSING_LOG_MESSAGE");
    }
}
