//! CLI command handling
//!
//! Builds the deployment, probe and runner for each command and formats
//! the output.

use std::path::{Path, PathBuf};

use colored::Colorize;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{paths, Error, Result};
use crate::deployment::inventory::Inventory;
use crate::deployment::{InventoryDeployment, MockDeployment};
use crate::probe::{RemoteProbe, SshProbe};
use crate::testing::{load_scenarios, TestCaseRunner, TestReport};
use crate::verifier::{LogPropagationVerifier, VerifierSettings};

/// Options shared by every command
pub struct Context {
    pub config: Config,
    /// File the configuration was read from, if any
    pub config_path: Option<PathBuf>,
    /// Inventory file given on the command line
    pub deployment: Option<PathBuf>,
}

impl Context {
    /// Load the configuration from `config_path` or the default location
    pub fn load(config_path: Option<PathBuf>, deployment: Option<PathBuf>) -> Result<Self> {
        let (config, config_path) = match config_path {
            Some(path) => (Config::load_from(&path)?, Some(path)),
            None => (
                Config::load()?,
                paths::config_path().filter(|path| path.exists()),
            ),
        };
        Ok(Self {
            config,
            config_path,
            deployment,
        })
    }

    fn inventory(&self) -> Result<Inventory> {
        let path = self
            .deployment
            .clone()
            .or_else(paths::default_inventory_path)
            .ok_or_else(|| {
                Error::Config("No deployment inventory given; use --deployment".to_string())
            })?;
        if !path.exists() {
            return Err(Error::Config(format!(
                "Deployment inventory '{}' not found; use --deployment or --simulate",
                path.display()
            )));
        }
        Inventory::load(&path)
    }
}

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, ctx: &Context) -> Result<()> {
    match command {
        Commands::Run {
            scenarios,
            scenarios_file,
            transport,
            json,
            simulate,
        } => {
            let mut runner = load_runner(scenarios_file.as_deref())?;
            if !scenarios.is_empty() {
                runner = runner.select(&scenarios)?;
            }
            if let Some(transport) = transport {
                runner = runner.with_transport(transport)?;
            }
            let settings = VerifierSettings::from_config(&ctx.config);

            let report = if simulate {
                let deployment = MockDeployment::sample();
                let verifier = LogPropagationVerifier::new(&deployment, &deployment, settings);
                runner.run(&verifier, !json).await
            } else {
                let inventory = ctx.inventory()?;
                let probe = SshProbe::new(ctx.config.probe.clone())?;
                let deployment = InventoryDeployment::new(inventory, probe);
                let verifier = LogPropagationVerifier::new(&deployment, deployment.probe(), settings);
                runner.run(&verifier, !json).await
            };

            print_report(&report, json)?;
            if report.all_passed() {
                Ok(())
            } else {
                Err(Error::ScenariosFailed {
                    failed: report.failed(),
                    total: report.results.len(),
                })
            }
        }

        Commands::List { scenarios_file } => {
            let runner = load_runner(scenarios_file.as_deref())?;
            println!("Scenarios:");
            for spec in runner.scenarios() {
                match &spec.description {
                    Some(desc) => println!(
                        "  {:<16} {:<13} {}",
                        spec.name,
                        spec.transport.to_string(),
                        desc.dimmed()
                    ),
                    None => println!("  {:<16} {}", spec.name, spec.transport),
                }
            }
            Ok(())
        }

        Commands::Probe { server, command } => {
            let inventory = ctx.inventory()?;
            let target = inventory.probe_target(&server)?;
            let probe = SshProbe::new(ctx.config.probe.clone())?;

            let result = probe.run(&target, &command).await?;
            print!("{}", result.output());
            if result.success() {
                Ok(())
            } else {
                Err(Error::ProbeCommand {
                    target: result.target().to_string(),
                    command,
                    exit_status: result.exit_status(),
                    output: result.output().trim().to_string(),
                })
            }
        }

        Commands::Config => {
            match &ctx.config_path {
                Some(path) => println!("# {}", path.display()),
                None => println!("# defaults (no configuration file)"),
            }
            let rendered = toml::to_string_pretty(&ctx.config)
                .map_err(|e| Error::Config(format!("Failed to render configuration: {}", e)))?;
            print!("{}", rendered);
            Ok(())
        }
    }
}

fn load_runner(scenarios_file: Option<&Path>) -> Result<TestCaseRunner> {
    match scenarios_file {
        Some(path) => TestCaseRunner::from_specs(load_scenarios(path)?),
        None => Ok(TestCaseRunner::builtin()),
    }
}

fn print_report(report: &TestReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        report.print_summary();
    }
    Ok(())
}
