//! CLI command definitions
//!
//! Defines the clap commands for the logprobe CLI.

use clap::Subcommand;
use std::path::PathBuf;

use crate::verifier::Transport;

#[derive(Subcommand)]
pub enum Commands {
    /// Run log propagation scenarios against the deployment
    Run {
        /// Scenario to run (default: all). Can be given multiple times:
        /// --scenario smoke_test --scenario relp
        #[arg(long = "scenario", short = 's')]
        scenarios: Vec<String>,

        /// YAML file with scenario definitions (default: builtin scenarios)
        #[arg(long)]
        scenarios_file: Option<PathBuf>,

        /// Only run scenarios using this transport (udp, relp, relp-secured)
        #[arg(long, short = 't')]
        transport: Option<Transport>,

        /// Print the report as JSON instead of the colored summary
        #[arg(long)]
        json: bool,

        /// Run against an in-memory simulated deployment
        #[arg(long)]
        simulate: bool,
    },

    /// List the registered scenarios
    #[command(alias = "ls")]
    List {
        /// YAML file with scenario definitions (default: builtin scenarios)
        #[arg(long)]
        scenarios_file: Option<PathBuf>,
    },

    /// Run one command on a deployment server over ssh
    Probe {
        /// Server name as listed in the inventory
        server: String,

        /// Shell command to run
        command: String,
    },

    /// Show the effective configuration
    Config,
}
