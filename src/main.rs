//! logprobe - verifies that log lines forwarded by one deployed server
//! arrive in the syslog of another
//!
//! Runs one scenario per forwarding transport (UDP, RELP, RELP over TLS)
//! and reports pass or a typed failure for each.

use std::path::PathBuf;

use clap::Parser;
use logprobe::common::logging;
use logprobe::{cli, commands};
use commands::Commands;

#[derive(Parser)]
#[command(name = "logprobe", about = "Remote log forwarding test runner")]
#[command(version, long_about = None)]
struct Cli {
    /// Configuration file (default: platform config dir/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Deployment inventory (default: platform config dir/deployment.yaml)
    #[arg(long, short = 'd', global = true)]
    deployment: Option<PathBuf>,

    /// Also write detailed logs to the log directory
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Held until exit so buffered file logs are flushed
    let _log_guard = if cli.log_file {
        logging::init_with_file().map(|(path, guard)| {
            tracing::debug!(path = %path.display(), "Writing logs to file");
            guard
        })
    } else {
        logging::init_cli();
        None
    };

    let result = match cli::Context::load(cli.config, cli.deployment) {
        Ok(ctx) => cli::dispatch(cli.command, &ctx).await,
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
