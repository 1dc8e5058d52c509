use clap::Parser;
use pulse_core::logging;

mod cli;
mod relay;

use crate::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging as early as possible; fall back to stderr so the CLI still runs.
    let verbose = cli.command.verbose();
    if let Err(e) = logging::init_logging(verbose) {
        logging::init_logging_stderr(verbose);
        tracing::warn!("log file unavailable, logging to stderr: {:#}", e);
    }

    if let Err(err) = cli.run().await {
        eprintln!("pulse error: {:#}", err);
        std::process::exit(1);
    }
}
