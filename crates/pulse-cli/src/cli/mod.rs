//! CLI for the Pulse download manager.

mod commands;
pub mod render;

use anyhow::Result;
use clap::{Parser, Subcommand};
use pulse_core::config;
use std::path::PathBuf;

pub(crate) use commands::warn_if_unresolved;
use commands::{run_get, run_server, GetArgs, ServerArgs};

/// Top-level CLI for the Pulse download manager.
#[derive(Debug, Parser)]
#[command(name = "pulse", version)]
#[command(about = "Pulse: concurrent chunked HTTP download manager", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download one or more URLs and show progress until they finish.
    Get {
        /// HTTP/HTTPS URLs to download.
        #[arg(required = true, value_name = "URL")]
        urls: Vec<String>,

        /// Directory to save into (default: config default_download_dir, else the current directory).
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Save under this name instead of the derived one.
        #[arg(long, value_name = "NAME")]
        filename: Option<String>,

        /// Quality hint for hosted-media URLs (e.g. 720p).
        #[arg(long, value_name = "Q")]
        quality: Option<String>,

        /// Download up to N URLs at once (default: config max_concurrent_downloads).
        #[arg(short, long, value_name = "N")]
        jobs: Option<i64>,

        /// Verbose logging.
        #[arg(short, long)]
        verbose: bool,
    },

    /// Run the headless HTTP relay that accepts downloads from browser extensions.
    Server {
        /// Interface to bind to.
        #[arg(long, default_value = "0.0.0.0")]
        host: String,

        /// Port to listen on. Without it the first free port from 8080 upward is used.
        #[arg(short, long)]
        port: Option<u16>,

        /// Serve a web UI from this directory on non-API paths.
        #[arg(long = "static", value_name = "DIR")]
        static_dir: Option<PathBuf>,

        /// Verbose logging.
        #[arg(short, long)]
        verbose: bool,
    },
}

impl CliCommand {
    pub fn verbose(&self) -> bool {
        match self {
            CliCommand::Get { verbose, .. } | CliCommand::Server { verbose, .. } => *verbose,
        }
    }
}

impl Cli {
    pub async fn run(self) -> Result<()> {
        let cfg = config::load_or_init()?;
        tracing::debug!("loaded config: {:?}", cfg);

        match self.command {
            CliCommand::Get {
                urls,
                output,
                filename,
                quality,
                jobs,
                verbose,
            } => {
                let args = GetArgs {
                    urls,
                    output,
                    filename,
                    quality,
                    jobs,
                    verbose,
                };
                run_get(&cfg, args).await?;
            }
            CliCommand::Server {
                host,
                port,
                static_dir,
                verbose,
            } => {
                let args = ServerArgs {
                    host,
                    port,
                    verbose,
                    static_dir,
                };
                run_server(&cfg, args).await?
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests;
