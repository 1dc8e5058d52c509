//! `pulse server` – headless HTTP relay until Ctrl-C.

use anyhow::{bail, Context, Result};
use pulse_core::config::PulseConfig;
use pulse_core::{paths, WorkerPool};
use std::path::PathBuf;
use std::sync::Arc;

use super::{build_engine, default_download_dir};
use crate::relay::{self, PortFile, RelayState};

#[derive(Debug)]
pub struct ServerArgs {
    pub host: String,
    pub port: Option<u16>,
    pub verbose: bool,
    pub static_dir: Option<PathBuf>,
}

pub async fn run_server(cfg: &PulseConfig, args: ServerArgs) -> Result<()> {
    if let Some(dir) = &args.static_dir {
        if !dir.is_dir() {
            bail!("static directory {} does not exist", dir.display());
        }
    }
    let base_dir = default_download_dir(cfg)?;
    let pool = WorkerPool::new(build_engine(cfg));
    tokio::spawn(relay::log_events(pool.subscribe()));

    let (listener, port) = relay::bind(&args.host, args.port).await?;
    let _port_file = PortFile::write(paths::port_file()?, port)?;

    let state = RelayState {
        pool: pool.clone(),
        port,
        base_dir: Arc::new(base_dir.clone()),
        verbose: args.verbose,
        static_dir: args.static_dir.clone().map(Arc::new),
    };
    tracing::info!(host = %args.host, port, dir = %base_dir.display(), "relay listening");
    println!("Pulse server running on {}:{}", args.host, port);
    println!("Downloads go to {}", base_dir.display());
    if let Some(dir) = &args.static_dir {
        println!("Serving web UI from {}", dir.display());
    }
    println!("Press Ctrl+C to stop.");

    axum::serve(listener, relay::build_router(state))
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("could not listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
        .context("relay server")?;

    println!("\nShutting down, waiting for active downloads...");
    tracing::info!("relay stopped, draining worker pool");
    pool.graceful_shutdown().await;
    println!("Goodbye!");
    Ok(())
}
