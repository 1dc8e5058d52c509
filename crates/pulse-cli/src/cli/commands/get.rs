//! `pulse get` – download URLs in the foreground with line progress.

use anyhow::{bail, Result};
use pulse_core::config::PulseConfig;
use pulse_core::{ProgressHandle, ProgressSnapshot, TaskDescriptor, TaskStatus, WorkerPool};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::sync::oneshot;

use super::{build_engine, default_download_dir, warn_if_unresolved};
use crate::cli::render::{format_progress_line, ProgressPrinter};

/// Minimum spacing of byte-count lines for one task.
const LINE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Debug)]
pub struct GetArgs {
    pub urls: Vec<String>,
    pub output: Option<PathBuf>,
    pub filename: Option<String>,
    pub quality: Option<String>,
    pub jobs: Option<i64>,
    pub verbose: bool,
}

pub async fn run_get(cfg: &PulseConfig, args: GetArgs) -> Result<()> {
    let output_dir = match args.output {
        Some(dir) => dir,
        None => default_download_dir(cfg)?,
    };
    let engine = build_engine(cfg);
    let pool = match args.jobs {
        Some(n) => WorkerPool::with_max_concurrent(engine, n),
        None => WorkerPool::new(engine),
    };

    // Subscribe before submitting so no task's first events are missed.
    let mut bus = pool.subscribe();
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
    let printer = tokio::spawn(async move {
        let mut printer = ProgressPrinter::new(LINE_INTERVAL);
        let mut show = |snap: &ProgressSnapshot| {
            if printer.should_print(snap, Instant::now()) {
                println!("{}", format_progress_line(snap));
            }
        };
        loop {
            tokio::select! {
                biased;
                event = bus.recv() => match event {
                    Ok(snap) => show(&snap),
                    Err(RecvError::Lagged(n)) => tracing::debug!(skipped = n, "progress printer lagged"),
                    Err(RecvError::Closed) => break,
                },
                _ = &mut stop_rx => {
                    loop {
                        match bus.try_recv() {
                            Ok(snap) => show(&snap),
                            Err(TryRecvError::Lagged(_)) => continue,
                            Err(_) => break,
                        }
                    }
                    break;
                }
            }
        }
    });

    let mut handles: Vec<ProgressHandle> = Vec::with_capacity(args.urls.len());
    for url in &args.urls {
        if warn_if_unresolved(pool.engine(), url) {
            eprintln!("warning: no extractor for {url}; downloading the page itself");
        }
        let mut task = TaskDescriptor::new(url.clone(), output_dir.clone()).with_verbose(args.verbose);
        if let Some(name) = &args.filename {
            task = task.with_filename(name.clone());
        }
        if let Some(q) = &args.quality {
            task = task.with_quality(q.clone());
        }
        match pool.add(task) {
            Ok(handle) => handles.push(handle),
            Err(e) => eprintln!("skipping {url}: {e}"),
        }
    }

    let all_done = async {
        for handle in &handles {
            handle.wait().await;
        }
    };
    tokio::select! {
        _ = all_done => pool.graceful_shutdown().await,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("\ninterrupted, cancelling downloads...");
            tracing::info!("ctrl-c received, cancelling all tasks");
            pool.shutdown().await;
        }
    }

    // Tasks keep bus senders alive; stop the printer once everything is terminal.
    let _ = stop_tx.send(());
    let _ = printer.await;

    let failed = handles
        .iter()
        .map(|h| h.snapshot())
        .filter(|s| s.status != TaskStatus::Done)
        .count();
    let skipped = args.urls.len() - handles.len();
    if failed + skipped > 0 {
        bail!(
            "{} of {} downloads did not complete",
            failed + skipped,
            args.urls.len()
        );
    }
    Ok(())
}
