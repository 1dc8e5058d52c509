#![allow(dead_code)]

pub mod range_server;

use std::sync::Arc;
use std::time::Duration;

use pulse_core::budget::BudgetPolicy;
use pulse_core::retry::RetryPolicy;
use pulse_core::{Engine, EngineSettings, ProgressHandle, ProgressSnapshot, ResolverSet};

/// Small chunks and short delays so tests exercise ranged mode on tiny bodies.
pub fn test_settings() -> EngineSettings {
    EngineSettings {
        budget: BudgetPolicy::new(4, 16, "pulse-tests"),
        retry: RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        },
        target_chunk_size: 16 * 1024,
        min_chunk_threshold: 8 * 1024,
        progress_interval: Duration::from_millis(20),
        max_concurrent_downloads: 2,
        retain_finished: 100,
    }
}

pub fn engine() -> Arc<Engine> {
    Arc::new(Engine::new(test_settings()))
}

pub fn engine_with(settings: EngineSettings, resolvers: ResolverSet) -> Arc<Engine> {
    Arc::new(Engine::with_resolvers(settings, resolvers))
}

/// Deterministic, non-repeating-per-KiB body.
pub fn body(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8 ^ (i / 251) as u8).collect()
}

pub async fn wait_terminal(handle: &ProgressHandle) -> ProgressSnapshot {
    tokio::time::timeout(Duration::from_secs(30), handle.wait())
        .await
        .expect("task should reach a terminal state")
}

/// Poll until `pred` holds for the task's snapshot.
pub async fn wait_until(handle: &ProgressHandle, pred: impl Fn(&ProgressSnapshot) -> bool) {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            if pred(&handle.snapshot()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition should be reached");
}
