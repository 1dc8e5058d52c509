//! Worker pool admission, cancellation and shutdown against a slow server.

mod common;

use std::fs;
use std::time::Duration;

use common::range_server::{self, RangeServer, RangeServerOptions};
use pulse_core::{PoolError, ResolverSet, TaskDescriptor, TaskStatus, WorkerPool};

/// Roughly 40 KiB per second per connection.
fn slow_server(len: usize) -> RangeServer {
    range_server::start_with_options(
        common::body(len),
        RangeServerOptions {
            piece_delay: Some(Duration::from_millis(100)),
            ..Default::default()
        },
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrency_limit_queues_extra_tasks() {
    let body = common::body(24 * 1024);
    let server = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            piece_delay: Some(Duration::from_millis(20)),
            ..Default::default()
        },
    );
    let dir = tempfile::tempdir().unwrap();

    let pool = WorkerPool::with_max_concurrent(common::engine(), 1);
    let first = pool
        .add(TaskDescriptor::new(server.url("one.bin"), dir.path()))
        .unwrap();
    let second = pool
        .add(TaskDescriptor::new(server.url("two.bin"), dir.path()))
        .unwrap();

    assert_eq!(pool.active_count(), 1);
    assert_eq!(pool.queued_count(), 1);
    assert_eq!(second.snapshot().status, TaskStatus::Queued);

    let a = common::wait_terminal(&first).await;
    let b = common::wait_terminal(&second).await;
    assert_eq!(a.status, TaskStatus::Done, "error: {:?}", a.error);
    assert_eq!(b.status, TaskStatus::Done, "error: {:?}", b.error);
    assert_eq!(fs::read(dir.path().join("two.bin")).unwrap(), body);

    pool.graceful_shutdown().await;
    assert_eq!(pool.active_count(), 0);
    assert_eq!(pool.queued_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn non_positive_limit_is_treated_as_one() {
    let pool = WorkerPool::with_max_concurrent(common::engine(), 0);
    assert_eq!(pool.max_concurrent(), 1);
    let pool = WorkerPool::with_max_concurrent(common::engine(), -3);
    assert_eq!(pool.max_concurrent(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_active_task_removes_partial_file() {
    let server = slow_server(2 * 1024 * 1024);
    let dir = tempfile::tempdir().unwrap();

    let pool = WorkerPool::new(common::engine());
    let handle = pool
        .add(TaskDescriptor::new(server.url("big.bin"), dir.path()))
        .unwrap();
    common::wait_until(&handle, |s| {
        s.status == TaskStatus::Downloading && s.bytes_done > 0
    })
    .await;

    assert!(pool.cancel(handle.id()));
    let snap = common::wait_terminal(&handle).await;
    assert_eq!(snap.status, TaskStatus::Cancelled);
    assert!(!dir.path().join("big.bin").exists());
    assert!(!dir.path().join("big.bin.part").exists());

    // Finished tasks can't be cancelled again.
    assert!(!pool.cancel(handle.id()));
    assert!(!pool.cancel("no-such-task"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_reports_false_as_soon_as_the_task_is_terminal() {
    let server = range_server::start(common::body(4 * 1024));
    let dir = tempfile::tempdir().unwrap();
    let pool = WorkerPool::new(common::engine());

    for i in 0..8 {
        let handle = pool
            .add(TaskDescriptor::new(server.url(&format!("done{i}.bin")), dir.path()))
            .unwrap();
        let snap = common::wait_terminal(&handle).await;
        assert_eq!(snap.status, TaskStatus::Done, "error: {:?}", snap.error);
        assert!(!pool.cancel(handle.id()));
        assert_eq!(pool.snapshot(handle.id()).unwrap().status, TaskStatus::Done);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn finished_tasks_beyond_the_retention_limit_are_forgotten() {
    let server = range_server::start(common::body(4 * 1024));
    let dir = tempfile::tempdir().unwrap();
    let mut settings = common::test_settings();
    settings.retain_finished = 2;
    let engine = common::engine_with(settings, ResolverSet::new());
    let pool = WorkerPool::with_max_concurrent(engine, 1);

    let handles: Vec<_> = (0..5)
        .map(|i| {
            pool.add(TaskDescriptor::new(server.url(&format!("r{i}.bin")), dir.path()))
                .unwrap()
        })
        .collect();
    for h in &handles {
        common::wait_terminal(h).await;
    }
    pool.graceful_shutdown().await;

    let listed: Vec<String> = pool.snapshots().into_iter().map(|s| s.id).collect();
    assert_eq!(listed, vec![handles[3].id().to_string(), handles[4].id().to_string()]);
    assert!(pool.snapshot(handles[0].id()).is_none());
    assert!(!pool.cancel(handles[0].id()));
    // Forgotten tasks still finished their work.
    assert!(dir.path().join("r0.bin").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_queued_task_never_starts_it() {
    let server = slow_server(512 * 1024);
    let dir = tempfile::tempdir().unwrap();

    let pool = WorkerPool::with_max_concurrent(common::engine(), 1);
    let running = pool
        .add(TaskDescriptor::new(server.url("running.bin"), dir.path()))
        .unwrap();
    let waiting = pool
        .add(TaskDescriptor::new(server.url("waiting.bin"), dir.path()))
        .unwrap();

    assert!(pool.cancel(waiting.id()));
    let snap = common::wait_terminal(&waiting).await;
    assert_eq!(snap.status, TaskStatus::Cancelled);
    assert_eq!(pool.queued_count(), 0);

    pool.shutdown().await;
    assert_eq!(running.snapshot().status, TaskStatus::Cancelled);
    assert!(!server
        .requests()
        .iter()
        .any(|r| r.path.ends_with("waiting.bin")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn graceful_shutdown_finishes_active_and_drops_queued() {
    let body = common::body(16 * 1024);
    let server = range_server::start_with_options(
        body.clone(),
        RangeServerOptions {
            piece_delay: Some(Duration::from_millis(50)),
            ..Default::default()
        },
    );
    let dir = tempfile::tempdir().unwrap();

    let pool = WorkerPool::with_max_concurrent(common::engine(), 1);
    let active = pool
        .add(TaskDescriptor::new(server.url("kept.bin"), dir.path()))
        .unwrap();
    let queued = pool
        .add(TaskDescriptor::new(server.url("dropped.bin"), dir.path()))
        .unwrap();

    pool.graceful_shutdown().await;

    let a = active.snapshot();
    assert_eq!(a.status, TaskStatus::Done, "error: {:?}", a.error);
    assert_eq!(fs::read(dir.path().join("kept.bin")).unwrap(), body);
    assert_eq!(queued.snapshot().status, TaskStatus::Cancelled);
    assert!(!dir.path().join("dropped.bin").exists());

    assert!(!pool.is_accepting());
    let late = pool.add(TaskDescriptor::new(server.url("late.bin"), dir.path()));
    assert_eq!(late.err(), Some(PoolError::ShuttingDown));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn submission_is_validated() {
    let dir = tempfile::tempdir().unwrap();
    let pool = WorkerPool::new(common::engine());

    let ftp = pool.add(TaskDescriptor::new("ftp://example.com/file", dir.path()));
    assert!(matches!(ftp, Err(PoolError::InvalidUrl(_))));
    let junk = pool.add(TaskDescriptor::new("not a url", dir.path()));
    assert!(matches!(junk, Err(PoolError::InvalidUrl(_))));

    let server = range_server::start(common::body(4 * 1024));
    let first = pool
        .add(TaskDescriptor::new(server.url("x.bin"), dir.path()).with_id("fixed"))
        .unwrap();
    let dup = pool.add(TaskDescriptor::new(server.url("y.bin"), dir.path()).with_id("fixed"));
    assert_eq!(dup.err(), Some(PoolError::DuplicateId("fixed".to_string())));

    common::wait_terminal(&first).await;
    assert_eq!(pool.snapshots().len(), 1);
    assert_eq!(pool.snapshot("fixed").unwrap().status, TaskStatus::Done);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bus_carries_every_task_to_a_terminal_event() {
    let server = range_server::start(common::body(20 * 1024));
    let dir = tempfile::tempdir().unwrap();
    let pool = WorkerPool::new(common::engine());
    let mut bus = pool.subscribe();

    let ids: Vec<String> = (0..3)
        .map(|i| {
            pool.add(TaskDescriptor::new(server.url(&format!("f{i}.bin")), dir.path()))
                .unwrap()
                .id()
                .to_string()
        })
        .collect();

    let mut finished = std::collections::HashSet::new();
    tokio::time::timeout(Duration::from_secs(30), async {
        while finished.len() < ids.len() {
            let event = bus.recv().await.expect("bus open");
            if event.is_terminal() {
                assert_eq!(event.status, TaskStatus::Done, "error: {:?}", event.error);
                finished.insert(event.id.clone());
            }
        }
    })
    .await
    .expect("all tasks finish");
    for id in &ids {
        assert!(finished.contains(id));
    }
}
