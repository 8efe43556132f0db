//! Whole-run scenarios: workers, collector, orchestrator and report together.

mod common;

use std::time::Duration;

use common::{bench_config, spawn_proxy, unused_addr, with_credentials, MockBehavior};
use socks5_bench::stats::ErrorBucket;
use socks5_bench::{Benchmark, ErrorKind, RunError, RunState, StopReason};

#[tokio::test]
async fn test_unreachable_proxy_yields_one_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = bench_config(unused_addr().await, 1, 2, dir.path());

    let mut bench = Benchmark::new(config);
    let result = bench.run(std::future::pending::<()>()).await.unwrap();

    assert_eq!(bench.state(), RunState::Reported);
    assert_eq!(result.outcomes.len(), 1);
    let outcome = &result.outcomes[0];
    assert!(!outcome.success);
    let kind = outcome.error.as_ref().unwrap().kind;
    assert!(
        matches!(
            kind,
            ErrorKind::ConnectRejected { .. } | ErrorKind::ConnectTimeout
        ),
        "unexpected kind {kind:?}"
    );
    assert_eq!(result.report.stats.error_count, 1);
    assert_eq!(result.report.score.success, 0.0);
    assert!(result.report.stats.latency.is_none());
}

#[tokio::test]
async fn test_no_auth_proxy_run_succeeds() {
    let proxy = spawn_proxy(MockBehavior::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let config = bench_config(proxy.addr, 5, 3, dir.path());

    let mut bench = Benchmark::new(config);
    let result = bench.run(std::future::pending::<()>()).await.unwrap();

    assert_eq!(result.stop_reason, StopReason::DurationElapsed);
    assert_eq!(result.outcomes.len(), 5);
    assert_eq!(result.report.run.total_workers, 5);
    assert!(result.outcomes.iter().all(|o| o.success));

    let stats = &result.report.stats;
    assert_eq!(stats.success_count, 5);
    assert_eq!(stats.error_count, 0);
    assert!(stats.latency.unwrap().samples > 0);
    let throughput = stats.throughput.unwrap();
    assert!(throughput.samples >= 1 && throughput.samples <= 5);
    assert!(stats.bytes_sent > 0);

    let files = result.artifacts.expect("artifacts should be written");
    assert!(files.json.exists());
    assert!(files.markdown.exists());
    assert!(*proxy.tunnel_bytes.lock() > 0);
}

#[tokio::test]
async fn test_rejected_credentials_fail_every_worker() {
    let proxy = spawn_proxy(MockBehavior {
        require_auth: true,
        auth_status: 0x01,
        ..MockBehavior::default()
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let config = with_credentials(bench_config(proxy.addr, 4, 5, dir.path()), "bench", "nope");

    let mut bench = Benchmark::new(config);
    let result = bench.run(std::future::pending::<()>()).await.unwrap();

    assert_eq!(result.stop_reason, StopReason::WorkersFinished);
    assert_eq!(result.outcomes.len(), 4);
    assert!(result
        .outcomes
        .iter()
        .all(|o| o.error.as_ref().map(|e| e.kind) == Some(ErrorKind::AuthFailed)));
    assert_eq!(
        result.report.stats.errors,
        vec![ErrorBucket {
            kind: ErrorKind::AuthFailed,
            count: 4
        }]
    );
    assert_eq!(proxy.seen_credentials.lock().len(), 4);
}

#[tokio::test]
async fn test_interrupt_stops_run_early() {
    let proxy = spawn_proxy(MockBehavior::default()).await;
    let dir = tempfile::tempdir().unwrap();
    let config = bench_config(proxy.addr, 3, 30, dir.path());

    let started = std::time::Instant::now();
    let mut bench = Benchmark::new(config);
    let result = bench
        .run(tokio::time::sleep(Duration::from_secs(1)))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_secs(8));
    assert_eq!(result.stop_reason, StopReason::Interrupted);
    assert!(result.report.run.interrupted);
    assert_eq!(result.outcomes.len(), 3);
    assert_eq!(
        result.report.stats.success_count + result.report.stats.error_count,
        3
    );
}

#[tokio::test]
async fn test_interrupt_during_handshake_marks_interrupted() {
    let proxy = spawn_proxy(MockBehavior {
        stall: true,
        ..MockBehavior::default()
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = bench_config(proxy.addr, 2, 30, dir.path());
    config.timeout = Duration::from_secs(10);

    let mut bench = Benchmark::new(config);
    let result = bench
        .run(tokio::time::sleep(Duration::from_millis(300)))
        .await
        .unwrap();

    assert_eq!(result.outcomes.len(), 2);
    assert_eq!(
        result.report.stats.errors,
        vec![ErrorBucket {
            kind: ErrorKind::Interrupted,
            count: 2
        }]
    );
    // Neither worker got a TCP result from the handshake.
    assert!(result.report.stats.connect_time.is_none());
}

#[tokio::test]
async fn test_stuck_workers_are_aborted_after_grace() {
    let proxy = spawn_proxy(MockBehavior {
        hold_tunnel: true,
        ..MockBehavior::default()
    })
    .await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = bench_config(proxy.addr, 2, 1, dir.path());
    // Large enough to fill both socket buffers, so `write_all` never returns.
    config.payload_size = 8 * 1024 * 1024;
    config.timeout = Duration::from_secs(60);

    let started = std::time::Instant::now();
    let mut bench = Benchmark::new(config).with_shutdown_grace(Duration::from_millis(500));
    let result = bench.run(std::future::pending::<()>()).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(bench.state(), RunState::Reported);
    assert_eq!(result.outcomes.len(), 2);
    assert_eq!(result.report.stats.total(), 2);
    for outcome in &result.outcomes {
        assert!(!outcome.success);
        let err = outcome.error.as_ref().unwrap();
        assert_eq!(err.kind, ErrorKind::Interrupted);
        assert_eq!(err.message, "worker did not report before shutdown");
    }
    let mut ids: Vec<usize> = result.outcomes.iter().map(|o| o.worker_id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1]);
}

#[tokio::test]
async fn test_second_run_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = bench_config(unused_addr().await, 1, 1, dir.path());

    let mut bench = Benchmark::new(config);
    bench.run(std::future::pending::<()>()).await.unwrap();
    let err = bench.run(std::future::pending::<()>()).await.unwrap_err();
    assert!(matches!(err, RunError::AlreadyStarted(RunState::Reported)));
}

#[tokio::test]
async fn test_unwritable_output_still_reports() {
    let blocker = tempfile::NamedTempFile::new().unwrap();
    let config = bench_config(unused_addr().await, 1, 1, blocker.path());

    let mut bench = Benchmark::new(config);
    let result = bench.run(std::future::pending::<()>()).await.unwrap();

    assert!(result.artifacts.is_none());
    assert_eq!(bench.state(), RunState::Reported);
    assert_eq!(result.report.stats.total(), 1);
}
