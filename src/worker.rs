use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::collector::ResultCollector;
use crate::config::BenchmarkConfig;
use crate::error::{ErrorKind, WorkerError};
use crate::shutdown::StopSignal;
use crate::socks5;

/// Pause between sends. Bounds local CPU use; it is not a rate limit.
pub const SEND_INTERVAL: Duration = Duration::from_millis(1);

/// Deadline for the opportunistic receive after each send. Zero means the
/// read is polled once and abandoned if nothing is buffered.
const RECV_WINDOW: Duration = Duration::ZERO;

const RECV_BUFFER_SIZE: usize = 4096;
const PAYLOAD_BYTE: u8 = b'X';

/// Everything one worker observed. Exactly one is produced per worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerOutcome {
    pub worker_id: usize,
    /// The handshake completed and the tunnel carried traffic.
    pub success: bool,
    pub connect_time: Duration,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    /// Per-send write latency in milliseconds, in send order.
    pub latencies: Vec<f64>,
    /// For a failed worker, why it failed. For a successful one, the fault
    /// that ended its session early, if any.
    pub error: Option<WorkerError>,
    /// Wall-clock time spent in the transfer loop.
    pub duration: Duration,
}

impl WorkerOutcome {
    pub fn failed(worker_id: usize, connect_time: Duration, error: WorkerError) -> Self {
        Self {
            worker_id,
            success: false,
            connect_time,
            bytes_sent: 0,
            bytes_recv: 0,
            latencies: Vec::new(),
            error: Some(error),
            duration: Duration::ZERO,
        }
    }

    /// Stand-in for a worker that was aborted or panicked before reporting.
    pub fn interrupted(worker_id: usize, reason: impl Into<String>) -> Self {
        Self::failed(
            worker_id,
            Duration::ZERO,
            WorkerError::new(ErrorKind::Interrupted, reason),
        )
    }

    /// Bytes per second over the transfer loop, when there is anything to
    /// measure.
    pub fn throughput(&self) -> Option<f64> {
        let secs = self.duration.as_secs_f64();
        if self.bytes_sent > 0 && secs > 0.0 {
            Some(self.bytes_sent as f64 / secs)
        } else {
            None
        }
    }
}

/// Run one worker to completion and hand its outcome to the collector.
/// Returns the worker id so the orchestrator can tell who finished.
pub async fn run(
    worker_id: usize,
    config: Arc<BenchmarkConfig>,
    collector: Arc<ResultCollector>,
    stop: StopSignal,
) -> usize {
    let outcome = drive(worker_id, &config, &collector, &stop).await;
    if let Some(err) = &outcome.error {
        log::debug!("worker {worker_id}: {err}");
    }
    if !collector.record_outcome(outcome) {
        log::warn!("worker {worker_id} reported twice, keeping the first outcome");
    }
    worker_id
}

async fn drive(
    worker_id: usize,
    config: &BenchmarkConfig,
    collector: &ResultCollector,
    stop: &StopSignal,
) -> WorkerOutcome {
    let started = Instant::now();
    let attempt = tokio::select! {
        attempt = socks5::connect(config) => attempt,
        _ = stop.wait() => {
            // No TCP result was reached, so this is not a connect time sample.
            return WorkerOutcome::failed(
                worker_id,
                started.elapsed(),
                WorkerError::new(ErrorKind::Interrupted, "stopped during handshake"),
            );
        }
    };

    collector.record_connect_time(attempt.connect_time);
    match attempt.result {
        Ok(stream) => transfer(worker_id, config, stop, stream, attempt.connect_time).await,
        Err(err) => WorkerOutcome::failed(worker_id, attempt.connect_time, err.to_worker_error()),
    }
}

async fn transfer(
    worker_id: usize,
    config: &BenchmarkConfig,
    stop: &StopSignal,
    mut stream: TcpStream,
    connect_time: Duration,
) -> WorkerOutcome {
    let payload = vec![PAYLOAD_BYTE; config.payload_size];
    let mut recv_buf = vec![0u8; RECV_BUFFER_SIZE];
    let mut latencies = Vec::new();
    let mut bytes_sent = 0u64;
    let mut bytes_recv = 0u64;
    let mut error = None;

    let started = Instant::now();
    while started.elapsed() < config.duration && !stop.is_set() {
        let send_start = Instant::now();
        match timeout(config.timeout, stream.write_all(&payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error = Some(WorkerError::from_session_io(&err));
                break;
            }
            Err(_) => {
                error = Some(WorkerError::new(
                    ErrorKind::TransientIo,
                    format!("send timed out after {:?}", config.timeout),
                ));
                break;
            }
        }
        latencies.push(send_start.elapsed().as_secs_f64() * 1000.0);
        bytes_sent += payload.len() as u64;

        match timeout(RECV_WINDOW, stream.read(&mut recv_buf)).await {
            Err(_) => {}
            Ok(Ok(0)) => {
                error = Some(WorkerError::new(
                    ErrorKind::TransientIo,
                    "tunnel closed by peer",
                ));
                break;
            }
            Ok(Ok(n)) => bytes_recv += n as u64,
            Ok(Err(err)) => {
                error = Some(WorkerError::from_session_io(&err));
                break;
            }
        }

        tokio::time::sleep(SEND_INTERVAL).await;
    }
    let duration = started.elapsed();

    let _ = stream.shutdown().await;
    drop(stream);

    log::trace!(
        "worker {worker_id} finished: {} sends, {bytes_sent} bytes out, {bytes_recv} bytes in",
        latencies.len()
    );

    WorkerOutcome {
        worker_id,
        success: true,
        connect_time,
        bytes_sent,
        bytes_recv,
        latencies,
        error,
        duration,
    }
}
