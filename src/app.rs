use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::task::{JoinError, JoinSet};
use tokio::time::{sleep_until, timeout_at, Instant};

use crate::collector::ResultCollector;
use crate::config::BenchmarkConfig;
use crate::monitor;
use crate::report::{Report, ReportFiles};
use crate::shutdown::StopSignal;
use crate::worker::{self, WorkerOutcome};

/// How long workers get to wind down past the configured duration.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Configured,
    Running,
    Stopping,
    Reported,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RunState::Configured => "configured",
            RunState::Running => "running",
            RunState::Stopping => "stopping",
            RunState::Reported => "reported",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    DurationElapsed,
    Interrupted,
    WorkersFinished,
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error("benchmark already {0}, it can only run once")]
    AlreadyStarted(RunState),
}

#[derive(Debug)]
pub struct RunResult {
    pub report: Report,
    pub outcomes: Vec<WorkerOutcome>,
    /// `None` when the artifacts could not be written.
    pub artifacts: Option<ReportFiles>,
    pub stop_reason: StopReason,
}

/// One benchmark run: N workers against one proxy, then one report.
pub struct Benchmark {
    config: Arc<BenchmarkConfig>,
    collector: Arc<ResultCollector>,
    stop: StopSignal,
    state: RunState,
    grace: Duration,
}

impl Benchmark {
    pub fn new(config: BenchmarkConfig) -> Self {
        Self {
            config: Arc::new(config),
            collector: Arc::new(ResultCollector::new()),
            stop: StopSignal::new(),
            state: RunState::Configured,
            grace: SHUTDOWN_GRACE,
        }
    }

    /// Override how long workers may run past the duration before they are
    /// aborted. Defaults to [`SHUTDOWN_GRACE`].
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Run until the duration elapses, `interrupt` resolves, or every worker
    /// is done, whichever comes first.
    pub async fn run<F>(&mut self, interrupt: F) -> Result<RunResult, RunError>
    where
        F: Future<Output = ()>,
    {
        if self.state != RunState::Configured {
            return Err(RunError::AlreadyStarted(self.state));
        }
        self.state = RunState::Running;

        let config = self.config.clone();
        log::info!(
            "starting {} connections via {} to {} for {}s",
            config.concurrency,
            config.proxy_addr(),
            config.target,
            config.duration.as_secs()
        );

        let started = Instant::now();
        let mut workers = JoinSet::new();
        for worker_id in 0..config.concurrency {
            workers.spawn(worker::run(
                worker_id,
                config.clone(),
                self.collector.clone(),
                self.stop.clone(),
            ));
        }
        let monitor = monitor::spawn(
            self.collector.clone(),
            self.stop.clone(),
            started.into_std(),
            config.duration,
        );

        let deadline = sleep_until(started + config.duration);
        tokio::pin!(deadline);
        tokio::pin!(interrupt);

        let stop_reason = loop {
            tokio::select! {
                _ = &mut deadline => break StopReason::DurationElapsed,
                _ = &mut interrupt => break StopReason::Interrupted,
                joined = workers.join_next() => match joined {
                    Some(joined) => log_join(joined),
                    None => break StopReason::WorkersFinished,
                },
            }
        };

        self.state = RunState::Stopping;
        match stop_reason {
            StopReason::Interrupted => log::warn!("interrupted, stopping workers"),
            StopReason::DurationElapsed => log::info!("duration elapsed, stopping workers"),
            StopReason::WorkersFinished => log::info!("all workers finished"),
        }
        self.stop.fire();

        let grace_deadline = started + config.duration + self.grace;
        let drained = timeout_at(grace_deadline, async {
            while let Some(joined) = workers.join_next().await {
                log_join(joined);
            }
        })
        .await;
        if drained.is_err() {
            log::warn!(
                "{} workers still running after the grace period, aborting",
                workers.len()
            );
            workers.abort_all();
            while let Some(joined) = workers.join_next().await {
                log_join(joined);
            }
        }
        if let Err(err) = monitor.await {
            log::debug!("progress monitor ended abnormally: {err}");
        }

        for worker_id in 0..config.concurrency {
            if !self.collector.has_outcome(worker_id) {
                self.collector.record_outcome(WorkerOutcome::interrupted(
                    worker_id,
                    "worker did not report before shutdown",
                ));
            }
        }

        let wall_time = started.elapsed();
        let snapshot = self.collector.snapshot();
        let report = Report::build(
            &config,
            &snapshot,
            wall_time,
            stop_reason == StopReason::Interrupted,
        );

        let artifacts = match report.write_artifacts(&config.output_dir) {
            Ok(files) => {
                log::info!(
                    "report written to {} and {}",
                    files.json.display(),
                    files.markdown.display()
                );
                Some(files)
            }
            Err(err) => {
                log::error!("failed to write report: {err:#}");
                None
            }
        };
        self.state = RunState::Reported;

        Ok(RunResult {
            report,
            outcomes: snapshot.outcomes,
            artifacts,
            stop_reason,
        })
    }
}

fn log_join(joined: Result<usize, JoinError>) {
    match joined {
        Ok(worker_id) => log::trace!("worker {worker_id} joined"),
        Err(err) if err.is_panic() => log::error!("worker panicked: {err}"),
        Err(err) => log::debug!("worker cancelled: {err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_benchmark_is_configured() {
        let config = crate::config::RawConfig::default().build().unwrap();
        let bench = Benchmark::new(config);
        assert_eq!(bench.state(), RunState::Configured);
        assert_eq!(bench.config().concurrency, 100);
    }

    #[test]
    fn second_start_error_names_state() {
        let err = RunError::AlreadyStarted(RunState::Reported);
        assert_eq!(err.to_string(), "benchmark already reported, it can only run once");
    }
}
