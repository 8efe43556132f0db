use std::collections::HashSet;
use std::time::Duration;

use parking_lot::Mutex;

use crate::worker::WorkerOutcome;

/// Counters cheap enough to copy on every progress tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    pub success_count: usize,
    pub error_count: usize,
}

impl Progress {
    pub fn completed(&self) -> usize {
        self.success_count + self.error_count
    }
}

/// Owned copy of everything the collector has gathered.
#[derive(Debug, Clone, Default)]
pub struct ResultSnapshot {
    pub success_count: usize,
    pub error_count: usize,
    pub connect_times: Vec<Duration>,
    /// Per-send latencies in milliseconds, across all workers, unordered.
    pub latencies: Vec<f64>,
    /// Bytes per second, one sample per worker that sent data.
    pub throughputs: Vec<f64>,
    pub outcomes: Vec<WorkerOutcome>,
}

#[derive(Debug, Default)]
struct Inner {
    success_count: usize,
    error_count: usize,
    connect_times: Vec<Duration>,
    latencies: Vec<f64>,
    throughputs: Vec<f64>,
    outcomes: Vec<WorkerOutcome>,
    reported: HashSet<usize>,
}

/// The only mutable state shared between workers. Writes happen a couple of
/// times per worker lifetime, so one lock is enough.
#[derive(Debug, Default)]
pub struct ResultCollector {
    inner: Mutex<Inner>,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_connect_time(&self, connect_time: Duration) {
        self.inner.lock().connect_times.push(connect_time);
    }

    /// Store a worker's final outcome. Returns false, changing nothing, if
    /// that worker already reported.
    pub fn record_outcome(&self, outcome: WorkerOutcome) -> bool {
        let mut inner = self.inner.lock();
        if !inner.reported.insert(outcome.worker_id) {
            return false;
        }

        if outcome.success {
            inner.success_count += 1;
        } else {
            inner.error_count += 1;
        }
        inner.latencies.extend_from_slice(&outcome.latencies);
        if let Some(throughput) = outcome.throughput() {
            inner.throughputs.push(throughput);
        }
        inner.outcomes.push(outcome);
        true
    }

    pub fn has_outcome(&self, worker_id: usize) -> bool {
        self.inner.lock().reported.contains(&worker_id)
    }

    pub fn progress(&self) -> Progress {
        let inner = self.inner.lock();
        Progress {
            success_count: inner.success_count,
            error_count: inner.error_count,
        }
    }

    pub fn snapshot(&self) -> ResultSnapshot {
        let inner = self.inner.lock();
        ResultSnapshot {
            success_count: inner.success_count,
            error_count: inner.error_count,
            connect_times: inner.connect_times.clone(),
            latencies: inner.latencies.clone(),
            throughputs: inner.throughputs.clone(),
            outcomes: inner.outcomes.clone(),
        }
    }
}
