use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::collector::ResultSnapshot;
use crate::error::ErrorKind;
use crate::worker::WorkerOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectTimeStats {
    pub mean_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub stdev_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub samples: usize,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub stdev_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Per-connection throughput in bytes per second.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThroughputStats {
    pub samples: usize,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    pub total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBucket {
    pub kind: ErrorKind,
    pub count: usize,
}

/// Everything derived from the final snapshot. Sections without samples are
/// `None` ("no data").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub success_count: usize,
    pub error_count: usize,
    pub bytes_sent: u64,
    pub bytes_recv: u64,
    pub connect_time: Option<ConnectTimeStats>,
    pub latency: Option<LatencyStats>,
    pub throughput: Option<ThroughputStats>,
    /// Why failed workers failed, most frequent first.
    pub errors: Vec<ErrorBucket>,
    /// Faults that cut an established tunnel short, most frequent first.
    pub session_errors: Vec<ErrorBucket>,
}

impl AggregateStats {
    pub fn from_snapshot(snapshot: &ResultSnapshot) -> Self {
        let connect_ms: Vec<f64> = snapshot
            .connect_times
            .iter()
            .map(|d| d.as_secs_f64() * 1000.0)
            .collect();

        let (failed, established): (Vec<&WorkerOutcome>, Vec<&WorkerOutcome>) =
            snapshot.outcomes.iter().partition(|o| !o.success);

        Self {
            success_count: snapshot.success_count,
            error_count: snapshot.error_count,
            bytes_sent: snapshot.outcomes.iter().map(|o| o.bytes_sent).sum(),
            bytes_recv: snapshot.outcomes.iter().map(|o| o.bytes_recv).sum(),
            connect_time: connect_time_stats(&connect_ms),
            latency: latency_stats(&snapshot.latencies),
            throughput: throughput_stats(&snapshot.throughputs),
            errors: histogram(failed),
            session_errors: histogram(established),
        }
    }

    pub fn total(&self) -> usize {
        self.success_count + self.error_count
    }

    /// Fraction of workers that completed the handshake.
    pub fn success_rate(&self) -> Option<f64> {
        match self.total() {
            0 => None,
            total => Some(self.success_count as f64 / total as f64),
        }
    }
}

fn histogram<'a>(outcomes: impl IntoIterator<Item = &'a WorkerOutcome>) -> Vec<ErrorBucket> {
    let mut counts: BTreeMap<ErrorKind, usize> = BTreeMap::new();
    for outcome in outcomes {
        if let Some(err) = &outcome.error {
            *counts.entry(err.kind).or_insert(0) += 1;
        }
    }
    let mut buckets: Vec<ErrorBucket> = counts
        .into_iter()
        .map(|(kind, count)| ErrorBucket { kind, count })
        .collect();
    // Stable sort keeps the BTreeMap order among equal counts.
    buckets.sort_by(|a, b| b.count.cmp(&a.count));
    buckets
}

fn connect_time_stats(samples: &[f64]) -> Option<ConnectTimeStats> {
    Some(ConnectTimeStats {
        mean_ms: mean(samples)?,
        min_ms: min(samples)?,
        max_ms: max(samples)?,
        stdev_ms: stdev(samples),
    })
}

fn latency_stats(samples: &[f64]) -> Option<LatencyStats> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);

    Some(LatencyStats {
        samples: sorted.len(),
        mean_ms: mean(&sorted)?,
        median_ms: median(&sorted)?,
        min_ms: sorted[0],
        max_ms: sorted[sorted.len() - 1],
        stdev_ms: stdev(&sorted),
        p50_ms: percentile(&sorted, 0.50)?,
        p95_ms: percentile(&sorted, 0.95)?,
        p99_ms: percentile(&sorted, 0.99)?,
    })
}

fn throughput_stats(samples: &[f64]) -> Option<ThroughputStats> {
    Some(ThroughputStats {
        samples: samples.len(),
        mean: mean(samples)?,
        min: min(samples)?,
        max: max(samples)?,
        total: samples.iter().sum(),
    })
}

/// Nearest-rank percentile over an ascending slice: `sorted[floor(n * p)]`,
/// index clamped to the last element. `None` for an empty slice.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let idx = (sorted.len() as f64 * p).floor() as usize;
    Some(sorted[idx.min(sorted.len() - 1)])
}

pub fn mean(samples: &[f64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<f64>() / samples.len() as f64)
}

/// Median of an ascending slice; the mean of the middle pair for even lengths.
pub fn median(sorted: &[f64]) -> Option<f64> {
    let n = sorted.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(sorted[n / 2]),
        _ => Some((sorted[n / 2 - 1] + sorted[n / 2]) / 2.0),
    }
}

/// Sample standard deviation (n - 1). Zero below two samples.
pub fn stdev(samples: &[f64]) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let mean = samples.iter().sum::<f64>() / samples.len() as f64;
    let variance = samples
        .iter()
        .map(|value| {
            let diff = mean - *value;
            diff * diff
        })
        .sum::<f64>()
        / (samples.len() - 1) as f64;
    variance.sqrt()
}

fn min(samples: &[f64]) -> Option<f64> {
    samples.iter().copied().reduce(f64::min)
}

fn max(samples: &[f64]) -> Option<f64> {
    samples.iter().copied().reduce(f64::max)
}
