use std::fmt::{self, Write as _};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

use crate::collector::ResultSnapshot;
use crate::config::{BenchmarkConfig, ConfigSummary};
use crate::stats::{AggregateStats, ErrorBucket};

const MIB: f64 = 1024.0 * 1024.0;
const KIB: f64 = 1024.0;

/// Weights and reference points of the score. The defaults are heuristics:
/// 100 ms average send latency scores nothing, 10 MiB/s per connection
/// scores full marks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringModel {
    pub success_weight: f64,
    pub latency_weight: f64,
    pub throughput_weight: f64,
    pub worst_latency_ms: f64,
    pub perfect_throughput: f64,
}

impl Default for ScoringModel {
    fn default() -> Self {
        Self {
            success_weight: 30.0,
            latency_weight: 35.0,
            throughput_weight: 35.0,
            worst_latency_ms: 100.0,
            perfect_throughput: 10.0 * MIB,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub success: f64,
    pub latency: f64,
    pub throughput: f64,
    pub total: f64,
}

impl ScoringModel {
    /// A component without samples contributes nothing.
    pub fn score(&self, stats: &AggregateStats) -> Score {
        let success = stats
            .success_rate()
            .map_or(0.0, |rate| self.success_weight * rate);
        let latency = stats.latency.map_or(0.0, |latency| {
            let ratio = (latency.mean_ms / self.worst_latency_ms).clamp(0.0, 1.0);
            self.latency_weight * (1.0 - ratio)
        });
        let throughput = stats.throughput.map_or(0.0, |throughput| {
            let ratio = (throughput.mean / self.perfect_throughput).clamp(0.0, 1.0);
            self.throughput_weight * ratio
        });
        Score {
            success,
            latency,
            throughput,
            total: (success + latency + throughput).clamp(0.0, 100.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Grade {
    #[serde(rename = "A+")]
    APlus,
    A,
    B,
    C,
    D,
}

impl Grade {
    /// Lower bounds are inclusive.
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Grade::APlus
        } else if score >= 80.0 {
            Grade::A
        } else if score >= 70.0 {
            Grade::B
        } else if score >= 60.0 {
            Grade::C
        } else {
            Grade::D
        }
    }

    fn description(self) -> &'static str {
        match self {
            Grade::APlus => "excellent",
            Grade::A => "good",
            Grade::B => "moderate",
            Grade::C => "fair",
            Grade::D => "poor",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Grade::APlus => "A+",
            Grade::A => "A",
            Grade::B => "B",
            Grade::C => "C",
            Grade::D => "D",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Wall-clock time from start to the last worker joining.
    pub wall_time_secs: f64,
    /// Outcomes in the final snapshot; equals the configured concurrency.
    pub total_workers: usize,
    pub interrupted: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub generated_at: DateTime<Utc>,
    pub config: ConfigSummary,
    pub run: RunSummary,
    pub stats: AggregateStats,
    pub scoring: ScoringModel,
    pub score: Score,
    pub grade: Grade,
}

impl Report {
    pub fn build(
        config: &BenchmarkConfig,
        snapshot: &ResultSnapshot,
        wall_time: Duration,
        interrupted: bool,
    ) -> Self {
        let stats = AggregateStats::from_snapshot(snapshot);
        let score = config.scoring.score(&stats);
        Report {
            generated_at: Utc::now(),
            config: config.summary(),
            run: RunSummary {
                wall_time_secs: wall_time.as_secs_f64(),
                total_workers: snapshot.outcomes.len(),
                interrupted,
            },
            grade: Grade::from_score(score.total),
            scoring: config.scoring,
            score,
            stats,
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    fn send_rate(&self) -> f64 {
        per_second(self.stats.bytes_sent as f64, self.run.wall_time_secs)
    }

    fn recv_rate(&self) -> f64 {
        per_second(self.stats.bytes_recv as f64, self.run.wall_time_secs)
    }

    /// Short plain-text summary for the terminal.
    pub fn render_summary(&self) -> String {
        let s = &self.stats;
        let mut out = String::new();
        let _ = writeln!(out, "SOCKS5 benchmark report");
        let _ = writeln!(
            out,
            "  proxy {}:{} -> target {}:{}, {} connections, {:.2}s{}",
            self.config.proxy_host,
            self.config.proxy_port,
            self.config.target_host,
            self.config.target_port,
            self.config.concurrency,
            self.run.wall_time_secs,
            if self.run.interrupted { " (interrupted)" } else { "" },
        );
        let _ = writeln!(
            out,
            "  connections: {} ok, {} failed ({})",
            s.success_count,
            s.error_count,
            fmt_pct(s.success_rate()),
        );
        if let Some(c) = s.connect_time {
            let _ = writeln!(
                out,
                "  connect:     mean {:.2}ms  min {:.2}ms  max {:.2}ms  stdev {:.2}ms",
                c.mean_ms, c.min_ms, c.max_ms, c.stdev_ms
            );
        }
        match s.latency {
            Some(l) => {
                let _ = writeln!(
                    out,
                    "  latency:     mean {:.2}ms  p50 {:.2}ms  p95 {:.2}ms  p99 {:.2}ms  max {:.2}ms",
                    l.mean_ms, l.p50_ms, l.p95_ms, l.p99_ms, l.max_ms
                );
            }
            None => {
                let _ = writeln!(out, "  latency:     no data");
            }
        }
        match s.throughput {
            Some(t) => {
                let _ = writeln!(
                    out,
                    "  throughput:  {}/s per connection, {}/s total",
                    format_bytes(t.mean),
                    format_bytes(t.total)
                );
            }
            None => {
                let _ = writeln!(out, "  throughput:  no data");
            }
        }
        let _ = writeln!(
            out,
            "  traffic:     {} sent, {} received",
            format_bytes(s.bytes_sent as f64),
            format_bytes(s.bytes_recv as f64)
        );
        for bucket in &s.errors {
            let _ = writeln!(out, "  error:       {} x{}", bucket.kind, bucket.count);
        }
        let _ = writeln!(
            out,
            "  score:       {:.1}/100 (success {:.1}, latency {:.1}, throughput {:.1}), grade {}",
            self.score.total, self.score.success, self.score.latency, self.score.throughput, self.grade
        );
        out
    }

    /// The narrative report: same numbers as the JSON form plus judgments.
    pub fn render_markdown(&self) -> String {
        let s = &self.stats;
        let c = &self.config;
        let generated = self.generated_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S");
        let success_pct = s.success_rate().map(|r| r * 100.0);
        let mut md = String::new();

        let _ = writeln!(md, "# SOCKS5 Proxy Benchmark Report\n");
        let _ = writeln!(md, "## Overview\n");
        let _ = writeln!(md, "**Generated**: {generated}\n");
        let _ = writeln!(md, "**Result**: {}\n", verdict(success_pct));
        let _ = writeln!(
            md,
            "**Score**: {:.1}/100 - {} ({})\n",
            self.score.total,
            self.grade,
            self.grade.description()
        );
        if self.run.interrupted {
            let _ = writeln!(md, "> The run was interrupted; figures cover the partial run.\n");
        }

        let _ = writeln!(md, "## Configuration\n");
        let _ = writeln!(md, "| Setting | Value |");
        let _ = writeln!(md, "|---------|-------|");
        let _ = writeln!(md, "| Proxy | `{}:{}` |", c.proxy_host, c.proxy_port);
        let _ = writeln!(md, "| Target | `{}:{}` |", c.target_host, c.target_port);
        let _ = writeln!(md, "| Concurrent connections | **{}** |", c.concurrency);
        let _ = writeln!(md, "| Duration | {} s |", c.duration_secs);
        let _ = writeln!(md, "| Payload size | {} bytes |", c.payload_size);
        let _ = writeln!(md, "| Timeout | {} s |", c.timeout_secs);
        let _ = writeln!(
            md,
            "| Authentication | {} |\n",
            if c.authenticated { "username/password" } else { "none" }
        );

        let _ = writeln!(md, "## Results\n");
        let _ = writeln!(md, "### Connections\n");
        let _ = writeln!(md, "| Metric | Value |");
        let _ = writeln!(md, "|--------|-------|");
        let _ = writeln!(md, "| Wall time | {:.2} s |", self.run.wall_time_secs);
        let _ = writeln!(md, "| Total connections | {} |", s.total());
        let _ = writeln!(md, "| Successful | {} ({}) |", s.success_count, fmt_pct(s.success_rate()));
        let _ = writeln!(
            md,
            "| Failed | {} ({}) |\n",
            s.error_count,
            fmt_pct(s.success_rate().map(|r| 1.0 - r))
        );

        let _ = writeln!(md, "### Connect time\n");
        match s.connect_time {
            Some(ct) => {
                let _ = writeln!(md, "| Metric | Value |");
                let _ = writeln!(md, "|--------|-------|");
                let _ = writeln!(md, "| Mean | {:.2} ms |", ct.mean_ms);
                let _ = writeln!(md, "| Min | {:.2} ms |", ct.min_ms);
                let _ = writeln!(md, "| Max | {:.2} ms |", ct.max_ms);
                let _ = writeln!(md, "| Std. deviation | {:.2} ms |\n", ct.stdev_ms);
            }
            None => {
                let _ = writeln!(md, "No data.\n");
            }
        }

        let _ = writeln!(md, "### Send latency\n");
        match s.latency {
            Some(l) => {
                let _ = writeln!(md, "| Metric | Value |");
                let _ = writeln!(md, "|--------|-------|");
                let _ = writeln!(md, "| Samples | {} |", l.samples);
                let _ = writeln!(md, "| Mean | **{:.2} ms** |", l.mean_ms);
                let _ = writeln!(md, "| Median | {:.2} ms |", l.median_ms);
                let _ = writeln!(md, "| Min | {:.2} ms |", l.min_ms);
                let _ = writeln!(md, "| Max | {:.2} ms |", l.max_ms);
                let _ = writeln!(md, "| Std. deviation | {:.2} ms |", l.stdev_ms);
                let _ = writeln!(md, "| P50 | {:.2} ms |", l.p50_ms);
                let _ = writeln!(md, "| P95 | {:.2} ms |", l.p95_ms);
                let _ = writeln!(md, "| P99 | {:.2} ms |\n", l.p99_ms);
            }
            None => {
                let _ = writeln!(md, "No data.\n");
            }
        }

        let _ = writeln!(md, "### Throughput\n");
        match s.throughput {
            Some(t) => {
                let _ = writeln!(md, "| Metric | Value |");
                let _ = writeln!(md, "|--------|-------|");
                let _ = writeln!(md, "| Mean per connection | **{}/s** |", format_bytes(t.mean));
                let _ = writeln!(md, "| Min per connection | {}/s |", format_bytes(t.min));
                let _ = writeln!(md, "| Max per connection | {}/s |", format_bytes(t.max));
                let _ = writeln!(md, "| Total | **{}/s** |\n", format_bytes(t.total));
            }
            None => {
                let _ = writeln!(md, "No data.\n");
            }
        }

        let per_connection = if c.concurrency > 0 {
            s.bytes_sent as f64 / c.concurrency as f64
        } else {
            0.0
        };
        let _ = writeln!(md, "### Traffic\n");
        let _ = writeln!(md, "| Metric | Value |");
        let _ = writeln!(md, "|--------|-------|");
        let _ = writeln!(md, "| Sent | {} |", format_bytes(s.bytes_sent as f64));
        let _ = writeln!(md, "| Received | {} |", format_bytes(s.bytes_recv as f64));
        let _ = writeln!(
            md,
            "| Total | {} |",
            format_bytes((s.bytes_sent + s.bytes_recv) as f64)
        );
        let _ = writeln!(md, "| Sent per connection | {} |", format_bytes(per_connection));
        let _ = writeln!(md, "| Average send rate | {}/s |", format_bytes(self.send_rate()));
        let _ = writeln!(md, "| Average receive rate | {}/s |\n", format_bytes(self.recv_rate()));

        write_error_table(&mut md, "Connection errors", &s.errors);
        write_error_table(&mut md, "Session errors", &s.session_errors);

        let _ = writeln!(md, "## Assessment\n");
        let _ = writeln!(md, "- **Success rate**: {}", success_judgment(success_pct));
        let _ = writeln!(
            md,
            "- **Latency**: {}",
            s.latency
                .map_or("no data", |l| latency_judgment(l.mean_ms))
        );
        let _ = writeln!(
            md,
            "- **Throughput**: {}\n",
            s.throughput
                .map_or("no data", |t| throughput_judgment(t.mean))
        );

        let _ = writeln!(md, "### Score\n");
        let _ = writeln!(md, "| Component | Points |");
        let _ = writeln!(md, "|-----------|--------|");
        let _ = writeln!(
            md,
            "| Success rate | {:.1}/{:.0} |",
            self.score.success, self.scoring.success_weight
        );
        let _ = writeln!(
            md,
            "| Latency | {:.1}/{:.0} |",
            self.score.latency, self.scoring.latency_weight
        );
        let _ = writeln!(
            md,
            "| Throughput | {:.1}/{:.0} |",
            self.score.throughput, self.scoring.throughput_weight
        );
        let _ = writeln!(md, "| **Total** | **{:.1}/100** |\n", self.score.total);

        write_recommendations(&mut md, c.concurrency);

        let _ = writeln!(md, "## Conclusion\n");
        let _ = writeln!(
            md,
            "{} concurrent connections ran for {:.0} s; {} of {} completed the handshake.\n",
            c.concurrency,
            self.run.wall_time_secs,
            s.success_count,
            s.total()
        );
        let _ = writeln!(md, "{}", overall_judgment(self.score.total));
        md
    }

    /// Write `socks5_bench_<timestamp>.json` and `.md` into `dir`.
    pub fn write_artifacts(&self, dir: &Path) -> anyhow::Result<ReportFiles> {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        let stamp = self.generated_at.with_timezone(&Local).format("%Y%m%d_%H%M%S");
        let json = dir.join(format!("socks5_bench_{stamp}.json"));
        let markdown = dir.join(format!("socks5_bench_{stamp}.md"));

        let body = self.to_json().context("encode json report")?;
        fs::write(&json, body).with_context(|| format!("write {}", json.display()))?;
        fs::write(&markdown, self.render_markdown())
            .with_context(|| format!("write {}", markdown.display()))?;

        Ok(ReportFiles { json, markdown })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFiles {
    pub json: PathBuf,
    pub markdown: PathBuf,
}

fn write_error_table(md: &mut String, title: &str, buckets: &[ErrorBucket]) {
    if buckets.is_empty() {
        return;
    }
    let _ = writeln!(md, "### {title}\n");
    let _ = writeln!(md, "| Error | Count |");
    let _ = writeln!(md, "|-------|-------|");
    for bucket in buckets {
        let _ = writeln!(md, "| {} | {} |", bucket.kind, bucket.count);
    }
    md.push('\n');
}

fn write_recommendations(md: &mut String, concurrency: usize) {
    let _ = writeln!(md, "### Recommendations\n");
    let _ = writeln!(md, "1. **Concurrency**");
    let _ = writeln!(md, "   - Connections used in this run: {concurrency}");
    let _ = writeln!(md, "   - Size the proxy's connection limit to the host it runs on");
    let _ = writeln!(md, "   - Watch CPU, memory and network use on the proxy host\n");
    let _ = writeln!(md, "2. **Tuning**");
    let _ = writeln!(md, "   - Check the file descriptor limit (`ulimit -n`) on both ends");
    let _ = writeln!(md, "   - Review kernel TCP settings (backlog, buffer sizes, port range)");
    let _ = writeln!(md, "   - Consider connection pooling and reuse upstream\n");
    let _ = writeln!(md, "3. **Monitoring**");
    let _ = writeln!(md, "   - Track latency and throughput continuously");
    let _ = writeln!(md, "   - Alert on thresholds so regressions surface early");
    let _ = writeln!(md, "   - Repeat load tests to learn the proxy's capacity\n");
}

fn per_second(value: f64, secs: f64) -> f64 {
    if secs > 0.0 {
        value / secs
    } else {
        0.0
    }
}

fn fmt_pct(rate: Option<f64>) -> String {
    rate.map_or_else(|| "n/a".to_string(), |r| format!("{:.1}%", r * 100.0))
}

fn verdict(success_pct: Option<f64>) -> &'static str {
    match success_pct {
        Some(pct) if pct >= 95.0 => "pass",
        Some(pct) if pct >= 80.0 => "needs tuning",
        _ => "fail",
    }
}

pub fn success_judgment(success_pct: Option<f64>) -> &'static str {
    match success_pct {
        Some(pct) if pct >= 95.0 => "excellent, the proxy accepted connections reliably",
        Some(pct) if pct >= 80.0 => "fair, check network settings and connection limits",
        Some(_) => "poor, the proxy is rejecting or dropping connections",
        None => "no data",
    }
}

pub fn latency_judgment(mean_ms: f64) -> &'static str {
    if mean_ms < 10.0 {
        "excellent"
    } else if mean_ms < 50.0 {
        "good"
    } else if mean_ms < 100.0 {
        "fair"
    } else {
        "poor"
    }
}

pub fn throughput_judgment(bytes_per_sec: f64) -> &'static str {
    if bytes_per_sec > 5.0 * MIB {
        "excellent"
    } else if bytes_per_sec > MIB {
        "good"
    } else if bytes_per_sec > 100.0 * KIB {
        "fair"
    } else {
        "poor"
    }
}

fn overall_judgment(score: f64) -> &'static str {
    if score >= 80.0 {
        "Overall: the proxy performs well enough for production load."
    } else if score >= 60.0 {
        "Overall: acceptable, but worth optimizing before production use."
    } else {
        "Overall: insufficient performance; the proxy needs significant work."
    }
}

pub fn format_bytes(value: f64) -> String {
    let mut value = value;
    for unit in ["B", "KB", "MB", "GB", "TB"] {
        if value < 1024.0 {
            return format!("{value:.2} {unit}");
        }
        value /= 1024.0;
    }
    format!("{value:.2} PB")
}
