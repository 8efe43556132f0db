//! Concurrent SOCKS5 proxy load tester.
//!
//! Opens many tunnels through one SOCKS5 proxy, pushes fixed-size payloads
//! through each for a fixed duration, and reports connect time, send latency,
//! throughput and failures as JSON and Markdown.

pub mod app;
pub mod collector;
pub mod config;
pub mod error;
pub mod monitor;
pub mod report;
pub mod shutdown;
pub mod socks5;
pub mod stats;
pub mod worker;

pub use app::{Benchmark, RunError, RunResult, RunState, StopReason};
pub use config::{BenchmarkConfig, ConfigError, Credentials, RawConfig};
pub use error::{ErrorKind, ReplyCode, WorkerError};
pub use report::{Grade, Report, ReportFiles, ScoringModel};
