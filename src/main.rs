use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use socks5_bench::config::{self, RawConfig};
use socks5_bench::Benchmark;

#[derive(Parser, Debug)]
#[command(
    name = "socks5-bench",
    about = "Load-test a SOCKS5 proxy with many concurrent tunnels"
)]
struct Args {
    /// SOCKS5 proxy host
    #[arg(long = "proxy-host", default_value = config::DEFAULT_PROXY_HOST)]
    proxy_host: String,

    /// SOCKS5 proxy port
    #[arg(long = "proxy-port", default_value_t = config::DEFAULT_PROXY_PORT)]
    proxy_port: u16,

    /// Target IPv4 address the proxy connects to
    #[arg(long = "target-host", default_value = config::DEFAULT_TARGET_HOST)]
    target_host: String,

    /// Target port
    #[arg(long = "target-port", default_value_t = config::DEFAULT_TARGET_PORT)]
    target_port: u16,

    /// Number of concurrent connections
    #[arg(short = 'c', long = "concurrent", default_value_t = config::DEFAULT_CONCURRENCY)]
    concurrent: usize,

    /// Test duration in seconds
    #[arg(short = 'd', long = "duration", default_value_t = config::DEFAULT_DURATION_SECS)]
    duration: u64,

    /// Username for proxy authentication ($NAME reads the environment)
    #[arg(short = 'u', long = "username")]
    username: Option<String>,

    /// Password for proxy authentication ($NAME reads the environment)
    #[arg(short = 'p', long = "password")]
    password: Option<String>,

    /// Per-operation timeout in seconds
    #[arg(long = "timeout", default_value_t = config::DEFAULT_TIMEOUT_SECS)]
    timeout: u64,

    /// Payload size of each send in bytes
    #[arg(long = "packet-size", default_value_t = config::DEFAULT_PAYLOAD_SIZE)]
    packet_size: usize,

    /// Directory the JSON and Markdown reports are written to
    #[arg(short = 'o', long = "output-dir", default_value = ".")]
    output_dir: PathBuf,
}

impl From<Args> for RawConfig {
    fn from(args: Args) -> Self {
        RawConfig {
            proxy_host: args.proxy_host,
            proxy_port: args.proxy_port,
            target_host: args.target_host,
            target_port: args.target_port,
            concurrency: args.concurrent,
            duration_secs: args.duration,
            username: args.username,
            password: args.password,
            timeout_secs: args.timeout,
            payload_size: args.packet_size,
            output_dir: args.output_dir,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = RawConfig::from(args)
        .build()
        .context("invalid configuration")?;

    let mut bench = Benchmark::new(config);
    let result = bench.run(interrupted()).await?;

    print!("{}", result.report.render_summary());
    if let Some(files) = &result.artifacts {
        println!("  reports:     {}", files.json.display());
        println!("               {}", files.markdown.display());
    }
    Ok(())
}

/// Resolves on Ctrl-C. If the handler cannot be installed the run simply
/// goes the full duration.
async fn interrupted() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::warn!("cannot listen for ctrl-c: {err}");
        std::future::pending::<()>().await;
    }
}
