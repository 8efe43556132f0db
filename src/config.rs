use std::env;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::report::ScoringModel;

pub const DEFAULT_PROXY_HOST: &str = "127.0.0.1";
pub const DEFAULT_PROXY_PORT: u16 = 1082;
pub const DEFAULT_TARGET_HOST: &str = "8.8.8.8";
pub const DEFAULT_TARGET_PORT: u16 = 80;
pub const DEFAULT_CONCURRENCY: usize = 100;
pub const DEFAULT_DURATION_SECS: u64 = 30;
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;
pub const DEFAULT_PAYLOAD_SIZE: usize = 1024;

/// RFC 1929 length fields are a single byte.
const MAX_CREDENTIAL_LEN: usize = 255;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    pub proxy_host: String,
    pub proxy_port: u16,
    pub target: SocketAddrV4,
    pub concurrency: usize,
    pub duration: Duration,
    pub credentials: Option<Credentials>,
    pub timeout: Duration,
    pub payload_size: usize,
    pub scoring: ScoringModel,
    pub output_dir: PathBuf,
}

impl BenchmarkConfig {
    pub fn proxy_addr(&self) -> String {
        format!("{}:{}", self.proxy_host, self.proxy_port)
    }

    /// What goes into the report. Credentials are reduced to the auth mode.
    pub fn summary(&self) -> ConfigSummary {
        ConfigSummary {
            proxy_host: self.proxy_host.clone(),
            proxy_port: self.proxy_port,
            target_host: self.target.ip().to_string(),
            target_port: self.target.port(),
            concurrency: self.concurrency,
            duration_secs: self.duration.as_secs_f64(),
            timeout_secs: self.timeout.as_secs_f64(),
            payload_size: self.payload_size,
            authenticated: self.credentials.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigSummary {
    pub proxy_host: String,
    pub proxy_port: u16,
    pub target_host: String,
    pub target_port: u16,
    pub concurrency: usize,
    pub duration_secs: f64,
    pub timeout_secs: f64,
    pub payload_size: usize,
    pub authenticated: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required value: {0}")]
    MissingKey(String),
    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },
    #[error("config error: {0}")]
    Other(String),
}

/// Unvalidated input as it comes from the command line.
#[derive(Debug, Clone)]
pub struct RawConfig {
    pub proxy_host: String,
    pub proxy_port: u16,
    pub target_host: String,
    pub target_port: u16,
    pub concurrency: usize,
    pub duration_secs: u64,
    pub username: Option<String>,
    pub password: Option<String>,
    pub timeout_secs: u64,
    pub payload_size: usize,
    pub output_dir: PathBuf,
}

impl Default for RawConfig {
    fn default() -> Self {
        Self {
            proxy_host: DEFAULT_PROXY_HOST.to_string(),
            proxy_port: DEFAULT_PROXY_PORT,
            target_host: DEFAULT_TARGET_HOST.to_string(),
            target_port: DEFAULT_TARGET_PORT,
            concurrency: DEFAULT_CONCURRENCY,
            duration_secs: DEFAULT_DURATION_SECS,
            username: None,
            password: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            payload_size: DEFAULT_PAYLOAD_SIZE,
            output_dir: PathBuf::from("."),
        }
    }
}

impl RawConfig {
    pub fn build(self) -> Result<BenchmarkConfig, ConfigError> {
        let proxy_host = self.proxy_host.trim().to_string();
        if proxy_host.is_empty() {
            return Err(ConfigError::MissingKey("proxy-host".to_string()));
        }
        if self.proxy_port == 0 {
            return Err(invalid("proxy-port", "port must be non-zero"));
        }

        let target_ip = self
            .target_host
            .trim()
            .parse::<Ipv4Addr>()
            .map_err(|e| invalid("target-host", format!("expected an IPv4 literal: {e}")))?;
        if self.target_port == 0 {
            return Err(invalid("target-port", "port must be non-zero"));
        }

        if self.concurrency == 0 {
            return Err(invalid("concurrent", "at least one connection is required"));
        }
        if self.duration_secs == 0 {
            return Err(invalid("duration", "duration must be positive"));
        }
        if self.timeout_secs == 0 {
            return Err(invalid("timeout", "timeout must be positive"));
        }
        if self.payload_size == 0 {
            return Err(invalid("packet-size", "payload must be at least one byte"));
        }

        let credentials = match (self.username, self.password) {
            (None, None) => None,
            (Some(_), None) => return Err(ConfigError::MissingKey("password".to_string())),
            (None, Some(_)) => return Err(ConfigError::MissingKey("username".to_string())),
            (Some(username), Some(password)) => {
                let username = expand_env(username)?;
                let password = expand_env(password)?;
                check_credential("username", &username)?;
                check_credential("password", &password)?;
                Some(Credentials { username, password })
            }
        };

        Ok(BenchmarkConfig {
            proxy_host,
            proxy_port: self.proxy_port,
            target: SocketAddrV4::new(target_ip, self.target_port),
            concurrency: self.concurrency,
            duration: Duration::from_secs(self.duration_secs),
            credentials,
            timeout: Duration::from_secs(self.timeout_secs),
            payload_size: self.payload_size,
            scoring: ScoringModel::default(),
            output_dir: self.output_dir,
        })
    }
}

fn invalid(key: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn check_credential(key: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() {
        return Err(invalid(key, "must not be empty"));
    }
    if value.len() > MAX_CREDENTIAL_LEN {
        return Err(invalid(
            key,
            format!("{} bytes exceeds the {MAX_CREDENTIAL_LEN} byte limit", value.len()),
        ));
    }
    Ok(())
}

/// `$NAME` reads the environment variable, `$$x` is the literal `$x`.
fn expand_env(value: String) -> Result<String, ConfigError> {
    if let Some(stripped) = value.strip_prefix("$$") {
        return Ok(format!("${}", stripped));
    }
    if let Some(var) = value.strip_prefix('$') {
        let env_value = env::var(var).map_err(|_| {
            ConfigError::Other(format!("{} references unset environment variable", var))
        })?;
        return Ok(env_value);
    }
    Ok(value)
}
