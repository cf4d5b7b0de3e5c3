//! Runtime configuration

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use portal_core::{PortalError, PortalResult};

/// Request timeout, humantime syntax (`250ms`, `2s`) or `off`
pub const ENV_REQUEST_TIMEOUT: &str = "PORTAL_REQUEST_TIMEOUT";
/// Log filter directive, `tracing_subscriber::EnvFilter` syntax
pub const ENV_LOG: &str = "PORTAL_LOG";
/// `text` or `json`
pub const ENV_LOG_FORMAT: &str = "PORTAL_LOG_FORMAT";

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = PortalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(PortalError::Config(format!("unknown log format: {other}"))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoggingConfig {
    /// Filter directive; `RUST_LOG` takes precedence when set
    pub filter: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            filter: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// PORTAL runtime configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Fail requests left unanswered this long. `None` waits forever.
    pub request_timeout: Option<Duration>,
    /// Capacity of the UDP send queue and the inbound envelope channel
    /// built by `Endpoint::connect_udp`
    pub inbound_buffer: usize,
    pub logging: LoggingConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            request_timeout: None,
            inbound_buffer: 1024,
            logging: LoggingConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `PORTAL_*` environment variables
    pub fn from_env() -> PortalResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for the `PORTAL_*` keys
    pub fn from_lookup<F>(lookup: F) -> PortalResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = RuntimeConfig::default();

        if let Some(raw) = lookup(ENV_REQUEST_TIMEOUT) {
            config.request_timeout = parse_timeout(&raw)?;
        }
        if let Some(filter) = lookup(ENV_LOG) {
            if !filter.trim().is_empty() {
                config.logging.filter = filter;
            }
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            config.logging.format = format.parse()?;
        }

        Ok(config)
    }

    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_inbound_buffer(mut self, size: usize) -> Self {
        self.inbound_buffer = size;
        self
    }
}

fn parse_timeout(raw: &str) -> PortalResult<Option<Duration>> {
    let raw = raw.trim();
    if raw.is_empty() || raw.eq_ignore_ascii_case("off") || raw.eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let timeout = humantime::parse_duration(raw)
        .map_err(|e| PortalError::Config(format!("{ENV_REQUEST_TIMEOUT}: {e}")))?;
    if timeout.is_zero() {
        return Err(PortalError::Config(format!(
            "{ENV_REQUEST_TIMEOUT}: timeout must be non-zero"
        )));
    }
    Ok(Some(timeout))
}
