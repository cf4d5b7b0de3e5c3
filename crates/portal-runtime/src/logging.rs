//! Structured logging initialisation

use parking_lot::Mutex;
use thiserror::Error;
use tracing::subscriber::SetGlobalDefaultError;
use tracing_subscriber::EnvFilter;

use crate::{LogFormat, LoggingConfig};

static INSTALLED: Mutex<bool> = parking_lot::const_mutex(false);

/// Handle returned once logging is configured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoggingHandle {
    /// False when an earlier call already installed the subscriber
    pub newly_installed: bool,
}

/// Errors encountered while configuring logging
#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("invalid log filter: {0}")]
    Filter(String),
    #[error("failed to install log subscriber: {0}")]
    Subscriber(#[from] SetGlobalDefaultError),
}

/// Install the global `tracing` subscriber.
///
/// The first successful call installs it; later calls return a handle with
/// `newly_installed == false` and leave the global state untouched.
/// `RUST_LOG`, when set, replaces the configured filter.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggingHandle, LoggingError> {
    let mut installed = INSTALLED.lock();
    if *installed {
        return Ok(LoggingHandle {
            newly_installed: false,
        });
    }

    let directive = match std::env::var("RUST_LOG") {
        Ok(value) if !value.trim().is_empty() => value,
        _ => config.filter.clone(),
    };
    let filter = parse_filter(&directive)?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_level(true)
        .with_writer(std::io::stderr);

    match config.format {
        LogFormat::Json => tracing::subscriber::set_global_default(builder.json().finish())?,
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
    }

    *installed = true;
    Ok(LoggingHandle {
        newly_installed: true,
    })
}

/// Validate a filter directive without installing anything
pub fn parse_filter(directive: &str) -> Result<EnvFilter, LoggingError> {
    EnvFilter::try_new(directive).map_err(|e| LoggingError::Filter(e.to_string()))
}
