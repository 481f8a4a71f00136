//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the tracing subscriber from `STEADYBIT_LOG_*`
//! - Translate zerolog style level names used across extensions
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - JSON format for production, human readable format otherwise
//! - Logs go to stderr, stdout stays free for the extension

use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{fmt, Layer};

use crate::config::{LogFormat, LogSpecification};

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("unsupported log level: {0}")]
    UnsupportedLevel(String),
    #[error("failed to install log subscriber: {0}")]
    Install(#[from] TryInitError),
}

/// Parse a log level name.
///
/// Accepts tracing's names plus `fatal` and `panic` (mapped to error) and
/// `disabled` (mapped to off).
pub fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    let normalized = level.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "" => Ok(LevelFilter::INFO),
        "fatal" | "panic" => Ok(LevelFilter::ERROR),
        "disabled" => Ok(LevelFilter::OFF),
        other => {
            LevelFilter::from_str(other).map_err(|_| LoggingError::UnsupportedLevel(level.to_string()))
        }
    }
}

/// Install the global subscriber.
///
/// Fails when the level is unknown or a subscriber is already installed.
pub fn init(spec: &LogSpecification) -> Result<(), LoggingError> {
    let level = parse_level(&spec.level)?;

    let base = fmt::layer().with_writer(std::io::stderr).with_target(true);
    let layer = match spec.format {
        LogFormat::Json => base.json().with_filter(level).boxed(),
        LogFormat::Text => base.with_ansi(spec.color).with_filter(level).boxed(),
    };

    tracing_subscriber::registry().with(layer).try_init()?;

    tracing::debug!(format = ?spec.format, level = %level, "Logging initialized");
    Ok(())
}
