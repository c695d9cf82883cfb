//! Diagnostic logging setup for the svscan binary.
//!
//! Diagnostics go to stderr; service output never passes through here, it is
//! handed to each service's logger subprocess instead.

use std::io;

use tracing::Level;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

/// Logging format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    /// Human-readable multi-line output.
    #[default]
    Pretty,
    /// Single-line output.
    Compact,
    /// JSON lines for log aggregation.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Output format.
    pub format: LogFormat,
    /// Level used when `RUST_LOG` is unset.
    pub level: Level,
    /// Include target (module path).
    pub with_target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Pretty,
            level: Level::INFO,
            with_target: false,
        }
    }
}

impl LogConfig {
    /// Set the log format.
    #[must_use]
    pub const fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    /// Set the default log level.
    #[must_use]
    pub const fn level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }
}

/// Initialize the global tracing subscriber.
///
/// Should be called once at startup. `RUST_LOG` overrides the configured
/// level. A second call is ignored.
pub fn init_logging(config: &LogConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.to_string()));

    match config.format {
        LogFormat::Pretty => {
            let subscriber = tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .pretty()
                    .with_target(config.with_target)
                    .with_writer(io::stderr),
            );
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        LogFormat::Compact => {
            let subscriber = tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .compact()
                    .with_target(config.with_target)
                    .with_writer(io::stderr),
            );
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
        LogFormat::Json => {
            let subscriber = tracing_subscriber::registry().with(filter).with(
                fmt::layer()
                    .json()
                    .with_target(config.with_target)
                    .with_writer(io::stderr),
            );
            let _ = tracing::subscriber::set_global_default(subscriber);
        }
    }
}
