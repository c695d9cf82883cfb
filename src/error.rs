//! Error types used by the svscan runtime, its services and collaborators.
//!
//! - [`RuntimeError`]: errors raised by the daemon itself (fatal or shutdown-related).
//! - [`ServiceError`]: errors raised while driving one service (spawn, logger, pipe).
//! - [`RegistryError`]: errors raised by a [`Registry`](crate::Registry) backend.
//! - [`ConfigError`]: errors raised while loading or validating [`Config`](crate::Config).
//!
//! Every type provides `as_label()`, a short stable snake_case label for logs.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// # Errors produced by the svscan runtime.
///
/// Only these reach the binary; everything that happens while supervising a
/// service is handled in place and surfaced as an event.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// The service root does not exist and could not be created.
    #[error("service directory {path:?} does not exist and is not creatable: {source}")]
    ServiceRootUnavailable {
        /// Configured service root.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Shutdown grace period was exceeded; some services were still being torn down.
    #[error("shutdown timeout {grace:?} exceeded; stuck: {stuck:?}")]
    GraceExceeded {
        /// The configured grace duration.
        grace: Duration,
        /// Names of services whose supervisors did not finish in time.
        stuck: Vec<String>,
    },

    /// Signal handlers could not be installed.
    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] std::io::Error),
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs.
    ///
    /// # Example
    /// ```
    /// use svscan::RuntimeError;
    /// use std::time::Duration;
    ///
    /// let err = RuntimeError::GraceExceeded { grace: Duration::from_secs(5), stuck: vec![] };
    /// assert_eq!(err.as_label(), "runtime_grace_exceeded");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::ServiceRootUnavailable { .. } => "runtime_service_root_unavailable",
            RuntimeError::GraceExceeded { .. } => "runtime_grace_exceeded",
            RuntimeError::Signals(_) => "runtime_signals",
        }
    }
}

/// # Errors produced while supervising a single service.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ServiceError {
    /// The `run` executable could not be launched.
    #[error("service {name} not startable: {source}")]
    Spawn {
        /// Service name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The logger subprocess could not be launched.
    #[error("logger for {name} not startable: {source}")]
    LoggerSpawn {
        /// Service name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The logger stopped accepting input.
    #[error("logger input for {name} gone away: {source}")]
    PipeClosed {
        /// Service name.
        name: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A spawned child did not expose the pipe we asked for.
    #[error("{name}: child has no {pipe} pipe")]
    MissingPipe {
        /// Service name.
        name: String,
        /// Which pipe was missing (`stdin`/`stdout`).
        pipe: &'static str,
    },
}

impl ServiceError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ServiceError::Spawn { .. } => "service_spawn",
            ServiceError::LoggerSpawn { .. } => "logger_spawn",
            ServiceError::PipeClosed { .. } => "logger_pipe_closed",
            ServiceError::MissingPipe { .. } => "missing_pipe",
        }
    }
}

/// # Errors produced by a registry backend.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RegistryError {
    /// Reading or writing the backing store failed.
    #[error("registry I/O on {path:?}: {source}")]
    Io {
        /// Backing file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The backing store holds malformed data.
    #[error("registry {path:?} is malformed: {source}")]
    Format {
        /// Backing file.
        path: PathBuf,
        /// Underlying decode error.
        #[source]
        source: serde_json::Error,
    },
}

impl RegistryError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            RegistryError::Io { .. } => "registry_io",
            RegistryError::Format { .. } => "registry_format",
        }
    }
}

/// # Errors produced while loading configuration.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("failed to read config {path:?}: {source}")]
    Read {
        /// Configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for our schema.
    #[error("failed to parse config {path:?}: {source}")]
    Parse {
        /// Configuration file.
        path: PathBuf,
        /// Underlying decode error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of its allowed range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "config_read",
            ConfigError::Parse { .. } => "config_parse",
            ConfigError::Invalid(_) => "config_invalid",
        }
    }
}
