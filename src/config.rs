//! # Daemon configuration.
//!
//! Provides [`Config`], the centralized settings for the svscan runtime.
//!
//! Config is built in two ways:
//! 1. **In code**: `Config::default()` then adjust the public fields (tests, embedding).
//! 2. **From TOML**: [`Config::load`] reads a file with optional sections.
//!
//! ## Example configuration
//! ```toml
//! [service]
//! path = "/service"
//! max_startups = 5
//! restart_wait_secs = 1
//!
//! [logger]
//! binary = "/usr/local/bin/multilog"
//! grace_secs = 2
//!
//! [daemon]
//! tick_secs = 5
//! settle_secs = 1
//! grace_secs = 10
//! registry = "/var/lib/svscan/registry.json"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Global configuration for the svscan runtime.
///
/// ## Field semantics
/// - `service_dir`: root holding one subdirectory per service
/// - `max_startups`: start attempts allowed per supervisor lifetime (min 1)
/// - `restart_wait`: fixed pause between a process exit and the next start
/// - `tick`: reconciliation interval
/// - `settle`: pause before starting a newly discovered service
/// - `logger_bin`: executable invoked as `<logger_bin> -path <service dir>`
/// - `logger_grace`: how long a stopping log pump may drain and flush
/// - `registry_path`: JSON registry file (`None` = in-memory registry)
/// - `grace`: how long shutdown waits for supervisors to finish
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
#[derive(Clone, Debug)]
pub struct Config {
    /// Directory containing one subdirectory per service.
    pub service_dir: PathBuf,

    /// Maximum number of start attempts per supervisor lifetime.
    ///
    /// Once reached, the service gets no further automatic restarts
    /// until the daemon itself restarts.
    pub max_startups: u32,

    /// Fixed delay between a process exit and its restart.
    pub restart_wait: Duration,

    /// Reconciliation tick interval.
    pub tick: Duration,

    /// Delay between claiming a newly discovered service and starting it.
    pub settle: Duration,

    /// Logger sink executable.
    pub logger_bin: PathBuf,

    /// Upper bound for draining output and letting the logger exit on stop.
    pub logger_grace: Duration,

    /// Persisted registry location.
    pub registry_path: Option<PathBuf>,

    /// Maximum time to wait for supervisors to stop on shutdown.
    pub grace: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,
}

impl Config {
    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Loads configuration from a TOML file, falling back to defaults for
    /// every missing key.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg = Self::from_toml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate()?;
        tracing::debug!(
            path = %path.display(),
            service_dir = %cfg.service_dir.display(),
            max_startups = cfg.max_startups,
            "loaded configuration"
        );
        Ok(cfg)
    }

    /// Parses configuration from TOML text without validating it.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        let file: FileConfig = toml::from_str(content)?;
        Ok(file.into())
    }

    /// Rejects values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_startups == 0 {
            return Err(ConfigError::Invalid("max_startups must be at least 1".into()));
        }
        if self.logger_bin.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("logger binary must not be empty".into()));
        }
        if self.tick.is_zero() {
            return Err(ConfigError::Invalid("tick must be greater than zero".into()));
        }
        Ok(())
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `service_dir = /service`
    /// - `max_startups = 5`
    /// - `restart_wait = 1s`, `tick = 5s`, `settle = 1s`
    /// - `logger_bin = multilog`, `logger_grace = 2s`
    /// - `registry_path = None` (in-memory)
    /// - `grace = 10s`, `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            service_dir: PathBuf::from("/service"),
            max_startups: 5,
            restart_wait: Duration::from_secs(1),
            tick: Duration::from_secs(5),
            settle: Duration::from_secs(1),
            logger_bin: PathBuf::from("multilog"),
            logger_grace: Duration::from_secs(2),
            registry_path: None,
            grace: Duration::from_secs(10),
            bus_capacity: 1024,
        }
    }
}

/// On-disk layout of the configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    service: ServiceSection,
    logger: LoggerSection,
    daemon: DaemonSection,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ServiceSection {
    path: PathBuf,
    max_startups: u32,
    restart_wait_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LoggerSection {
    binary: PathBuf,
    grace_secs: u64,
}

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DaemonSection {
    tick_secs: u64,
    settle_secs: u64,
    grace_secs: u64,
    registry: Option<PathBuf>,
    bus_capacity: usize,
}

impl Default for ServiceSection {
    fn default() -> Self {
        let d = Config::default();
        Self {
            path: d.service_dir,
            max_startups: d.max_startups,
            restart_wait_secs: d.restart_wait.as_secs(),
        }
    }
}

impl Default for LoggerSection {
    fn default() -> Self {
        let d = Config::default();
        Self {
            binary: d.logger_bin,
            grace_secs: d.logger_grace.as_secs(),
        }
    }
}

impl Default for DaemonSection {
    fn default() -> Self {
        let d = Config::default();
        Self {
            tick_secs: d.tick.as_secs(),
            settle_secs: d.settle.as_secs(),
            grace_secs: d.grace.as_secs(),
            registry: d.registry_path,
            bus_capacity: d.bus_capacity,
        }
    }
}

impl From<FileConfig> for Config {
    fn from(f: FileConfig) -> Self {
        Self {
            service_dir: f.service.path,
            max_startups: f.service.max_startups,
            restart_wait: Duration::from_secs(f.service.restart_wait_secs),
            tick: Duration::from_secs(f.daemon.tick_secs),
            settle: Duration::from_secs(f.daemon.settle_secs),
            logger_bin: f.logger.binary,
            logger_grace: Duration::from_secs(f.logger.grace_secs),
            registry_path: f.daemon.registry,
            grace: Duration::from_secs(f.daemon.grace_secs),
            bus_capacity: f.daemon.bus_capacity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = Config::from_toml("").unwrap();
        assert_eq!(cfg.service_dir, PathBuf::from("/service"));
        assert_eq!(cfg.max_startups, 5);
        assert_eq!(cfg.tick, Duration::from_secs(5));
        assert_eq!(cfg.settle, Duration::from_secs(1));
        assert!(cfg.registry_path.is_none());
    }

    #[test]
    fn partial_file_overrides_only_given_keys() {
        let cfg = Config::from_toml(
            r#"
[service]
path = "/srv/services"
restart_wait_secs = 7

[daemon]
registry = "/var/lib/svscan/registry.json"
"#,
        )
        .unwrap();
        assert_eq!(cfg.service_dir, PathBuf::from("/srv/services"));
        assert_eq!(cfg.restart_wait, Duration::from_secs(7));
        assert_eq!(cfg.max_startups, 5);
        assert_eq!(
            cfg.registry_path.as_deref(),
            Some(Path::new("/var/lib/svscan/registry.json"))
        );
        assert_eq!(cfg.logger_bin, PathBuf::from("multilog"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(Config::from_toml("[service]\nmax_restarts = 3\n").is_err());
    }

    #[test]
    fn zero_startups_is_invalid() {
        let cfg = Config {
            max_startups: 0,
            ..Config::default()
        };
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.as_label(), "config_invalid");
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert_eq!(err.as_label(), "config_read");
    }

    #[test]
    fn load_reads_file_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("svscan.toml");
        std::fs::write(&path, "[service]\nmax_startups = 2\n").unwrap();
        let cfg = Config::load(&path).unwrap();
        assert_eq!(cfg.max_startups, 2);
    }
}
