//! svscan - keeps every service under a directory running.
//!
//! Each subdirectory of the service root holding a `run` executable is
//! started, restarted after it exits (up to a startup cap) and paired with
//! a logger subprocess that receives its output.
//!
//! See `svscan --help` for usage.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;

use svscan::logging::{init_logging, LogConfig, LogFormat};
use svscan::{Config, LogWriter, RuntimeError, Subscribe, SupervisorBuilder};

const EXIT_FAILURE: u8 = 1;
const EXIT_ROOT_UNAVAILABLE: u8 = 1;
const EXIT_CONFIG: u8 = 2;
const EXIT_GRACE_EXCEEDED: u8 = 3;

#[derive(Parser, Debug)]
#[command(name = "svscan")]
#[command(version)]
#[command(about = "Supervise every service found under a directory")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Service directory (overrides the configuration file)
    #[arg(short, long, value_name = "DIR")]
    path: Option<PathBuf>,

    /// Diagnostic log format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut cfg = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(dir) = &cli.path {
        cfg.service_dir.clone_from(dir);
    }
    cfg.validate().context("validating configuration")?;
    Ok(cfg)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&LogConfig::default().format(cli.log_format));

    let cfg = match load_config(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("svscan: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };
    tracing::info!(
        service_dir = %cfg.service_dir.display(),
        logger = %cfg.logger_bin.display(),
        max_startups = cfg.max_startups,
        "svscan starting"
    );

    let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let sup = SupervisorBuilder::new(cfg).with_subscribers(subs).build();

    match sup.run().await {
        Ok(()) => {
            tracing::info!("all services stopped");
            ExitCode::SUCCESS
        }
        Err(e) => ExitCode::from(report(&e)),
    }
}

/// Logs a fatal runtime error and picks the process exit code for it.
fn report(e: &RuntimeError) -> u8 {
    match e {
        RuntimeError::ServiceRootUnavailable { .. } => {
            tracing::error!(label = e.as_label(), error = %e, "service directory unavailable");
            EXIT_ROOT_UNAVAILABLE
        }
        RuntimeError::GraceExceeded { .. } => {
            tracing::error!(label = e.as_label(), error = %e, "shutdown incomplete");
            EXIT_GRACE_EXCEEDED
        }
        _ => {
            tracing::error!(label = e.as_label(), error = %e, "svscan failed");
            EXIT_FAILURE
        }
    }
}
