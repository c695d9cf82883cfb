//! # svscan
//!
//! **svscan** keeps a directory of services running.
//!
//! Every non-hidden subdirectory of the service root that contains a `run`
//! executable is a service. The daemon registers it, starts it, restarts it
//! after a fixed delay when it exits (up to a per-lifetime startup cap), and
//! pipes its standard output, line by line, into a logger subprocess. Lines
//! the logger could not accept are buffered and replayed to the next logger.
//!
//! ## Architecture
//! ```text
//!   service root (/service)            registry (memory or JSON file)
//!        │ scan every tick                    ▲ create_missing / services
//!        ▼                                    │
//! ┌───────────────────────────────────────────┴───────────────────────┐
//! │  Reconciler                                                       │
//! │  - new on disk      → claim in RunningSet, settle, ServiceActor   │
//! │  - gone from disk   → evict (cancel token, kill process)          │
//! │  - idle             → relaunch (startup counter preserved)        │
//! └──────┬──────────────────┬──────────────────┬──────────────────────┘
//!        ▼                  ▼                  ▼
//!  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!  │ ServiceActor │   │ ServiceActor │   │ ServiceActor │   start / wait / restart
//!  └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!         ▼ stdout           ▼                  ▼
//!  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!  │   LogPump    │   │   LogPump    │   │   LogPump    │   ──► logger -path <dir>
//!  └──────────────┘   └──────────────┘   └──────────────┘
//!
//!  all of the above ── publish(Event) ──► Bus ──► SubscriberSet ──► LogWriter, ...
//! ```
//!
//! ## Features
//! | Area              | Description                                             | Key types / traits                        |
//! |-------------------|---------------------------------------------------------|-------------------------------------------|
//! | **Supervision**   | Run the daemon, observe and stop it.                    | [`Supervisor`], [`SupervisorBuilder`]     |
//! | **Running set**   | Which services are supervised and in which phase.       | [`RunningSet`], [`Phase`]                 |
//! | **Registry**      | Authoritative service list, in memory or persisted.     | [`Registry`], [`FileRegistry`]            |
//! | **Subscriber API**| Hook into lifecycle events (logging, custom sinks).     | [`Subscribe`], [`LogWriter`]              |
//! | **Errors**        | Typed errors with stable labels.                        | [`RuntimeError`], [`ServiceError`]        |
//! | **Configuration** | Centralized runtime settings, loadable from TOML.       | [`Config`]                                |
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use svscan::{Config, LogWriter, Subscribe, SupervisorBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::default();
//!     cfg.service_dir = "/srv/services".into();
//!     cfg.restart_wait = Duration::from_secs(2);
//!
//!     let subs: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
//!     let sup = SupervisorBuilder::new(cfg).with_subscribers(subs).build();
//!     sup.run().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod core;
mod error;
pub mod events;
pub mod logging;
mod services;
pub mod subscribers;

pub use crate::config::Config;
pub use crate::core::{Phase, RunningSet, Supervision, Supervisor, SupervisorBuilder};
pub use crate::error::{ConfigError, RegistryError, RuntimeError, ServiceError};
pub use crate::events::{Bus, Event, EventKind, Severity};
pub use crate::services::{
    FileRegistry, MemoryRegistry, Registry, Scanner, Service, ServiceDef, ServiceMap,
    ServiceState, RUN_FILE,
};
pub use crate::subscribers::{LogWriter, Subscribe, SubscriberSet};
