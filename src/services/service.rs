//! # Service definitions and per-service runtime state.
//!
//! - [`ServiceDef`] is what the registry stores: a name and its directory.
//! - [`Service`] is one supervised unit: the definition plus mutable runtime
//!   state behind a single per-service guard.
//!
//! ## Rules
//! - At most one live process and one live logger per service
//! - `startups` only grows, and only within this `Service`'s lifetime
//! - `pending` lines keep arrival order and drain from the front

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

/// Name of the executable every service directory must contain.
pub const RUN_FILE: &str = "run";

static SERVICE_ID: AtomicU64 = AtomicU64::new(1);

/// Registry entry for one service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDef {
    /// Unique name (the directory name).
    #[serde(skip)]
    pub name: String,
    /// Service directory; `run` lives inside and is started with it as cwd.
    pub path: PathBuf,
}

impl ServiceDef {
    /// Creates a definition for `name` living under `root`.
    pub fn under(root: &Path, name: &str) -> Self {
        Self {
            name: name.to_string(),
            path: root.join(name),
        }
    }

    /// The same service located under `root`, whatever root it was recorded under.
    pub fn rebased(&self, root: &Path) -> Self {
        Self::under(root, &self.name)
    }

    /// Path of the `run` executable.
    pub fn run_path(&self) -> PathBuf {
        self.path.join(RUN_FILE)
    }
}

/// Mutable runtime state of a service, guarded by [`Service::lock`].
#[derive(Debug, Default)]
pub struct ServiceState {
    /// Pid of the live service process.
    pub process: Option<u32>,
    /// Pid of the live logger subprocess.
    pub logger: Option<u32>,
    /// Start attempts made by this supervisor.
    pub startups: u32,
    /// Output lines not yet accepted by any logger.
    pub pending: VecDeque<String>,
}

/// One supervised unit.
#[derive(Debug)]
pub struct Service {
    id: u64,
    def: ServiceDef,
    state: Mutex<ServiceState>,
}

impl Service {
    /// Creates a fresh service with zero startups and an empty buffer.
    pub fn new(def: ServiceDef) -> Self {
        Self {
            id: SERVICE_ID.fetch_add(1, Ordering::Relaxed),
            def,
            state: Mutex::new(ServiceState::default()),
        }
    }

    /// Process-unique id; distinguishes a re-created service from its predecessor.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Service name.
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Service directory.
    pub fn path(&self) -> &Path {
        &self.def.path
    }

    /// Registry definition.
    pub fn def(&self) -> &ServiceDef {
        &self.def
    }

    /// Acquires the per-service guard.
    pub async fn lock(&self) -> MutexGuard<'_, ServiceState> {
        self.state.lock().await
    }

    /// Current startup count.
    pub async fn startups(&self) -> u32 {
        self.state.lock().await.startups
    }

    /// Pid of the live service process, if any.
    pub async fn process(&self) -> Option<u32> {
        self.state.lock().await.process
    }

    /// Pid of the live logger, if any.
    pub async fn logger(&self) -> Option<u32> {
        self.state.lock().await.logger
    }

    /// Number of buffered, undelivered lines.
    pub async fn pending_lines(&self) -> usize {
        self.state.lock().await.pending.len()
    }
}
