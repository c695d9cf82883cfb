//! Helpers shared by the runtime unit tests.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};

use crate::config::Config;
use crate::core::context::Context;
use crate::core::running::RunningSet;
use crate::events::{Bus, Event};
use crate::services::{MemoryRegistry, Service, ServiceDef, RUN_FILE};

/// Writes an executable script at `dir/name`.
pub fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, body).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
    path
}

/// Creates `root/name` with an executable `run`.
pub fn install(root: &Path, name: &str, body: &str) -> PathBuf {
    let dir = root.join(name);
    std::fs::create_dir_all(&dir).unwrap();
    script(&dir, RUN_FILE, body);
    dir
}

/// A fresh service record for `root/name`; the directory is created.
pub fn service_in(root: &Path, name: &str) -> Arc<Service> {
    std::fs::create_dir_all(root.join(name)).unwrap();
    Arc::new(Service::new(ServiceDef::under(root, name)))
}

pub fn context(cfg: Config) -> Context {
    Context::new(
        Arc::new(cfg),
        Bus::new(1024),
        Arc::new(MemoryRegistry::new()),
        RunningSet::spawn(),
    )
}

/// Lines written by the test logger, or nothing if it never wrote.
pub fn read_log(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .map(|s| s.lines().map(String::from).collect())
        .unwrap_or_default()
}

/// Receives until `pred` matches; panics after five seconds.
pub async fn wait_for(rx: &mut broadcast::Receiver<Event>, pred: impl Fn(&Event) -> bool) -> Event {
    let found = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(ev) if pred(&ev) => return ev,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => panic!("bus closed"),
            }
        }
    })
    .await;
    found.expect("timed out waiting for event")
}
