//! # Service registry.
//!
//! The registry is the authoritative `name → ServiceDef` store. The
//! reconciler feeds it the names seen on disk and asks it which services
//! should be supervised.
//!
//! ## Backends
//! - [`MemoryRegistry`]: lives for the daemon's lifetime only
//! - [`FileRegistry`]: persisted as JSON, rewritten atomically (temp file + rename)
//!
//! ## Rules
//! - `create_missing` is idempotent: existing entries are never touched
//! - The supervisor never mutates entries

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::RegistryError;
use crate::services::service::ServiceDef;

/// Snapshot of the registry contents.
pub type ServiceMap = BTreeMap<String, ServiceDef>;

/// Contract for registry backends.
#[async_trait]
pub trait Registry: Send + Sync + 'static {
    /// Returns every registered service.
    async fn services(&self) -> Result<ServiceMap, RegistryError>;

    /// Returns `true` if `name` is registered.
    async fn contains(&self, name: &str) -> Result<bool, RegistryError> {
        Ok(self.services().await?.contains_key(name))
    }

    /// Registers every name in `on_disk` that is not yet known, located under `root`.
    ///
    /// Returns the names that were added.
    async fn create_missing(
        &self,
        on_disk: &BTreeSet<String>,
        root: &Path,
    ) -> Result<Vec<String>, RegistryError>;
}

/// Adds entries for unknown names; returns what was added.
fn merge_missing(map: &mut ServiceMap, on_disk: &BTreeSet<String>, root: &Path) -> Vec<String> {
    let mut added = Vec::new();
    for name in on_disk {
        if !map.contains_key(name) {
            map.insert(name.clone(), ServiceDef::under(root, name));
            added.push(name.clone());
        }
    }
    added
}

/// In-memory registry.
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    services: RwLock<ServiceMap>,
}

impl MemoryRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes an entry; the daemon itself never does this.
    pub async fn remove(&self, name: &str) -> Option<ServiceDef> {
        self.services.write().await.remove(name)
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn services(&self) -> Result<ServiceMap, RegistryError> {
        Ok(self.services.read().await.clone())
    }

    async fn contains(&self, name: &str) -> Result<bool, RegistryError> {
        Ok(self.services.read().await.contains_key(name))
    }

    async fn create_missing(
        &self,
        on_disk: &BTreeSet<String>,
        root: &Path,
    ) -> Result<Vec<String>, RegistryError> {
        let mut map = self.services.write().await;
        Ok(merge_missing(&mut map, on_disk, root))
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryFile {
    services: ServiceMap,
}

/// JSON-file registry.
///
/// The file is read on every call so external edits (manual removal of an
/// entry) are honoured on the next tick.
#[derive(Debug)]
pub struct FileRegistry {
    path: PathBuf,
    write_lock: tokio::sync::Mutex<()>,
}

impl FileRegistry {
    /// Opens (lazily) the registry stored at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<ServiceMap, RegistryError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ServiceMap::new()),
            Err(source) => {
                return Err(RegistryError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let file: RegistryFile =
            serde_json::from_slice(&raw).map_err(|source| RegistryError::Format {
                path: self.path.clone(),
                source,
            })?;
        let mut map = file.services;
        for (name, def) in map.iter_mut() {
            def.name = name.clone();
        }
        Ok(map)
    }

    async fn store(&self, services: ServiceMap) -> Result<(), RegistryError> {
        let io_err = |source| RegistryError::Io {
            path: self.path.clone(),
            source,
        };
        let body = serde_json::to_vec_pretty(&RegistryFile { services }).map_err(|source| {
            RegistryError::Format {
                path: self.path.clone(),
                source,
            }
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &self.path).await.map_err(io_err)
    }
}

#[async_trait]
impl Registry for FileRegistry {
    async fn services(&self) -> Result<ServiceMap, RegistryError> {
        self.load().await
    }

    async fn create_missing(
        &self,
        on_disk: &BTreeSet<String>,
        root: &Path,
    ) -> Result<Vec<String>, RegistryError> {
        let _guard = self.write_lock.lock().await;
        let mut map = self.load().await?;
        let added = merge_missing(&mut map, on_disk, root);
        if !added.is_empty() {
            self.store(map).await?;
        }
        Ok(added)
    }
}
