//! # Directory scanner.
//!
//! Lists the services present under the service root. A service is a
//! non-hidden subdirectory containing a `run` file.

use std::collections::BTreeSet;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::RuntimeError;
use crate::services::service::RUN_FILE;

/// Reads the service root.
#[derive(Clone, Debug)]
pub struct Scanner {
    root: PathBuf,
}

impl Scanner {
    /// Creates a scanner for `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The scanned directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Makes sure the root exists, creating it if needed.
    ///
    /// Called once at startup; failure is fatal for the daemon.
    pub fn ensure_root(&self) -> Result<(), RuntimeError> {
        if self.root.is_dir() {
            return Ok(());
        }
        let mut builder = std::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            builder.mode(0o755);
        }
        builder
            .create(&self.root)
            .map_err(|source| RuntimeError::ServiceRootUnavailable {
                path: self.root.clone(),
                source,
            })
    }

    /// Returns the sorted set of service names currently on disk.
    pub async fn scan(&self) -> io::Result<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if tokio::fs::metadata(entry.path().join(RUN_FILE)).await.is_ok() {
                names.insert(name);
            }
        }
        Ok(names)
    }

    /// Returns `true` if `name` is still a service on disk.
    pub async fn is_present(&self, name: &str) -> bool {
        tokio::fs::metadata(self.root.join(name).join(RUN_FILE))
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn service(root: &Path, name: &str) {
        fs::create_dir_all(root.join(name)).unwrap();
        fs::write(root.join(name).join(RUN_FILE), "#!/bin/sh\n").unwrap();
    }

    #[tokio::test]
    async fn lists_only_dirs_with_run() {
        let dir = tempfile::tempdir().unwrap();
        service(dir.path(), "svc-b");
        service(dir.path(), "svc-a");
        service(dir.path(), ".hidden");
        fs::create_dir(dir.path().join("no-run")).unwrap();
        fs::write(dir.path().join("stray-file"), "").unwrap();

        let names = Scanner::new(dir.path()).scan().await.unwrap();
        let names: Vec<_> = names.into_iter().collect();
        assert_eq!(names, vec!["svc-a".to_string(), "svc-b".to_string()]);
    }

    #[tokio::test]
    async fn missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = Scanner::new(dir.path().join("gone"));
        assert!(scanner.scan().await.is_err());
    }

    #[tokio::test]
    async fn presence_follows_run_file() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = Scanner::new(dir.path());
        assert!(!scanner.is_present("svc-a").await);
        service(dir.path(), "svc-a");
        assert!(scanner.is_present("svc-a").await);
        fs::remove_dir_all(dir.path().join("svc-a")).unwrap();
        assert!(!scanner.is_present("svc-a").await);
    }

    #[test]
    fn ensure_root_creates_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("a").join("b");
        Scanner::new(&root).ensure_root().unwrap();
        assert!(root.is_dir());
    }

    #[test]
    fn ensure_root_fails_below_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        fs::write(&file, "").unwrap();
        let err = Scanner::new(file.join("service")).ensure_root().unwrap_err();
        assert_eq!(err.as_label(), "runtime_service_root_unavailable");
    }
}
