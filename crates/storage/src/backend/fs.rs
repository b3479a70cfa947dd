// Copyright 2025 BenchDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Local filesystem backend.
//!
//! Writes go to a uniquely named temporary file in the target directory and
//! are then renamed into place, so readers never see a partial document.
//! Exclusive creation hard-links a fully written temporary file to the target
//! name, which fails atomically when the target already exists.

use super::StorageBackend;
use async_trait::async_trait;
use benchdb_core::{Error, Result};
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

/// Stores documents as files under a root directory.
///
/// The root (and any intermediate directories) is created on first write.
#[derive(Debug, Clone)]
pub struct FsBackend {
    root: PathBuf,
}

impl FsBackend {
    /// Create a backend rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        key.split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |path, segment| path.join(segment))
    }

    async fn ensure_parent(&self, key: &str, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::storage(key, e))?;
        }
        Ok(())
    }

    /// Write `data` to a fresh temporary file next to `path` and return its path.
    async fn write_temp(&self, key: &str, path: &Path, data: &[u8]) -> Result<PathBuf> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let temp = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()));

        let written = async {
            let mut file = fs::File::create(&temp).await?;
            file.write_all(data).await?;
            file.sync_all().await
        }
        .await;

        match written {
            Ok(()) => Ok(temp),
            Err(e) => {
                let _ = fs::remove_file(&temp).await;
                Err(Error::storage(key, e))
            }
        }
    }
}

#[async_trait]
impl StorageBackend for FsBackend {
    async fn read(&self, key: &str) -> Result<Bytes> {
        match fs::read(self.path_for(key)).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(Error::not_found(key)),
            Err(e) => Err(Error::storage(key, e)),
        }
    }

    async fn write(&self, key: &str, data: Bytes) -> Result<()> {
        let path = self.path_for(key);
        self.ensure_parent(key, &path).await?;
        let temp = self.write_temp(key, &path, &data).await?;

        if let Err(e) = fs::rename(&temp, &path).await {
            let _ = fs::remove_file(&temp).await;
            return Err(Error::storage(key, e));
        }
        debug!(key, bytes = data.len(), "Document written");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        fs::try_exists(self.path_for(key))
            .await
            .map_err(|e| Error::storage(key, e))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::storage(key, e)),
        }
    }

    async fn create_exclusive(&self, key: &str, data: Bytes) -> Result<bool> {
        let path = self.path_for(key);
        self.ensure_parent(key, &path).await?;
        let temp = self.write_temp(key, &path, &data).await?;

        let linked = fs::hard_link(&temp, &path).await;
        let _ = fs::remove_file(&temp).await;

        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(Error::storage(key, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("does_not_exist");
        let backend = FsBackend::new(&root);

        backend
            .write("results/machine/doc.json", Bytes::from_static(b"{}"))
            .await
            .unwrap();

        assert!(root.join("results").join("machine").join("doc.json").is_file());
        assert_eq!(
            backend.read("results/machine/doc.json").await.unwrap(),
            Bytes::from_static(b"{}")
        );
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        let err = backend.read("asv.conf.json").await.unwrap_err();
        assert!(err.is_not_found());
        assert!(!backend.exists("asv.conf.json").await.unwrap());
    }

    #[tokio::test]
    async fn test_write_overwrites_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());

        backend.write("doc.json", Bytes::from_static(b"one")).await.unwrap();
        backend.write("doc.json", Bytes::from_static(b"two")).await.unwrap();

        assert_eq!(backend.read("doc.json").await.unwrap(), Bytes::from_static(b"two"));
        let entries: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries, ["doc.json"]);
    }

    #[tokio::test]
    async fn test_create_exclusive_only_once() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path().join("store"));

        assert!(backend
            .create_exclusive(".benchdb.lock", Bytes::from_static(b"first"))
            .await
            .unwrap());
        assert!(!backend
            .create_exclusive(".benchdb.lock", Bytes::from_static(b"second"))
            .await
            .unwrap());
        assert_eq!(
            backend.read(".benchdb.lock").await.unwrap(),
            Bytes::from_static(b"first")
        );

        backend.delete(".benchdb.lock").await.unwrap();
        assert!(backend
            .create_exclusive(".benchdb.lock", Bytes::from_static(b"third"))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        backend.delete("nothing-here").await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_create_exclusive_has_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_path_buf();

        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let backend = FsBackend::new(&root);
                tokio::spawn(async move {
                    backend
                        .create_exclusive("lock", Bytes::from(format!("{i}")))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut winners = 0;
        for task in tasks {
            if task.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }
}
