// Copyright 2025 BenchDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Store location parsing and backend selection.

use crate::backend::{FsBackend, ObjectStoreBackend, StorageBackend};
use benchdb_core::{Error, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

/// URI schemes that select the object storage backend.
pub const OBJECT_STORE_SCHEMES: &[&str] = &[
    "s3", "s3a", "gs", "az", "adl", "azure", "abfs", "abfss", "memory",
];

/// Where a store lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreLocation {
    /// A directory on the local filesystem.
    Filesystem(PathBuf),
    /// A bucket prefix addressed as `scheme://bucket/prefix`.
    ObjectStore(Url),
}

impl StoreLocation {
    /// Parse a location string.
    ///
    /// A recognized object-storage scheme selects [`StoreLocation::ObjectStore`];
    /// `file://` URLs and plain paths select [`StoreLocation::Filesystem`].
    pub fn parse(location: &str) -> Result<Self> {
        let location = location.trim();
        if location.is_empty() {
            return Err(Error::InvalidLocation("empty location".to_string()));
        }

        let Some((scheme, rest)) = location.split_once("://") else {
            return Ok(Self::Filesystem(PathBuf::from(location)));
        };

        let scheme = scheme.to_ascii_lowercase();
        if scheme == "file" {
            return Ok(Self::Filesystem(PathBuf::from(rest)));
        }
        if OBJECT_STORE_SCHEMES.contains(&scheme.as_str()) {
            let url = Url::parse(location)
                .map_err(|e| Error::InvalidLocation(format!("{location}: {e}")))?;
            return Ok(Self::ObjectStore(url));
        }

        Err(Error::InvalidLocation(format!(
            "unsupported scheme '{scheme}' in {location}"
        )))
    }

    /// Construct the backend for this location.
    pub fn open_backend(&self) -> Result<Arc<dyn StorageBackend>> {
        match self {
            Self::Filesystem(path) => Ok(Arc::new(FsBackend::new(path.clone()))),
            Self::ObjectStore(url) => Ok(Arc::new(ObjectStoreBackend::from_url(url)?)),
        }
    }

    /// Whether this location is backed by object storage.
    pub fn is_object_store(&self) -> bool {
        matches!(self, Self::ObjectStore(_))
    }
}

impl fmt::Display for StoreLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Filesystem(path) => write!(f, "{}", path.display()),
            Self::ObjectStore(url) => write!(f, "{url}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_path_is_filesystem() {
        assert_eq!(
            StoreLocation::parse("/tmp/asv").unwrap(),
            StoreLocation::Filesystem(PathBuf::from("/tmp/asv"))
        );
        assert_eq!(
            StoreLocation::parse("relative/dir").unwrap(),
            StoreLocation::Filesystem(PathBuf::from("relative/dir"))
        );
    }

    #[test]
    fn test_file_url_is_filesystem() {
        assert_eq!(
            StoreLocation::parse("file:///var/asv").unwrap(),
            StoreLocation::Filesystem(PathBuf::from("/var/asv"))
        );
    }

    #[test]
    fn test_bucket_uri_is_object_store() {
        let location = StoreLocation::parse("s3://gpuci-cache-testing/asvdb").unwrap();
        assert!(location.is_object_store());
        assert_eq!(location.to_string(), "s3://gpuci-cache-testing/asvdb");
    }

    #[test]
    fn test_unknown_scheme_rejected() {
        assert!(matches!(
            StoreLocation::parse("ftp://host/dir"),
            Err(Error::InvalidLocation(_))
        ));
        assert!(StoreLocation::parse("   ").is_err());
    }

    #[tokio::test]
    async fn test_memory_location_opens_backend() {
        let location = StoreLocation::parse("memory:///asvdb").unwrap();
        let backend = location.open_backend().unwrap();
        assert!(!backend.exists("asv.conf.json").await.unwrap());
    }
}
