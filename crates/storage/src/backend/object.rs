// Copyright 2025 BenchDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Object storage backend.
//!
//! Built on the `object_store` crate, so the same code path serves S3, GCS,
//! Azure Blob Storage and the in-memory store used in tests. Each document is
//! a single object written with one PUT; exclusive creation uses a
//! create-only conditional PUT.

use super::StorageBackend;
use async_trait::async_trait;
use benchdb_core::{Error, Result};
use bytes::Bytes;
use object_store::path::Path;
use object_store::{ObjectStore, PutMode, PutPayload};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Stores documents as objects under a key prefix of a bucket.
#[derive(Debug, Clone)]
pub struct ObjectStoreBackend {
    store: Arc<dyn ObjectStore>,
    prefix: String,
}

impl ObjectStoreBackend {
    /// Wrap an existing object store, placing every key under `prefix`.
    pub fn new(store: Arc<dyn ObjectStore>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_matches('/').to_string();
        Self { store, prefix }
    }

    /// Build a backend from a `scheme://bucket/prefix` URL.
    ///
    /// Credentials and region are taken from the environment variables the
    /// `object_store` builders understand (`AWS_*`, `GOOGLE_*`, `AZURE_*`).
    /// S3 is configured for ETag-based conditional puts so that exclusive
    /// creation is honoured.
    pub fn from_url(url: &Url) -> Result<Self> {
        let mut options: Vec<(String, String)> = std::env::vars()
            .filter(|(k, _)| {
                k.starts_with("AWS_") || k.starts_with("GOOGLE_") || k.starts_with("AZURE_")
            })
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        if matches!(url.scheme(), "s3" | "s3a") {
            options.push(("aws_conditional_put".to_string(), "etag".to_string()));
        }

        let (store, prefix) = object_store::parse_url_opts(url, options)
            .map_err(|e| Error::InvalidLocation(format!("{url}: {e}")))?;
        Ok(Self::new(Arc::from(store), prefix.to_string()))
    }

    /// The key prefix all documents live under.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn location(&self, key: &str) -> Path {
        if self.prefix.is_empty() {
            Path::from(key)
        } else {
            Path::from(format!("{}/{}", self.prefix, key))
        }
    }
}

#[async_trait]
impl StorageBackend for ObjectStoreBackend {
    async fn read(&self, key: &str) -> Result<Bytes> {
        let location = self.location(key);
        let fetched = match self.store.get(&location).await {
            Ok(fetched) => fetched,
            Err(object_store::Error::NotFound { .. }) => return Err(Error::not_found(key)),
            Err(e) => return Err(Error::storage(key, e)),
        };
        fetched.bytes().await.map_err(|e| Error::storage(key, e))
    }

    async fn write(&self, key: &str, data: Bytes) -> Result<()> {
        let len = data.len();
        self.store
            .put(&self.location(key), PutPayload::from(data))
            .await
            .map_err(|e| Error::storage(key, e))?;
        debug!(key, bytes = len, "Object written");
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        match self.store.head(&self.location(key)).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(Error::storage(key, e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self.store.delete(&self.location(key)).await {
            Ok(()) | Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(Error::storage(key, e)),
        }
    }

    async fn create_exclusive(&self, key: &str, data: Bytes) -> Result<bool> {
        let result = self
            .store
            .put_opts(&self.location(key), PutPayload::from(data), PutMode::Create.into())
            .await;
        match result {
            Ok(_) => Ok(true),
            Err(object_store::Error::AlreadyExists { .. })
            | Err(object_store::Error::Precondition { .. }) => Ok(false),
            Err(e) => Err(Error::storage(key, e)),
        }
    }
}
