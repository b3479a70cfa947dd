// Copyright 2025 BenchDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Byte-level storage backends.
//!
//! Every document a store reads or writes goes through [`StorageBackend`].
//! Two implementations are provided:
//!
//! - [`FsBackend`] - keys are relative paths under a local root directory
//! - [`ObjectStoreBackend`] - keys are object names under a bucket prefix
//!
//! # Conditional Writes
//!
//! [`create_exclusive`](StorageBackend::create_exclusive) is the primitive
//! the store lock is built on. It must succeed for exactly one of any number
//! of concurrent callers racing on the same key, across processes and hosts.

use async_trait::async_trait;
use benchdb_core::Result;
use bytes::Bytes;

pub mod fs;
pub mod object;

pub use fs::FsBackend;
pub use object::ObjectStoreBackend;

/// Uniform document storage used by the lock manager and the record store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read a document. Returns [`benchdb_core::Error::NotFound`] if the key does not exist.
    async fn read(&self, key: &str) -> Result<Bytes>;

    /// Write a document, replacing any previous content.
    ///
    /// Readers observe either the old or the new content, never a mix.
    async fn write(&self, key: &str, data: Bytes) -> Result<()>;

    /// Check whether a document exists.
    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete a document. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Create a document only if the key does not already exist.
    ///
    /// Returns `Ok(true)` if this call created it and `Ok(false)` if the key
    /// was already present (nothing is written in that case).
    async fn create_exclusive(&self, key: &str, data: Bytes) -> Result<bool>;
}
