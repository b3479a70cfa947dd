// Copyright 2025 BenchDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Error types for store operations.

use std::time::Duration;
use thiserror::Error;

/// Boxed source error carried by storage failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur while reading or writing a benchmark store.
#[derive(Debug, Error)]
pub enum Error {
    /// Repository identifier missing when a configuration write was attempted
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The store lock could not be acquired within the maximum wait
    #[error("Timed out after {waited:?} waiting for lock '{key}'")]
    LockTimeout {
        /// Key of the lock document
        key: String,
        /// How long the caller waited before giving up
        waited: Duration,
    },

    /// A document or store expected to exist was not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Backend read/write failure, surfaced unchanged
    #[error("Storage I/O error on '{key}': {source}")]
    StorageIo {
        /// Key of the document being accessed
        key: String,
        /// Underlying backend error
        #[source]
        source: BoxError,
    },

    /// A persisted document failed to parse or is inconsistent
    #[error("Malformed document '{key}': {reason}")]
    MalformedDocument {
        /// Key of the offending document
        key: String,
        /// What was wrong with it
        reason: String,
    },

    /// The lock holder abandoned its critical section
    #[error("Write cancelled while holding the store lock")]
    Cancelled,

    /// The store location string could not be turned into a backend
    #[error("Invalid store location: {0}")]
    InvalidLocation(String),

    /// A result cannot be stored as given
    #[error("Invalid result '{name}': {reason}")]
    InvalidResult {
        /// Benchmark name of the rejected result
        name: String,
        /// Why it was rejected
        reason: String,
    },
}

impl Error {
    /// Create a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Wrap a backend error for the given key.
    pub fn storage(key: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::StorageIo {
            key: key.into(),
            source: source.into(),
        }
    }

    /// Create a malformed-document error.
    pub fn malformed(key: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::MalformedDocument {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Create an invalid-result error.
    pub fn invalid_result(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidResult {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error is [`Error::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, Error>;
