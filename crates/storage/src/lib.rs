// Copyright 2025 BenchDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Concurrency-safe storage engine for BenchDB.
//!
//! A store is a set of JSON documents under one location, either a local
//! directory or a bucket prefix in object storage. Any number of writers, in
//! any number of processes or hosts, may add results to the same location:
//! every write happens under a store-wide lock built on exclusive document
//! creation, and every document is replaced atomically so readers never see
//! a torn write.
//!
//! # Components
//!
//! - [`backend`] - byte-level document I/O over the filesystem or object storage
//! - [`lock`] - the store lock, with bounded polling and cooperative cancellation
//! - [`records`] - the persisted document layout and merge rules
//! - [`BenchDb`] - the facade composing all of the above
//!
//! # Example
//!
//! ```no_run
//! use benchdb_core::{BenchmarkResult, Context};
//! use benchdb_storage::{BenchDb, StoreOptions};
//!
//! # async fn run() -> benchdb_core::Result<()> {
//! let db = BenchDb::open_with_options("s3://my-bucket/asvdb", StoreOptions::from_env()?)?
//!     .with_repo("https://github.com/rapidsai/cugraph")
//!     .with_branches(["branch-0.14"]);
//!
//! let context = Context {
//!     machine_name: "gpu-box".into(),
//!     toolkit_version: "10.1".into(),
//!     ..Default::default()
//! };
//! db.add_results(
//!     &context,
//!     [
//!         BenchmarkResult::new("bfs", 0.4).with_arg("dataset", "karate.csv"),
//!         BenchmarkResult::new("bfs", 1.9).with_arg("dataset", "dolphins.csv"),
//!     ],
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs, rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod backend;
pub mod db;
pub mod location;
pub mod lock;
pub mod options;
pub mod records;

pub use backend::{FsBackend, ObjectStoreBackend, StorageBackend};
pub use db::BenchDb;
pub use location::StoreLocation;
pub use lock::{LockGuard, LockManager, LockSentinel};
pub use options::StoreOptions;
pub use records::{BenchmarkInfo, Registry};
