// Copyright 2025 BenchDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Core record types for BenchDB.
//!
//! This crate holds the value types shared by the storage engine and the
//! command-line front-end:
//!
//! - [`Context`] - the environment a set of measurements was taken under
//! - [`BenchmarkResult`] - one named, optionally parameterized measurement
//! - [`Bucket`] - a context paired with its ordered results
//! - [`Configuration`] - repository identity and branch list of a store
//! - [`Error`] - the error kinds surfaced by every store operation
//!
//! # Example
//!
//! ```
//! use benchdb_core::{BenchmarkResult, Bucket, Context};
//!
//! let context = Context {
//!     machine_name: "gpu-box".into(),
//!     commit_hash: "809a1569e8a2ff138cdde4d9c282328be9dcad43".into(),
//!     ..Default::default()
//! };
//!
//! let mut bucket = Bucket::new(context);
//! bucket.upsert(BenchmarkResult::new("pagerank", 3.0).with_arg("dataset", "dolphins.csv"));
//! bucket.upsert(BenchmarkResult::new("pagerank", 2.5).with_arg("dataset", "dolphins.csv"));
//! assert_eq!(bucket.results.len(), 1);
//! ```

#![warn(missing_docs, rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod configuration;
pub mod context;
pub mod error;
pub mod result;

pub use configuration::Configuration;
pub use context::Context;
pub use error::{Error, Result};
pub use result::{BenchmarkResult, Bucket};
