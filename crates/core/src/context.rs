// Copyright 2025 BenchDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Execution context of a benchmark run.

use serde::{Deserialize, Serialize};

/// The environment a set of measurements was taken under.
///
/// A context is the key of a [`crate::Bucket`]: two contexts are the same
/// bucket only when every field matches by value. Fields not known to the
/// caller stay empty (or zero for `commit_time`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct Context {
    /// Name of the machine the benchmarks ran on.
    pub machine_name: String,
    /// Toolkit / runtime version (e.g. a CUDA version).
    pub toolkit_version: String,
    /// Operating system type.
    pub os_type: String,
    /// Language runtime version.
    pub language_version: String,
    /// Commit hash of the code under test.
    pub commit_hash: String,
    /// Commit time as a Unix timestamp in seconds.
    pub commit_time: i64,
    /// Branch the commit belongs to.
    pub branch: String,
    /// Accelerator (GPU) type.
    pub accelerator_type: String,
    /// CPU type.
    pub cpu_type: String,
    /// Machine architecture.
    pub arch: String,
    /// Memory size.
    pub ram: String,
}

impl Context {
    /// Names of every context field, in declaration order.
    pub const FIELDS: &'static [&'static str] = &[
        "machine_name",
        "toolkit_version",
        "os_type",
        "language_version",
        "commit_hash",
        "commit_time",
        "branch",
        "accelerator_type",
        "cpu_type",
        "arch",
        "ram",
    ];

    /// First eight characters of the commit hash.
    pub fn short_commit(&self) -> &str {
        match self.commit_hash.char_indices().nth(8) {
            Some((idx, _)) => &self.commit_hash[..idx],
            None => &self.commit_hash,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equality_is_by_value() {
        let a = Context {
            machine_name: "m".into(),
            toolkit_version: "9.2".into(),
            ..Default::default()
        };
        let mut b = a.clone();
        assert_eq!(a, b);

        b.toolkit_version = "10.1".into();
        assert_ne!(a, b);
    }

    #[test]
    fn test_short_commit() {
        let ctx = Context {
            commit_hash: "809a1569e8a2ff138cdde4d9c282328be9dcad43".into(),
            ..Default::default()
        };
        assert_eq!(ctx.short_commit(), "809a1569");
        assert_eq!(Context::default().short_commit(), "");
    }

    #[test]
    fn test_missing_fields_deserialize_to_defaults() {
        let ctx: Context = serde_json::from_str(r#"{"machine_name": "m"}"#).unwrap();
        assert_eq!(ctx.machine_name, "m");
        assert_eq!(ctx.commit_time, 0);
        assert!(ctx.branch.is_empty());
    }
}
