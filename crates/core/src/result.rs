// Copyright 2025 BenchDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Benchmark result types.
//!
//! A [`BenchmarkResult`] is identified within its bucket by its key: the
//! benchmark name plus the ordered argument pairs. The measured value is not
//! part of the key.

use crate::context::Context;
use serde::{Deserialize, Serialize};

/// One named, optionally parameterized measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    /// Benchmark (function) name.
    pub name: String,
    /// Ordered `(argument name, argument value)` pairs.
    #[serde(default)]
    pub args: Vec<(String, String)>,
    /// Measured value; `None` when the benchmark was skipped or failed.
    #[serde(default)]
    pub value: Option<f64>,
}

impl BenchmarkResult {
    /// Names of the result fields visible to expressions.
    pub const FIELDS: &'static [&'static str] = &["name", "args", "value"];

    /// Create a new result with no arguments.
    pub fn new(name: impl Into<String>, value: impl Into<Option<f64>>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            value: value.into(),
        }
    }

    /// Append an argument pair.
    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.push((name.into(), value.into()));
        self
    }

    /// Look up an argument value by name.
    pub fn arg(&self, name: &str) -> Option<&str> {
        self.args
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Whether `other` has the same `(name, args)` key.
    pub fn same_key(&self, other: &BenchmarkResult) -> bool {
        self.name == other.name && self.args == other.args
    }
}

/// A context paired with its ordered results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    /// The context all results were measured under.
    pub context: Context,
    /// Results in insertion order; keys are unique.
    #[serde(default)]
    pub results: Vec<BenchmarkResult>,
}

impl Bucket {
    /// Create an empty bucket.
    pub fn new(context: Context) -> Self {
        Self {
            context,
            results: Vec::new(),
        }
    }

    /// Insert a result, replacing any result with the same key in place.
    ///
    /// Returns `true` if an existing entry was replaced.
    pub fn upsert(&mut self, result: BenchmarkResult) -> bool {
        match self.results.iter_mut().find(|r| r.same_key(&result)) {
            Some(slot) => {
                *slot = result;
                true
            }
            None => {
                self.results.push(result);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ignores_value() {
        let a = BenchmarkResult::new("bfs", 1.0).with_arg("dataset", "karate");
        let b = BenchmarkResult::new("bfs", None::<f64>).with_arg("dataset", "karate");
        assert!(a.same_key(&b));
        assert_ne!(a, b);
    }

    #[test]
    fn test_key_respects_argument_order() {
        let a = BenchmarkResult::new("bfs", 1.0)
            .with_arg("dataset", "karate")
            .with_arg("start", "0");
        let b = BenchmarkResult::new("bfs", 1.0)
            .with_arg("start", "0")
            .with_arg("dataset", "karate");
        assert!(!a.same_key(&b));
    }

    #[test]
    fn test_upsert_replaces_in_place() {
        let mut bucket = Bucket::new(Context::default());
        assert!(!bucket.upsert(BenchmarkResult::new("a", 1.0)));
        assert!(!bucket.upsert(BenchmarkResult::new("b", 2.0)));
        assert!(!bucket.upsert(BenchmarkResult::new("c", 3.0)));

        assert!(bucket.upsert(BenchmarkResult::new("b", 20.0)));

        let names: Vec<_> = bucket.results.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c"]);
        assert_eq!(bucket.results[1].value, Some(20.0));
    }

    #[test]
    fn test_no_result_serializes_as_null() {
        let json = serde_json::to_value(BenchmarkResult::new("degrees", None::<f64>)).unwrap();
        assert!(json["value"].is_null());
        assert_eq!(json["args"], serde_json::json!([]));
    }

    #[test]
    fn test_arg_lookup() {
        let r = BenchmarkResult::new("sssp", 3.0).with_arg("dataset", "dolphins.csv");
        assert_eq!(r.arg("dataset"), Some("dolphins.csv"));
        assert_eq!(r.arg("missing"), None);
    }
}
