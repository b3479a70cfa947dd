// Copyright 2025 BenchDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Persisted document layout and merge logic.
//!
//! # Layout
//!
//! ```text
//! <root>/
//!   asv.conf.json                         configuration
//!   results/
//!     benchmarks.json                     registry of benchmark names
//!     index.json                          result document keys, bucket order
//!     <machine>/machine.json              per-machine description
//!     <machine>/<commit>-<digest>.json    one bucket
//! ```
//!
//! Every document is written with a single atomic backend write. A save
//! writes result documents first, then machine documents, the registry and
//! finally the index, so the index never names a document that does not
//! exist yet.

use crate::backend::StorageBackend;
use benchdb_core::configuration::VCS_SUFFIX;
use benchdb_core::{BenchmarkResult, Bucket, Configuration, Context, Error, Result};
use bytes::Bytes;
use futures::future::try_join_all;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Key of the configuration document.
pub const CONFIG_KEY: &str = "asv.conf.json";

/// Directory holding every result-related document.
pub const RESULTS_DIR: &str = "results";

/// Key of the registry document.
pub const REGISTRY_KEY: &str = "results/benchmarks.json";

/// Key of the result index document.
pub const INDEX_KEY: &str = "results/index.json";

const CONFIG_VERSION: u32 = 1;
const REGISTRY_VERSION: u32 = 2;
const INDEX_VERSION: u32 = 1;
const RESULT_VERSION: u32 = 1;
const MACHINE_VERSION: u32 = 1;

/// Descriptive metadata for one benchmark name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkInfo {
    /// Benchmark name.
    pub name: String,
    /// Argument names seen for this benchmark, in first-seen order.
    #[serde(default)]
    pub param_names: Vec<String>,
    /// For each argument name, the values seen, in first-seen order.
    #[serde(default)]
    pub params: Vec<Vec<String>>,
    /// Benchmark type.
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    /// Unit of the measured value.
    #[serde(default = "default_unit")]
    pub unit: String,
}

fn default_kind() -> String {
    "time".to_string()
}

fn default_unit() -> String {
    "seconds".to_string()
}

/// Every benchmark name ever written, with its metadata.
pub type Registry = BTreeMap<String, BenchmarkInfo>;

#[derive(Debug, Serialize, Deserialize)]
struct ConfigDocument {
    version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    project_url: Option<String>,
    repo: String,
    #[serde(default)]
    branches: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    show_commit_url: Option<String>,
    #[serde(default = "default_results_dir")]
    results_dir: String,
    #[serde(default = "default_html_dir")]
    html_dir: String,
}

fn default_results_dir() -> String {
    RESULTS_DIR.to_string()
}

fn default_html_dir() -> String {
    "html".to_string()
}

// Benchmark names sit at the top level next to `version`.
#[derive(Debug, Serialize, Deserialize)]
struct RegistryDocument {
    version: u32,
    #[serde(flatten)]
    benchmarks: Registry,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct IndexDocument {
    version: u32,
    #[serde(default)]
    documents: Vec<String>,
}

#[derive(Debug, Serialize)]
struct ResultDocumentRef<'a> {
    version: u32,
    context: &'a Context,
    results: &'a [BenchmarkResult],
}

#[derive(Debug, Deserialize)]
struct ResultDocument {
    context: Context,
    #[serde(default)]
    results: Vec<BenchmarkResult>,
}

#[derive(Debug, Serialize)]
struct MachineDocument<'a> {
    version: u32,
    machine: &'a str,
    arch: &'a str,
    cpu: &'a str,
    os: &'a str,
    ram: &'a str,
    gpu: &'a str,
}

/// Reads and writes the documents of one store.
#[derive(Clone)]
pub struct RecordStore {
    backend: Arc<dyn StorageBackend>,
}

impl RecordStore {
    /// Create a record store over `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Whether a configuration or result index exists at this location.
    pub async fn exists(&self) -> Result<bool> {
        Ok(self.backend.exists(CONFIG_KEY).await? || self.backend.exists(INDEX_KEY).await?)
    }

    /// Load the configuration, or `None` if it was never written.
    pub async fn load_configuration(&self) -> Result<Option<Configuration>> {
        let Some(doc) = self.read_json::<ConfigDocument>(CONFIG_KEY).await? else {
            return Ok(None);
        };
        Ok(Some(Configuration {
            repo: Some(doc.repo),
            branches: doc.branches,
            project_name: doc.project,
            commit_url: doc.show_commit_url,
        }))
    }

    /// Write the configuration document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] if `config` has no repository.
    pub async fn save_configuration(&self, config: &Configuration) -> Result<()> {
        let repo = config
            .repo
            .clone()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| Error::configuration("cannot write configuration without a repository"))?;
        let doc = ConfigDocument {
            version: CONFIG_VERSION,
            project: config.project_name.clone(),
            project_url: project_url(&repo),
            repo,
            branches: config.branches.clone(),
            show_commit_url: config.commit_url.clone(),
            results_dir: default_results_dir(),
            html_dir: default_html_dir(),
        };
        self.write_json(CONFIG_KEY, &doc).await
    }

    /// Load the registry; empty if it was never written.
    pub async fn load_registry(&self) -> Result<Registry> {
        Ok(self
            .read_json::<RegistryDocument>(REGISTRY_KEY)
            .await?
            .map(|doc| doc.benchmarks)
            .unwrap_or_default())
    }

    /// Load every bucket in insertion order.
    pub async fn load_buckets(&self) -> Result<Vec<Bucket>> {
        let index = self
            .read_json::<IndexDocument>(INDEX_KEY)
            .await?
            .unwrap_or_default();

        try_join_all(index.documents.iter().map(|key| self.load_bucket(key))).await
    }

    async fn load_bucket(&self, key: &str) -> Result<Bucket> {
        let doc = self
            .read_json::<ResultDocument>(key)
            .await?
            .ok_or_else(|| Error::malformed(INDEX_KEY, format!("references missing document '{key}'")))?;
        Ok(Bucket {
            context: doc.context,
            results: doc.results,
        })
    }

    /// Persist the buckets at `touched` indices along with the registry and index.
    ///
    /// Untouched buckets are only referenced from the rewritten index.
    pub async fn save_buckets(
        &self,
        buckets: &[Bucket],
        touched: &[usize],
        registry: &Registry,
    ) -> Result<()> {
        let mut machines: Vec<&Context> = Vec::new();
        for &idx in touched {
            let Some(bucket) = buckets.get(idx) else {
                continue;
            };
            let key = result_document_key(&bucket.context)?;
            let doc = ResultDocumentRef {
                version: RESULT_VERSION,
                context: &bucket.context,
                results: &bucket.results,
            };
            self.write_json(&key, &doc).await?;
            debug!(key = %key, results = bucket.results.len(), "Bucket saved");

            if !machines.iter().any(|c| c.machine_name == bucket.context.machine_name) {
                machines.push(&bucket.context);
            }
        }

        for context in machines {
            let doc = MachineDocument {
                version: MACHINE_VERSION,
                machine: &context.machine_name,
                arch: &context.arch,
                cpu: &context.cpu_type,
                os: &context.os_type,
                ram: &context.ram,
                gpu: &context.accelerator_type,
            };
            self.write_json(&machine_document_key(&context.machine_name), &doc)
                .await?;
        }

        let registry_doc = RegistryDocument {
            version: REGISTRY_VERSION,
            benchmarks: registry.clone(),
        };
        self.write_json(REGISTRY_KEY, &registry_doc).await?;

        let index = IndexDocument {
            version: INDEX_VERSION,
            documents: buckets
                .iter()
                .map(|b| result_document_key(&b.context))
                .collect::<Result<_>>()?,
        };
        self.write_json(INDEX_KEY, &index).await
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.backend.read(key).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| Error::malformed(key, e)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let body = serde_json::to_vec_pretty(value).map_err(|e| Error::malformed(key, e))?;
        self.backend.write(key, Bytes::from(body)).await
    }
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore").finish_non_exhaustive()
    }
}

/// Browsable URL of a repository, when it is addressed over HTTP.
fn project_url(repo: &str) -> Option<String> {
    if repo.starts_with("https://") || repo.starts_with("http://") {
        Some(repo.trim_end_matches(VCS_SUFFIX).to_string())
    } else {
        None
    }
}

/// Fold `result` into the bucket for `context`, creating the bucket if needed.
///
/// New buckets are appended; a result whose key already exists in the bucket
/// replaces it at the same position. Returns the index of the bucket.
pub fn merge_result(buckets: &mut Vec<Bucket>, context: &Context, result: BenchmarkResult) -> usize {
    let idx = match buckets.iter().position(|b| &b.context == context) {
        Some(idx) => idx,
        None => {
            buckets.push(Bucket::new(context.clone()));
            buckets.len() - 1
        }
    };
    buckets[idx].upsert(result);
    idx
}

/// Benchmark names that collide with registry document fields.
pub const RESERVED_NAMES: &[&str] = &["version"];

/// Check that `result` can be persisted and read back unchanged.
///
/// # Errors
///
/// Returns [`Error::InvalidResult`] for a reserved benchmark name or a
/// non-finite value.
pub fn validate_result(result: &BenchmarkResult) -> Result<()> {
    if RESERVED_NAMES.contains(&result.name.as_str()) {
        return Err(Error::invalid_result(
            &result.name,
            "name is reserved by the benchmark registry",
        ));
    }
    if let Some(value) = result.value.filter(|v| !v.is_finite()) {
        return Err(Error::invalid_result(
            &result.name,
            format!("value {value} is not finite"),
        ));
    }
    Ok(())
}

/// Record the name and argument values of `result` in the registry.
pub fn register_result(registry: &mut Registry, result: &BenchmarkResult) {
    let info = registry
        .entry(result.name.clone())
        .or_insert_with(|| BenchmarkInfo {
            name: result.name.clone(),
            kind: default_kind(),
            unit: default_unit(),
            ..Default::default()
        });

    for (arg_name, arg_value) in &result.args {
        let idx = match info.param_names.iter().position(|n| n == arg_name) {
            Some(idx) => idx,
            None => {
                info.param_names.push(arg_name.clone());
                info.params.push(Vec::new());
                info.param_names.len() - 1
            }
        };
        if info.params.len() <= idx {
            info.params.resize_with(idx + 1, Vec::new);
        }
        if !info.params[idx].contains(arg_value) {
            info.params[idx].push(arg_value.clone());
        }
    }
}

/// Key of the result document holding the bucket for `context`.
pub fn result_document_key(context: &Context) -> Result<String> {
    let canonical = serde_json::to_vec(context).map_err(|e| Error::malformed(INDEX_KEY, e))?;
    let digest = Sha256::digest(&canonical);
    let commit = match context.short_commit() {
        "" => "nocommit".to_string(),
        short => path_component(short),
    };
    Ok(format!(
        "{RESULTS_DIR}/{}/{}-{}.json",
        path_component(&context.machine_name),
        commit,
        hex::encode(&digest[..8])
    ))
}

/// Key of the machine document for `machine_name`.
pub fn machine_document_key(machine_name: &str) -> String {
    format!("{RESULTS_DIR}/{}/machine.json", path_component(machine_name))
}

/// Turn an arbitrary name into a single safe path component.
fn path_component(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "default".to_string()
    } else if cleaned.chars().all(|c| c == '.') {
        cleaned.replace('.', "_")
    } else {
        cleaned
    }
}
