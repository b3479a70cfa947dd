// Copyright 2025 BenchDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! The store facade.
//!
//! [`BenchDb`] is the only type callers need: it composes the lock manager
//! and the record store over one backend. Every write crosses the store lock;
//! reads never wait on it.

use crate::backend::StorageBackend;
use crate::location::StoreLocation;
use crate::lock::{LockGuard, LockManager};
use crate::options::StoreOptions;
use crate::records::{
    merge_result, register_result, validate_result, RecordStore, Registry, CONFIG_KEY,
};
use benchdb_core::{BenchmarkResult, Bucket, Configuration, Context, Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Handle to a benchmark result store.
///
/// A handle carries the configuration values it will contribute on its next
/// write (repository, branches, project name, commit URL). Handles are cheap
/// to create; any number of them, in any number of processes, may write to
/// the same location.
///
/// # Example
///
/// ```no_run
/// use benchdb_core::{BenchmarkResult, Context};
/// use benchdb_storage::BenchDb;
///
/// # async fn run() -> benchdb_core::Result<()> {
/// let db = BenchDb::open("/tmp/asv")?
///     .with_repo("https://github.com/rapidsai/cugraph")
///     .with_branches(["branch-0.14"]);
///
/// let context = Context {
///     machine_name: "gpu-box".into(),
///     commit_hash: "809a1569e8a2ff138cdde4d9c282328be9dcad43".into(),
///     ..Default::default()
/// };
/// db.add(&context, BenchmarkResult::new("pagerank", 3.0)).await?;
///
/// let buckets = db.get(Some(&[context][..])).await?;
/// assert_eq!(buckets[0].results.len(), 1);
/// # Ok(())
/// # }
/// ```
pub struct BenchDb {
    location: Option<StoreLocation>,
    backend: Arc<dyn StorageBackend>,
    records: RecordStore,
    locks: LockManager,
    options: StoreOptions,
    settings: Configuration,
    cancel: CancellationToken,
}

impl BenchDb {
    /// Open a store at `location` with default options.
    ///
    /// Nothing is read or written until the first operation.
    pub fn open(location: &str) -> Result<Self> {
        Self::open_with_options(location, StoreOptions::default())
    }

    /// Open a store at `location` with explicit options.
    pub fn open_with_options(location: &str, options: StoreOptions) -> Result<Self> {
        let parsed = StoreLocation::parse(location)?;
        let backend = parsed.open_backend()?;
        let mut db = Self::with_backend(backend, options);
        db.location = Some(parsed);
        Ok(db)
    }

    /// Build a handle over an already constructed backend.
    pub fn with_backend(backend: Arc<dyn StorageBackend>, options: StoreOptions) -> Self {
        Self {
            location: None,
            records: RecordStore::new(Arc::clone(&backend)),
            locks: LockManager::new(Arc::clone(&backend), options.clone()),
            backend,
            options,
            settings: Configuration::default(),
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the lock and write options.
    pub fn with_options(mut self, options: StoreOptions) -> Self {
        self.locks = LockManager::new(Arc::clone(&self.backend), options.clone());
        self.options = options;
        self
    }

    /// Set the repository identifier contributed on write.
    pub fn with_repo(mut self, repo: impl Into<String>) -> Self {
        self.settings.repo = Some(repo.into());
        self
    }

    /// Set the branches contributed on write.
    pub fn with_branches<I, S>(mut self, branches: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.settings.branches = branches.into_iter().map(Into::into).collect();
        self
    }

    /// Set the project name contributed on write.
    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.settings.project_name = Some(name.into());
        self
    }

    /// Set the commit URL template contributed on write.
    pub fn with_commit_url(mut self, url: impl Into<String>) -> Self {
        self.settings.commit_url = Some(url.into());
        self
    }

    /// Where this store lives, if it was opened from a location string.
    pub fn location(&self) -> Option<&StoreLocation> {
        self.location.as_ref()
    }

    /// Configuration values this handle contributes on write.
    pub fn configuration(&self) -> &Configuration {
        &self.settings
    }

    /// Options in effect for this handle.
    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// Delay spent holding the lock before each write is persisted.
    pub fn write_delay(&self) -> Duration {
        self.options.write_delay
    }

    /// Set the delay spent holding the lock before each write is persisted.
    pub fn set_write_delay(&mut self, delay: Duration) {
        self.options.write_delay = delay;
    }

    /// Token that aborts this handle's in-flight writes when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Abort any write currently holding the lock through this handle.
    ///
    /// The aborted write returns [`Error::Cancelled`] without persisting and
    /// releases the lock. Later writes are aborted too until
    /// [`BenchDb::reset_cancel`] is called.
    pub fn cancel_write(&self) {
        self.cancel.cancel();
    }

    /// Re-arm the handle after [`BenchDb::cancel_write`].
    pub fn reset_cancel(&mut self) {
        self.cancel = CancellationToken::new();
    }

    /// Whether anything has been written at this location.
    pub async fn exists(&self) -> Result<bool> {
        self.records.exists().await
    }

    /// Add one result under `context`.
    pub async fn add(&self, context: &Context, result: BenchmarkResult) -> Result<()> {
        self.add_results(context, [result]).await
    }

    /// Add a batch of results under `context` in one locked update.
    ///
    /// Results are merged in order; a later result with the same key as an
    /// earlier one replaces it. The configuration is reconciled with this
    /// handle's values and written if it changed.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidResult`] if a result uses a reserved name or a
    ///   non-finite value; the lock is not taken and nothing is written.
    /// - [`Error::Configuration`] if neither the store nor this handle names
    ///   a repository; nothing is written.
    /// - [`Error::LockTimeout`] if the lock could not be acquired in time;
    ///   nothing is written.
    /// - [`Error::Cancelled`] if [`BenchDb::cancel_write`] fired while the
    ///   lock was held; nothing is written.
    /// - Any backend or document error, unchanged.
    pub async fn add_results<I>(&self, context: &Context, results: I) -> Result<()>
    where
        I: IntoIterator<Item = BenchmarkResult>,
    {
        let results: Vec<BenchmarkResult> = results.into_iter().collect();
        results.iter().try_for_each(validate_result)?;
        let guard = self.locks.acquire().await?;
        let outcome = self.merge_locked(&guard, context, results).await;
        finish(guard, outcome).await
    }

    async fn merge_locked(
        &self,
        guard: &LockGuard,
        context: &Context,
        results: Vec<BenchmarkResult>,
    ) -> Result<()> {
        let existing = self.records.load_configuration().await?;
        let config = Configuration::reconcile(existing.as_ref(), &self.settings)?;

        let mut buckets = self.records.load_buckets().await?;
        let mut registry = self.records.load_registry().await?;
        let count = results.len();
        let mut touched = Vec::new();
        for result in results {
            register_result(&mut registry, &result);
            let idx = merge_result(&mut buckets, context, result);
            if !touched.contains(&idx) {
                touched.push(idx);
            }
        }

        guard.hold(self.options.write_delay, &self.cancel).await?;

        self.records.save_buckets(&buckets, &touched, &registry).await?;
        if existing.as_ref() != Some(&config) {
            self.records.save_configuration(&config).await?;
        }

        metrics::counter!("benchdb_results_written_total").increment(count as u64);
        if existing.is_none() {
            info!(location = %self.describe(), "Created benchmark store");
        }
        debug!(
            machine = %context.machine_name,
            commit = %context.short_commit(),
            results = count,
            buckets = buckets.len(),
            "Results written"
        );
        Ok(())
    }

    /// Read buckets without taking the lock.
    ///
    /// With a filter, only buckets whose context equals one of the filter
    /// entries are returned, in the filter's order; contexts with no bucket
    /// are skipped and repeated contexts appear once. Without a filter every
    /// bucket is returned in stored order. A location with nothing written
    /// yields no buckets.
    pub async fn get(&self, filter: Option<&[Context]>) -> Result<Vec<Bucket>> {
        let buckets = self.records.load_buckets().await?;
        let Some(filter) = filter else {
            return Ok(buckets);
        };

        let mut selected: Vec<Bucket> = Vec::with_capacity(filter.len());
        for wanted in filter {
            if selected.iter().any(|b| &b.context == wanted) {
                continue;
            }
            if let Some(bucket) = buckets.iter().find(|b| &b.context == wanted) {
                selected.push(bucket.clone());
            }
        }
        Ok(selected)
    }

    /// Distinct contexts in bucket order.
    pub async fn get_contexts(&self) -> Result<Vec<Context>> {
        Ok(self
            .records
            .load_buckets()
            .await?
            .into_iter()
            .map(|b| b.context)
            .collect())
    }

    /// Every benchmark name ever written, with the argument values seen.
    pub async fn list_benchmarks(&self) -> Result<Registry> {
        self.records.load_registry().await
    }

    /// Replace this handle's configuration values with the stored ones.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] if the store has no configuration.
    pub async fn load_configuration(&mut self) -> Result<Configuration> {
        let stored = self
            .records
            .load_configuration()
            .await?
            .ok_or_else(|| Error::not_found(format!("{} in {}", CONFIG_KEY, self.describe())))?;
        self.settings = stored.clone();
        Ok(stored)
    }

    /// Reconcile this handle's configuration values into the store.
    pub async fn save_configuration(&self) -> Result<()> {
        let guard = self.locks.acquire().await?;
        let outcome = async {
            let existing = self.records.load_configuration().await?;
            let config = Configuration::reconcile(existing.as_ref(), &self.settings)?;
            if existing.as_ref() != Some(&config) {
                self.records.save_configuration(&config).await?;
            }
            Ok::<(), Error>(())
        }
        .await;
        finish(guard, outcome).await
    }

    fn describe(&self) -> String {
        match &self.location {
            Some(location) => location.to_string(),
            None => "<custom backend>".to_string(),
        }
    }
}

impl std::fmt::Debug for BenchDb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BenchDb")
            .field("location", &self.location)
            .field("settings", &self.settings)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Release the lock and surface the outcome of the locked section.
///
/// A release failure is returned only if the locked section succeeded and
/// left nothing else to report; otherwise it is logged.
async fn finish<T>(guard: LockGuard, outcome: Result<T>) -> Result<T> {
    let key = guard.key().to_string();
    match (guard.release().await, outcome) {
        (Ok(()), outcome) => outcome,
        (Err(release), Ok(value)) => {
            warn!(key = %key, error = %release, "Failed to release store lock after a successful write");
            Ok(value)
        }
        (Err(release), Err(e)) => {
            warn!(key = %key, error = %release, "Failed to release store lock");
            Err(e)
        }
    }
}
