// Copyright 2025 BenchDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Store-wide mutual exclusion built on exclusive document creation.
//!
//! A writer holds the lock while a sentinel document exists at the lock key.
//! Acquisition is a polling loop around
//! [`StorageBackend::create_exclusive`] with capped exponential backoff and a
//! maximum wait. Waiters are not ordered; whichever retry finds the key free
//! first wins.
//!
//! # States
//!
//! ```text
//! Unlocked ──acquire()──▶ Acquiring ──created──▶ Held ──release()──▶ Unlocked
//!                             │
//!                             └──max wait elapsed──▶ LockTimeout
//! ```
//!
//! # Stale locks
//!
//! A writer that crashes while holding the lock leaves the sentinel behind.
//! By default such a lock is never broken. When
//! [`StoreOptions::stale_after`] is set, a waiter that finds a sentinel older
//! than the threshold deletes it (only if its token is unchanged) and retries.

use crate::backend::StorageBackend;
use crate::options::StoreOptions;
use benchdb_core::{Error, Result};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Content of the lock document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockSentinel {
    /// Unique token of this acquisition.
    pub token: Uuid,
    /// Process id of the holder.
    pub pid: u32,
    /// Host the holder runs on.
    pub hostname: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
}

impl LockSentinel {
    /// Create a sentinel for the current process with a fresh token.
    pub fn current() -> Self {
        Self {
            token: Uuid::new_v4(),
            pid: std::process::id(),
            hostname: hostname(),
            acquired_at: Utc::now(),
        }
    }

    /// How long ago the lock was acquired (zero if the clock went backwards).
    pub fn age(&self) -> Duration {
        (Utc::now() - self.acquired_at).to_std().unwrap_or_default()
    }

    /// Whether the sentinel is older than `threshold`.
    pub fn is_stale(&self, threshold: Duration) -> bool {
        self.age() > threshold
    }
}

/// Acquires the lock of one store location.
#[derive(Clone)]
pub struct LockManager {
    backend: Arc<dyn StorageBackend>,
    options: StoreOptions,
}

impl LockManager {
    /// Create a lock manager over `backend`.
    pub fn new(backend: Arc<dyn StorageBackend>, options: StoreOptions) -> Self {
        Self { backend, options }
    }

    /// Key of the lock document.
    pub fn key(&self) -> &str {
        &self.options.lock_key
    }

    /// Wait until the lock is held by this caller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockTimeout`] once [`StoreOptions::lock_timeout`]
    /// elapses without acquiring, or any backend error hit while polling.
    pub async fn acquire(&self) -> Result<LockGuard> {
        let key = self.key();
        let timeout = self.options.lock_timeout;
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            let sentinel = LockSentinel::current();
            let body = serde_json::to_vec(&sentinel).map_err(|e| Error::malformed(key, e))?;

            if self.backend.create_exclusive(key, Bytes::from(body)).await? {
                let waited = started.elapsed();
                metrics::counter!("benchdb_lock_acquired_total").increment(1);
                metrics::histogram!("benchdb_lock_wait_seconds").record(waited.as_secs_f64());
                debug!(
                    key,
                    token = %sentinel.token,
                    waited_ms = waited.as_millis() as u64,
                    attempts = attempt + 1,
                    "Store lock acquired"
                );
                return Ok(LockGuard {
                    backend: Arc::clone(&self.backend),
                    key: key.to_string(),
                    token: sentinel.token,
                    released: false,
                });
            }

            if attempt == 0 {
                metrics::counter!("benchdb_lock_contended_total").increment(1);
                debug!(key, "Store lock is held, waiting");
            }

            if let Some(threshold) = self.options.stale_after {
                if self.break_if_stale(threshold).await? {
                    continue;
                }
            }

            let waited = started.elapsed();
            if waited >= timeout {
                metrics::counter!("benchdb_lock_timeouts_total").increment(1);
                warn!(key, waited_ms = waited.as_millis() as u64, "Gave up waiting for store lock");
                return Err(Error::LockTimeout {
                    key: key.to_string(),
                    waited,
                });
            }

            let delay = self.options.backoff_delay(attempt).min(timeout - waited);
            tokio::time::sleep(delay).await;
            attempt = attempt.saturating_add(1);
        }
    }

    /// Delete the current lock if it is older than `threshold`.
    ///
    /// Returns `true` when the key is now free (deleted here, or released by
    /// its holder in the meantime).
    async fn break_if_stale(&self, threshold: Duration) -> Result<bool> {
        let key = self.key();
        let existing = match self.backend.read(key).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return Ok(true),
            Err(e) => return Err(e),
        };

        // An unparseable sentinel may be mid-write by another backend; treat it as held.
        let Ok(sentinel) = serde_json::from_slice::<LockSentinel>(&existing) else {
            return Ok(false);
        };
        if !sentinel.is_stale(threshold) {
            return Ok(false);
        }

        if delete_if_owned(self.backend.as_ref(), key, sentinel.token).await? {
            metrics::counter!("benchdb_lock_stale_takeovers_total").increment(1);
            warn!(
                key,
                token = %sentinel.token,
                holder_pid = sentinel.pid,
                holder_host = %sentinel.hostname,
                age_ms = sentinel.age().as_millis() as u64,
                "Forcibly removed stale store lock"
            );
        }
        Ok(true)
    }
}

impl std::fmt::Debug for LockManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockManager")
            .field("key", &self.options.lock_key)
            .finish_non_exhaustive()
    }
}

/// Proof of holding the store lock.
///
/// Call [`LockGuard::release`] on every exit path. A guard dropped without
/// release (for example because the owning future was cancelled) schedules a
/// best-effort release on the current Tokio runtime.
#[must_use = "the store lock stays held until the guard is released"]
pub struct LockGuard {
    backend: Arc<dyn StorageBackend>,
    key: String,
    token: Uuid,
    released: bool,
}

impl LockGuard {
    /// Token written into the lock document.
    pub fn token(&self) -> Uuid {
        self.token
    }

    /// Key of the held lock.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Simulate a slow critical section.
    ///
    /// Waits for `delay` unless `cancel` fires first, in which case the
    /// holder must abandon its work: [`Error::Cancelled`] is returned and
    /// the caller still releases the lock. A token that is already cancelled
    /// aborts immediately, even with a zero delay.
    pub async fn hold(&self, delay: Duration, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            info!(key = %self.key, "Write cancelled before persisting");
            return Err(Error::Cancelled);
        }
        if delay.is_zero() {
            return Ok(());
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(key = %self.key, "Write cancelled while holding store lock");
                Err(Error::Cancelled)
            }
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Release the lock.
    ///
    /// The lock document is deleted only if it still carries this guard's
    /// token; a lock that was taken over as stale is left to its new holder.
    pub async fn release(mut self) -> Result<()> {
        self.released = true;
        let deleted = delete_if_owned(self.backend.as_ref(), &self.key, self.token).await?;
        if deleted {
            debug!(key = %self.key, token = %self.token, "Store lock released");
        } else {
            warn!(
                key = %self.key,
                token = %self.token,
                "Store lock was no longer ours at release"
            );
        }
        Ok(())
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let backend = Arc::clone(&self.backend);
        let key = self.key.clone();
        let token = self.token;

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = delete_if_owned(backend.as_ref(), &key, token).await {
                        warn!(key = %key, error = %e, "Failed to release dropped store lock");
                    }
                });
            }
            Err(_) => warn!(key = %key, "Store lock guard dropped outside a runtime; lock left in place"),
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("released", &self.released)
            .finish()
    }
}

/// Delete the lock at `key` if its sentinel carries `token`.
async fn delete_if_owned(backend: &dyn StorageBackend, key: &str, token: Uuid) -> Result<bool> {
    let current = match backend.read(key).await {
        Ok(bytes) => bytes,
        Err(e) if e.is_not_found() => return Ok(false),
        Err(e) => return Err(e),
    };
    match serde_json::from_slice::<LockSentinel>(&current) {
        Ok(sentinel) if sentinel.token == token => {
            backend.delete(key).await?;
            Ok(true)
        }
        _ => Ok(false),
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "unknown".into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FsBackend;

    fn manager(dir: &std::path::Path, options: StoreOptions) -> LockManager {
        LockManager::new(Arc::new(FsBackend::new(dir)), options)
    }

    fn fast_options() -> StoreOptions {
        StoreOptions::default()
            .with_poll_interval(Duration::from_millis(5), Duration::from_millis(20))
            .with_lock_timeout(Duration::from_millis(300))
    }

    #[tokio::test]
    async fn test_acquire_writes_sentinel_and_release_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path(), fast_options());

        let guard = locks.acquire().await.unwrap();
        let raw = std::fs::read(dir.path().join(".benchdb.lock")).unwrap();
        let sentinel: LockSentinel = serde_json::from_slice(&raw).unwrap();
        assert_eq!(sentinel.token, guard.token());
        assert_eq!(sentinel.pid, std::process::id());

        guard.release().await.unwrap();
        assert!(!dir.path().join(".benchdb.lock").exists());
    }

    #[tokio::test]
    async fn test_second_acquire_times_out_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let first = manager(dir.path(), fast_options());
        let second = manager(dir.path(), fast_options());

        let guard = first.acquire().await.unwrap();
        let started = Instant::now();
        let err = second.acquire().await.unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_millis(300));

        guard.release().await.unwrap();
        second.acquire().await.unwrap().release().await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_acquires_after_release() {
        let dir = tempfile::tempdir().unwrap();
        let options = fast_options().with_lock_timeout(Duration::from_secs(5));
        let first = manager(dir.path(), options.clone());
        let second = manager(dir.path(), options);

        let guard = first.acquire().await.unwrap();
        let waiter = tokio::spawn(async move { second.acquire().await.map(|g| g.token()) });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        let held = guard.token();
        guard.release().await.unwrap();
        let token = waiter.await.unwrap().unwrap();
        assert_ne!(token, held);
    }

    #[tokio::test]
    async fn test_stale_lock_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FsBackend::new(dir.path());
        let abandoned = LockSentinel {
            acquired_at: Utc::now() - chrono::Duration::hours(2),
            ..LockSentinel::current()
        };
        backend
            .write(".benchdb.lock", Bytes::from(serde_json::to_vec(&abandoned).unwrap()))
            .await
            .unwrap();

        let locks = manager(dir.path(), fast_options().with_stale_after(Duration::from_secs(3600)));
        let guard = locks.acquire().await.unwrap();
        assert_ne!(guard.token(), abandoned.token);
        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_fresh_lock_is_not_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let options = fast_options().with_stale_after(Duration::from_secs(3600));
        let holder = manager(dir.path(), options.clone());
        let waiter = manager(dir.path(), options);

        let guard = holder.acquire().await.unwrap();
        assert!(matches!(
            waiter.acquire().await.unwrap_err(),
            Error::LockTimeout { .. }
        ));
        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_release_leaves_foreign_lock_alone() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path(), fast_options());
        let guard = locks.acquire().await.unwrap();

        // Simulate a takeover by another writer.
        let other = LockSentinel::current();
        FsBackend::new(dir.path())
            .write(".benchdb.lock", Bytes::from(serde_json::to_vec(&other).unwrap()))
            .await
            .unwrap();

        guard.release().await.unwrap();
        let raw = std::fs::read(dir.path().join(".benchdb.lock")).unwrap();
        let remaining: LockSentinel = serde_json::from_slice(&raw).unwrap();
        assert_eq!(remaining.token, other.token);
    }

    #[tokio::test]
    async fn test_hold_is_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path(), fast_options());
        let guard = locks.acquire().await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let started = Instant::now();
        let err = guard.hold(Duration::from_secs(30), &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
        guard.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropped_guard_releases_in_background() {
        let dir = tempfile::tempdir().unwrap();
        let locks = manager(dir.path(), fast_options().with_lock_timeout(Duration::from_secs(5)));

        drop(locks.acquire().await.unwrap());
        locks.acquire().await.unwrap().release().await.unwrap();
    }
}
