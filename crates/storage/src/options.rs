// Copyright 2025 BenchDB Contributors
// SPDX-License-Identifier: Apache-2.0

//! Tuning options for a store handle.
//!
//! Options can be built in code or loaded from `BENCHDB_*` environment
//! variables:
//!
//! | Variable | Default |
//! |----------|---------|
//! | `BENCHDB_LOCK_KEY` | `.benchdb.lock` |
//! | `BENCHDB_POLL_INTERVAL_MS` | `50` |
//! | `BENCHDB_MAX_POLL_INTERVAL_MS` | `1000` |
//! | `BENCHDB_BACKOFF_FACTOR` | `1.5` |
//! | `BENCHDB_LOCK_TIMEOUT_MS` | `120000` |
//! | `BENCHDB_STALE_LOCK_MS` | unset (never take over) |
//! | `BENCHDB_WRITE_DELAY_MS` | `0` |

use benchdb_core::{Error, Result};
use serde::Deserialize;
use std::time::Duration;

/// Default key of the lock document.
pub const DEFAULT_LOCK_KEY: &str = ".benchdb.lock";

/// Lock and write tuning for a store handle.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreOptions {
    /// Key of the lock document, relative to the store root.
    pub lock_key: String,
    /// Delay before the first retry when the lock is held.
    pub poll_interval: Duration,
    /// Upper bound for the retry delay.
    pub max_poll_interval: Duration,
    /// Growth factor applied to the retry delay after each failed attempt.
    pub backoff_factor: f64,
    /// Maximum time to wait for the lock before failing.
    pub lock_timeout: Duration,
    /// Age after which an existing lock may be forcibly taken over.
    ///
    /// Takeover reads the stale sentinel and deletes it in two separate
    /// steps. A second waiter acting on the same stale sentinel can delete
    /// a lock the first one has just acquired, so two writers can both end
    /// up holding the lock. Only set this when a crashed holder is more
    /// likely than a holder outliving the threshold.
    pub stale_after: Option<Duration>,
    /// Artificial delay spent holding the lock before persisting.
    pub write_delay: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            lock_key: DEFAULT_LOCK_KEY.to_string(),
            poll_interval: Duration::from_millis(50),
            max_poll_interval: Duration::from_secs(1),
            backoff_factor: 1.5,
            lock_timeout: Duration::from_secs(120),
            stale_after: None,
            write_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EnvOptions {
    lock_key: String,
    poll_interval_ms: u64,
    max_poll_interval_ms: u64,
    backoff_factor: f64,
    lock_timeout_ms: u64,
    #[serde(default)]
    stale_lock_ms: Option<u64>,
    write_delay_ms: u64,
}

impl StoreOptions {
    /// Load options from `BENCHDB_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_source(config::Environment::with_prefix("BENCHDB").try_parsing(true))
    }

    fn from_source<S>(source: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let defaults = Self::default();
        let settings = config::Config::builder()
            .set_default("lock_key", defaults.lock_key.clone())
            .and_then(|b| b.set_default("poll_interval_ms", millis(defaults.poll_interval)))
            .and_then(|b| b.set_default("max_poll_interval_ms", millis(defaults.max_poll_interval)))
            .and_then(|b| b.set_default("backoff_factor", defaults.backoff_factor))
            .and_then(|b| b.set_default("lock_timeout_ms", millis(defaults.lock_timeout)))
            .and_then(|b| b.set_default("write_delay_ms", millis(defaults.write_delay)))
            .map_err(|e| Error::configuration(e.to_string()))?
            .add_source(source)
            .build()
            .map_err(|e| Error::configuration(e.to_string()))?;

        let raw: EnvOptions = settings
            .try_deserialize()
            .map_err(|e| Error::configuration(e.to_string()))?;

        Ok(Self {
            lock_key: raw.lock_key,
            poll_interval: Duration::from_millis(raw.poll_interval_ms),
            max_poll_interval: Duration::from_millis(raw.max_poll_interval_ms),
            backoff_factor: raw.backoff_factor,
            lock_timeout: Duration::from_millis(raw.lock_timeout_ms),
            stale_after: raw.stale_lock_ms.map(Duration::from_millis),
            write_delay: Duration::from_millis(raw.write_delay_ms),
        })
    }

    /// Retry delay after `attempt` failed acquisitions (0-indexed).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = self.backoff_factor.max(1.0);
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.poll_interval.as_secs_f64() * factor.powi(exponent);
        let cap = self.max_poll_interval.max(self.poll_interval);
        if !delay.is_finite() || delay >= cap.as_secs_f64() {
            return cap;
        }
        Duration::from_secs_f64(delay)
    }

    /// Set the maximum lock wait.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Set the staleness threshold for forced lock takeover.
    pub fn with_stale_after(mut self, threshold: Duration) -> Self {
        self.stale_after = Some(threshold);
        self
    }

    /// Set the initial and maximum poll intervals.
    pub fn with_poll_interval(mut self, initial: Duration, max: Duration) -> Self {
        self.poll_interval = initial;
        self.max_poll_interval = max;
        self
    }

    /// Set the artificial write delay.
    pub fn with_write_delay(mut self, delay: Duration) -> Self {
        self.write_delay = delay;
        self
    }
}

fn millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}
