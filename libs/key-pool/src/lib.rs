//! # key-pool
//!
//! `key-pool` owns the lease state for a pool of single-use key tokens. A key
//! is minted into the available set, checked out (blocked) by exactly one
//! caller at a time, and returned either by an explicit release or by the
//! background [`reclaimer`] once its block times out. Keys that go unaccessed
//! for too long are destroyed outright.
//!
//! All three state structures live behind one mutex, so every operation and
//! both sweep passes observe a consistent snapshot: an id is never visible as
//! both available and blocked, or as neither.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};
use uuid::Uuid;

pub mod metrics;
pub mod reclaimer;

/// How long a key may stay checked out before a sweep returns it to the pool.
pub const DEFAULT_BLOCK_TIMEOUT: Duration = Duration::from_secs(20);
/// How long a key may go without any access before a sweep destroys it.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeouts enforced by [`KeyPool::sweep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// maximum duration a key stays blocked without a release
    pub block_timeout: Duration,
    /// maximum duration since last access before a key is destroyed
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            block_timeout: DEFAULT_BLOCK_TIMEOUT,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
        }
    }
}

/// Metadata for a single key. [`KeyPool::info`] hands out clones of this and
/// the external API serializes it directly, so the serde field names are the
/// wire format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRecord {
    /// the key id itself
    pub key: String,
    /// set once at creation, never overwritten
    pub created_at: DateTime<Utc>,
    /// updated on checkout and keep-alive
    pub last_access: Option<DateTime<Utc>>,
    /// true while checked out
    pub is_blocked: bool,
    /// when the key last transitioned to blocked
    pub blocked_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// checkout attempted with nothing in the available set
    #[error("no keys available")]
    Exhausted,
    /// release attempted on a key that is missing or already available
    #[error("key not blocked or does not exist: {0}")]
    NotBlocked(String),
    /// info/keep-alive attempted on a key absent from the pool
    #[error("key does not exist: {0}")]
    NotFound(String),
}

/// Occupancy counts taken in one critical section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// all live keys
    pub total: usize,
    /// keys eligible for checkout
    pub available: usize,
    /// keys currently checked out
    pub blocked: usize,
}

/// What a single reclaimer sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// keys returned to the available set after their block timed out
    pub unblocked: u64,
    /// keys destroyed by idle expiry
    pub expired: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    /// authoritative set of all live keys
    records: HashMap<String, KeyRecord>,
    /// ids eligible for checkout. unordered, no duplicates, every entry is in
    /// `records` with `is_blocked` unset
    available: Vec<String>,
    /// id -> when it became blocked. every entry is in `records` with
    /// `is_blocked` set
    blocked: HashMap<String, DateTime<Utc>>,
}

impl PoolState {
    /// Return a blocked key to the available set. No-op for ids that are not
    /// currently blocked. Caller holds the state lock.
    fn unblock(&mut self, key: &str) -> bool {
        if self.blocked.remove(key).is_none() {
            return false;
        }
        if let Some(record) = self.records.get_mut(key) {
            record.is_blocked = false;
        }
        self.available.push(key.to_owned());
        true
    }

    /// Drop every trace of a key: record, blocked entry, and any queued
    /// available slot. Caller holds the state lock.
    fn purge(&mut self, key: &str) -> bool {
        let existed = self.records.remove(key).is_some();
        self.blocked.remove(key);
        self.available.retain(|id| id != key);
        existed
    }

    fn refresh_gauges(&self) {
        metrics::KEYS_TOTAL.set(self.records.len() as i64);
        metrics::KEYS_AVAILABLE.set(self.available.len() as i64);
        metrics::KEYS_BLOCKED.set(self.blocked.len() as i64);
    }
}

/// Shared handle to a lease pool. Clones refer to the same state; build a
/// fresh pool with [`KeyPool::new`]/[`KeyPool::with_config`] where isolation
/// is needed (tests do).
#[derive(Debug, Clone, Default)]
pub struct KeyPool {
    inner: Arc<Mutex<PoolState>>,
    cfg: PoolConfig,
}

/// 122 random bits; birthday collisions are not a practical concern
fn generate_key() -> String {
    format!("key-{}", Uuid::new_v4().simple())
}

impl KeyPool {
    /// Pool with the default block/idle timeouts.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool with explicit timeouts.
    pub fn with_config(cfg: PoolConfig) -> Self {
        Self {
            inner: Arc::default(),
            cfg,
        }
    }

    /// The timeouts this pool sweeps with.
    pub fn config(&self) -> PoolConfig {
        self.cfg
    }

    /// Mint a fresh key into the available set and return its id.
    pub fn create(&self) -> String {
        let key = generate_key();
        let now = Utc::now();

        let mut state = self.inner.lock();
        state.records.insert(
            key.clone(),
            KeyRecord {
                key: key.clone(),
                created_at: now,
                last_access: None,
                is_blocked: false,
                blocked_at: None,
            },
        );
        state.available.push(key.clone());
        state.refresh_gauges();
        debug!(%key, "created key");
        key
    }

    /// Check out a uniformly random available key, marking it blocked.
    pub fn checkout(&self) -> Result<String, PoolError> {
        let mut state = self.inner.lock();
        if state.available.is_empty() {
            metrics::CHECKOUT_EXHAUSTED.inc();
            return Err(PoolError::Exhausted);
        }
        let index = rand::thread_rng().gen_range(0..state.available.len());
        // selection is random anyway, so swap_remove's reordering is fine
        let key = state.available.swap_remove(index);

        let now = Utc::now();
        if let Some(record) = state.records.get_mut(&key) {
            record.last_access = Some(now);
            record.is_blocked = true;
            record.blocked_at = Some(now);
        }
        state.blocked.insert(key.clone(), now);
        state.refresh_gauges();
        debug!(%key, "checked out key");
        Ok(key)
    }

    /// Return a checked-out key to the pool.
    pub fn release(&self, key: &str) -> Result<(), PoolError> {
        let mut state = self.inner.lock();
        if !state.unblock(key) {
            return Err(PoolError::NotBlocked(key.to_owned()));
        }
        state.refresh_gauges();
        debug!(%key, "released key");
        Ok(())
    }

    /// Destroy a key outright, scrubbing it from the available queue as well.
    /// Unknown ids are a no-op, repeated removes included.
    pub fn remove(&self, key: &str) {
        let mut state = self.inner.lock();
        if state.purge(key) {
            debug!(%key, "removed key");
        }
        state.refresh_gauges();
    }

    /// Refresh a key's last-access time without touching its blocked state.
    pub fn keep_alive(&self, key: &str) -> Result<(), PoolError> {
        let mut state = self.inner.lock();
        match state.records.get_mut(key) {
            Some(record) => {
                record.last_access = Some(Utc::now());
                trace!(%key, "key kept alive");
                Ok(())
            }
            None => Err(PoolError::NotFound(key.to_owned())),
        }
    }

    /// Snapshot of a single key's metadata.
    pub fn info(&self, key: &str) -> Result<KeyRecord, PoolError> {
        let state = self.inner.lock();
        state
            .records
            .get(key)
            .cloned()
            .ok_or_else(|| PoolError::NotFound(key.to_owned()))
    }

    /// Consistent snapshot of pool occupancy.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock();
        PoolStats {
            total: state.records.len(),
            available: state.available.len(),
            blocked: state.blocked.len(),
        }
    }

    /// Run both reclamation passes against `now`.
    ///
    /// Pass one returns every key whose block is older than the configured
    /// block timeout to the available set, exactly as [`release`] would. Pass
    /// two destroys every key whose last access (creation, if it was never
    /// accessed) is older than the idle timeout. Both passes run in one
    /// critical section, so a key unblocked here that is already idle long
    /// enough is destroyed in the same tick with no resurrection and no stale
    /// queue slot left behind.
    ///
    /// [`release`]: KeyPool::release
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepStats {
        let mut state = self.inner.lock();
        let mut stats = SweepStats::default();

        let timed_out: Vec<String> = state
            .blocked
            .iter()
            .filter(|(_, blocked_at)| older_than(now, **blocked_at, self.cfg.block_timeout))
            .map(|(key, _)| key.clone())
            .collect();
        for key in timed_out {
            if state.unblock(&key) {
                debug!(%key, "block timed out, key returned to pool");
                stats.unblocked += 1;
            }
        }

        let idle: Vec<String> = state
            .records
            .values()
            .filter(|record| {
                let last = record.last_access.unwrap_or(record.created_at);
                older_than(now, last, self.cfg.idle_timeout)
            })
            .map(|record| record.key.clone())
            .collect();
        for key in idle {
            if state.purge(&key) {
                debug!(%key, "idle timeout expired, key destroyed");
                stats.expired += 1;
            }
        }

        state.refresh_gauges();
        stats
    }
}

/// `true` when `then` is more than `timeout` in `now`'s past. Timestamps in
/// the future never qualify.
fn older_than(now: DateTime<Utc>, then: DateTime<Utc>, timeout: Duration) -> bool {
    now.signed_duration_since(then)
        .to_std()
        .is_ok_and(|age| age > timeout)
}
