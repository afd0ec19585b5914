//! In-process named locks with automatic expiry.
//!
//! Locks never block or queue. A caller that cannot acquire its key gets an
//! [`Exclusive::Skipped`] back and is expected to rely on the next scheduled
//! attempt. A lock held longer than the registry timeout is considered
//! abandoned and is released the next time anyone inspects it.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};

use crate::constants::LOCK_TIMEOUT_MS;

/// State stored for one named lock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NamedLock {
    pub held: bool,
    /// Unix timestamp (milliseconds) of the acquisition
    pub acquired_at_ms: i64,
}

/// Outcome of [`LockRegistry::run_exclusive`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Exclusive<T> {
    /// The lock was acquired and the operation ran to completion
    Ran(T),
    /// Another holder owns the lock; the operation was not invoked
    Skipped { key: String },
}

impl<T> Exclusive<T> {
    pub fn is_skipped(&self) -> bool {
        matches!(self, Exclusive::Skipped { .. })
    }

    /// Returns the operation's output, or `None` when skipped
    pub fn ran(self) -> Option<T> {
        match self {
            Exclusive::Ran(value) => Some(value),
            Exclusive::Skipped { .. } => None,
        }
    }
}

/// Registry of named locks shared by every component of one process
#[derive(Debug)]
pub struct LockRegistry {
    locks: DashMap<String, NamedLock>,
    timeout_ms: i64,
}

impl Default for LockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LockRegistry {
    /// Create a registry using the default 5 minute expiry
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
            timeout_ms: LOCK_TIMEOUT_MS,
        }
    }

    /// Create a registry with a custom expiry
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            timeout_ms: timeout.as_millis() as i64,
        }
    }

    pub fn timeout_ms(&self) -> i64 {
        self.timeout_ms
    }

    fn is_expired(&self, lock: &NamedLock, now_ms: i64) -> bool {
        now_ms - lock.acquired_at_ms >= self.timeout_ms
    }

    /// Try to take `key`. Returns false without touching state if a live lock exists.
    pub fn acquire(&self, key: &str) -> bool {
        self.acquire_at(key, Utc::now().timestamp_millis())
    }

    pub fn acquire_at(&self, key: &str, now_ms: i64) -> bool {
        match self.locks.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                let current = *entry.get();
                if current.held && !self.is_expired(&current, now_ms) {
                    return false;
                }
                if current.held {
                    tracing::warn!(
                        "Releasing stale lock '{}' held for {} ms",
                        key,
                        now_ms - current.acquired_at_ms
                    );
                }
                entry.insert(NamedLock {
                    held: true,
                    acquired_at_ms: now_ms,
                });
                true
            }
            Entry::Vacant(entry) => {
                entry.insert(NamedLock {
                    held: true,
                    acquired_at_ms: now_ms,
                });
                true
            }
        }
    }

    /// Clear `key` unconditionally. Idempotent.
    pub fn release(&self, key: &str) {
        self.locks.remove(key);
    }

    /// Clear `key` only if it still belongs to the acquisition made at `acquired_at_ms`.
    fn release_owned(&self, key: &str, acquired_at_ms: i64) {
        self.locks
            .remove_if(key, |_, lock| lock.acquired_at_ms == acquired_at_ms);
    }

    /// Whether `key` is currently held. Expired locks are released as a side effect.
    pub fn is_locked(&self, key: &str) -> bool {
        self.is_locked_at(key, Utc::now().timestamp_millis())
    }

    pub fn is_locked_at(&self, key: &str, now_ms: i64) -> bool {
        if self
            .locks
            .remove_if(key, |_, lock| lock.held && self.is_expired(lock, now_ms))
            .is_some()
        {
            tracing::warn!("Auto-released expired lock '{}'", key);
            return false;
        }

        self.locks.get(key).map(|lock| lock.held).unwrap_or(false)
    }

    /// Snapshot of a lock entry, if any
    pub fn get(&self, key: &str) -> Option<NamedLock> {
        self.locks.get(key).map(|lock| *lock)
    }

    /// Run `op` while holding `key`.
    ///
    /// The lock is released when `op` finishes, fails, panics or is dropped.
    /// Errors returned by `op` are passed through untouched inside [`Exclusive::Ran`].
    pub async fn run_exclusive<F, Fut, T>(&self, key: &str, op: F) -> Exclusive<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let now_ms = Utc::now().timestamp_millis();
        if !self.acquire_at(key, now_ms) {
            tracing::info!("Operation '{}' already running, skipping", key);
            return Exclusive::Skipped {
                key: key.to_string(),
            };
        }

        let _guard = LockGuard {
            registry: self,
            key,
            acquired_at_ms: now_ms,
        };

        Exclusive::Ran(op().await)
    }
}

/// Releases its lock on drop
struct LockGuard<'a> {
    registry: &'a LockRegistry,
    key: &'a str,
    acquired_at_ms: i64,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        self.registry.release_owned(self.key, self.acquired_at_ms);
    }
}
