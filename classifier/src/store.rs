//! Cache and lock seams, with in-memory implementations.
//!
//! Both stores are shared, multi-writer resources. The in-memory versions use
//! `tokio::time::Instant` so paused-clock tests see deterministic expiry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{LockError, StoreError};

/// Key-value cache holding serialized results.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;
}

/// Proof of holding a lock. Consumed by [`LockProvider::release`].
#[derive(Debug, PartialEq, Eq)]
pub struct LockLease {
    pub key: String,
    /// Fencing token; release is a no-op unless it still matches the holder.
    pub token: u64,
}

/// Mutual exclusion with self-expiring leases.
#[async_trait]
pub trait LockProvider: Send + Sync {
    /// Acquire `key` for at most `lease_ttl`, waiting up to `max_wait`.
    async fn acquire(
        &self,
        key: &str,
        lease_ttl: Duration,
        max_wait: Duration,
    ) -> Result<LockLease, LockError>;

    async fn release(&self, lease: LockLease);
}

pub type SharedCache = Arc<dyn ResultCache>;
pub type SharedLocks = Arc<dyn LockProvider>;

fn guard<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A poisoned map still holds consistent entries; every write is one insert/remove.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct CacheEntry {
    value: String,
    expires_at: Instant,
}

/// Writes between sweeps of expired entries.
const SWEEP_EVERY: u64 = 64;

/// Process-local cache with per-entry TTL. Expired entries are dropped on
/// read, and swept every [`SWEEP_EVERY`] writes so keys orphaned by edits
/// do not pile up.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    writes: AtomicU64,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedCache {
        Arc::new(self)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        guard(&self.entries)
            .values()
            .filter(|e| e.expires_at > now)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut entries = guard(&self.entries);
        match entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = guard(&self.entries);
        if (self.writes.fetch_add(1, Ordering::Relaxed) + 1) % SWEEP_EVERY == 0 {
            let before = entries.len();
            entries.retain(|_, e| e.expires_at > now);
            debug!(swept = before - entries.len(), "Swept expired cache entries");
        }
        entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
        Ok(())
    }
}

struct Holder {
    token: u64,
    expires_at: Instant,
}

/// Process-local lock table with lease expiry and wake-on-release.
#[derive(Default)]
pub struct MemoryLocks {
    held: Mutex<HashMap<String, Holder>>,
    released: Notify,
    next_token: AtomicU64,
}

impl MemoryLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedLocks {
        Arc::new(self)
    }

    /// Whether `key` currently has an unexpired holder.
    pub fn is_held(&self, key: &str) -> bool {
        guard(&self.held)
            .get(key)
            .is_some_and(|h| h.expires_at > Instant::now())
    }

    /// Take the lock, or report when the current holder's lease runs out.
    fn try_acquire(&self, key: &str, lease_ttl: Duration) -> Result<LockLease, Instant> {
        let now = Instant::now();
        let mut held = guard(&self.held);
        if let Some(holder) = held.get(key) {
            if holder.expires_at > now {
                return Err(holder.expires_at);
            }
            debug!(key, "Lock lease expired, taking over");
        }
        let token = self.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        held.insert(
            key.to_string(),
            Holder {
                token,
                expires_at: now + lease_ttl,
            },
        );
        Ok(LockLease {
            key: key.to_string(),
            token,
        })
    }
}

#[async_trait]
impl LockProvider for MemoryLocks {
    async fn acquire(
        &self,
        key: &str,
        lease_ttl: Duration,
        max_wait: Duration,
    ) -> Result<LockLease, LockError> {
        let deadline = Instant::now() + max_wait;
        loop {
            // Register for wake-up before checking, so a release in between is not missed.
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let holder_expiry = match self.try_acquire(key, lease_ttl) {
                Ok(lease) => return Ok(lease),
                Err(expiry) => expiry,
            };
            if Instant::now() >= deadline {
                return Err(LockError::Timeout {
                    key: key.to_string(),
                    waited: max_wait,
                });
            }
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep_until(deadline.min(holder_expiry)) => {}
            }
        }
    }

    async fn release(&self, lease: LockLease) {
        let mut held = guard(&self.held);
        let owned = held.get(&lease.key).is_some_and(|h| h.token == lease.token);
        if owned {
            held.remove(&lease.key);
            drop(held);
            self.released.notify_waiters();
        } else {
            debug!(key = %lease.key, token = lease.token, "Stale lease release ignored");
        }
    }
}
