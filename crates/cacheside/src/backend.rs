//! Cache backends: an in-process typed store and helpers for the remote
//! byte-oriented store.
//!
//! The two backends expose the same get/set contract but keep different
//! value representations. The local store holds native Rust values, so a
//! local hit hands back the stored value with no decode step. The remote
//! store holds serialized bytes and goes through the codec on both sides.
//! That asymmetry is intentional: the local path trades sharing for
//! fidelity and speed, the remote path trades a codec round-trip for a
//! cache that outlives the process.

use std::any::Any;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use deadpool_redis::Pool;
use redis::AsyncCommands;

use crate::error::{CacheError, CacheResult};

/// Which store a request reads from and writes to. Fixed at request
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// In-process typed store
    Local,
    /// Redis, values stored as JSON bytes
    Remote,
}

/// Item TTL applied by a default-constructed local store (1 hour)
pub(crate) const DEFAULT_LOCAL_TTL: Duration = Duration::from_secs(3600);

/// Sweep interval of a default-constructed local store (1 hour)
pub(crate) const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);

/// A local entry. The value is the native Rust value behind a type-erased
/// handle; no serialization happens on this path.
struct LocalEntry {
    value: Arc<dyn Any + Send + Sync>,
    stored_at: Instant,
    ttl: Duration,
}

impl LocalEntry {
    /// Zero TTL means the entry never expires.
    fn is_expired(&self) -> bool {
        !self.ttl.is_zero() && self.stored_at.elapsed() > self.ttl
    }
}

/// In-process key/value store with per-entry TTL.
///
/// Values of any `Send + Sync + 'static` type can share one store; a get
/// with the wrong type parameter is a miss, not an error. Concurrent
/// access is handled by the underlying [`DashMap`].
pub struct LocalStore {
    entries: Arc<DashMap<String, LocalEntry>>,
    default_ttl: Duration,
}

impl LocalStore {
    /// Create a store with the given default item TTL and sweep interval.
    ///
    /// The background sweep only runs when a Tokio runtime is available at
    /// construction time; expired entries are dropped on access either way.
    pub fn new(default_ttl: Duration, sweep_interval: Duration) -> Self {
        let entries = Arc::new(DashMap::new());
        spawn_janitor(Arc::downgrade(&entries), sweep_interval);
        Self {
            entries,
            default_ttl,
        }
    }

    /// Create a store with the default policy (1 hour TTL, 1 hour sweep).
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_LOCAL_TTL, DEFAULT_SWEEP_INTERVAL)
    }

    /// Fetch the native value stored under `key`.
    ///
    /// Returns `None` on an absent key, an expired entry (removed on
    /// access) or a stored value of a different concrete type.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.entries.remove(key);
            return None;
        }
        match entry.value.downcast_ref::<T>() {
            Some(value) => Some(value.clone()),
            None => {
                tracing::debug!(key = %key, "stored value has a different type, treating as miss");
                None
            }
        }
    }

    /// Overwrite `key` with a fresh TTL. A zero duration applies the
    /// store's default TTL. Never fails.
    pub fn set<T: Send + Sync + 'static>(&self, key: &str, value: T, ttl: Duration) {
        let ttl = if ttl.is_zero() { self.default_ttl } else { ttl };
        self.entries.insert(
            key.to_string(),
            LocalEntry {
                value: Arc::new(value),
                stored_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Remove `key` if present.
    pub fn invalidate(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        purge(&self.entries);
    }

    /// Number of entries, expired ones included until the next sweep.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for LocalStore {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn purge(entries: &DashMap<String, LocalEntry>) {
    entries.retain(|_, entry| !entry.is_expired());
}

/// Background sweep for expired entries. The task holds only a weak
/// reference so it ends once the store is dropped.
fn spawn_janitor(entries: Weak<DashMap<String, LocalEntry>>, interval: Duration) {
    if interval.is_zero() {
        return;
    }
    let Ok(handle) = tokio::runtime::Handle::try_current() else {
        return;
    };
    handle.spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let Some(entries) = entries.upgrade() else {
                break;
            };
            let before = entries.len();
            purge(&entries);
            let swept = before.saturating_sub(entries.len());
            if swept > 0 {
                tracing::debug!(swept, "swept expired local cache entries");
            }
        }
    });
}

/// Fetch the raw payload stored under `key` from Redis.
///
/// Pool checkout and command failures map to
/// [`CacheError::BackendUnavailable`], an absent key to
/// [`CacheError::Miss`]. Both are soft at orchestration level.
pub(crate) async fn remote_get(pool: &Pool, key: &str) -> CacheResult<Vec<u8>> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| CacheError::BackendUnavailable(format!("redis connection: {e}")))?;
    let payload: Option<Vec<u8>> = conn
        .get(key)
        .await
        .map_err(|e| CacheError::BackendUnavailable(format!("redis GET: {e}")))?;
    payload.ok_or_else(|| CacheError::Miss(key.to_string()))
}

/// Store `payload` under `key` in Redis. A zero TTL stores without expiry;
/// otherwise the TTL is applied with millisecond precision.
pub(crate) async fn remote_set(
    pool: &Pool,
    key: &str,
    payload: Vec<u8>,
    ttl: Duration,
) -> CacheResult<()> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| CacheError::BackendUnavailable(format!("redis connection: {e}")))?;
    if ttl.is_zero() {
        conn.set::<_, _, ()>(key, payload)
            .await
            .map_err(|e| CacheError::BackendUnavailable(format!("redis SET: {e}")))?;
    } else {
        conn.pset_ex::<_, _, ()>(key, payload, ttl_millis(ttl))
            .await
            .map_err(|e| CacheError::BackendUnavailable(format!("redis PSETEX: {e}")))?;
    }
    Ok(())
}

/// TTL in milliseconds for `PSETEX`, saturating on overflow.
fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX)
}
