//! TTL cache with single-flight fetching.
//!
//! Each key holds at most one [`CacheEntry`]. A miss starts exactly one
//! upstream fetch per key; concurrent callers for the same key await that same
//! fetch and observe the same outcome. A failed fetch falls back to the last
//! value held for the key, even if it has expired.

use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::fmt::Debug;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::clock::{SharedClock, SystemClock};
use crate::error::BotResult;
use crate::sweeper::Sweepable;

/// Cache entry with TTL. Replaced wholesale, never mutated in place.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    fetched_at: Instant,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_valid_at(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < self.ttl
    }
}

/// Where a returned value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Served from a valid entry
    Hit,
    /// Fetched from upstream for this request
    Fetched,
    /// Upstream failed; served the last known value
    Stale,
}

/// A value plus its provenance.
#[derive(Debug, Clone)]
pub struct Cached<V> {
    pub value: V,
    pub freshness: Freshness,
}

impl<V> Cached<V> {
    pub fn is_stale(&self) -> bool {
        self.freshness == Freshness::Stale
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub expired_entries: usize,
    pub active_entries: usize,
    pub in_flight: usize,
}

type SharedFetch<V> = Shared<BoxFuture<'static, BotResult<Cached<V>>>>;

struct Inner<K, V> {
    name: String,
    ttl: Duration,
    capacity: usize,
    clock: SharedClock,
    entries: RwLock<HashMap<K, CacheEntry<V>>>,
    in_flight: Mutex<HashMap<K, SharedFetch<V>>>,
}

impl<K, V> Inner<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn valid(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries
            .get(key)
            .filter(|entry| entry.is_valid_at(now))
            .map(|entry| entry.value.clone())
    }

    fn store(&self, key: K, value: V) {
        let entry = CacheEntry {
            value,
            fetched_at: self.clock.now(),
            ttl: self.ttl,
        };

        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.fetched_at)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                entries.remove(&oldest);
                debug!(cache = %self.name, key = ?oldest, "Capacity reached, evicted oldest entry");
            }
        }
        entries.insert(key, entry);
    }

    /// Settle a finished fetch: write the entry, release the in-flight slot.
    fn complete(&self, key: K, result: BotResult<V>) -> BotResult<Cached<V>> {
        let outcome = match result {
            Ok(value) => {
                self.store(key.clone(), value.clone());
                Ok(Cached {
                    value,
                    freshness: Freshness::Fetched,
                })
            }
            Err(err) => {
                let previous = {
                    let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
                    entries.get(&key).map(|e| e.value.clone())
                };
                match previous {
                    Some(value) => {
                        warn!(
                            cache = %self.name,
                            key = ?key,
                            error = %err,
                            "Upstream fetch failed, serving stale entry"
                        );
                        Ok(Cached {
                            value,
                            freshness: Freshness::Stale,
                        })
                    }
                    None => {
                        warn!(
                            cache = %self.name,
                            key = ?key,
                            error = %err,
                            "Upstream fetch failed with nothing cached"
                        );
                        Err(err)
                    }
                }
            }
        };

        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);
        outcome
    }
}

/// TTL cache keyed by `K` with per-key single-flight fetching.
pub struct TtlCache<K, V> {
    inner: Arc<Inner<K, V>>,
}

impl<K, V> Clone for TtlCache<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    /// Unbounded cache on the system clock.
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self::with_capacity(name, ttl, usize::MAX)
    }

    /// Cache holding at most `capacity` keys.
    pub fn with_capacity(name: impl Into<String>, ttl: Duration, capacity: usize) -> Self {
        Self::with_clock(name, ttl, capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(
        name: impl Into<String>,
        ttl: Duration,
        capacity: usize,
        clock: SharedClock,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                ttl,
                capacity: capacity.max(1),
                clock,
                entries: RwLock::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Return a valid entry, or fetch it once for all concurrent callers.
    ///
    /// `fetch` is only invoked when this caller starts the upstream call. The
    /// fetch runs on its own task, so the result is cached even if every
    /// caller stops waiting.
    pub async fn get_or_fetch<F, Fut>(&self, key: K, fetch: F) -> BotResult<Cached<V>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = BotResult<V>> + Send + 'static,
    {
        if let Some(value) = self.inner.valid(&key) {
            return Ok(Cached {
                value,
                freshness: Freshness::Hit,
            });
        }

        let pending = {
            let mut in_flight = self
                .inner
                .in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner);

            match in_flight.get(&key) {
                Some(pending) => pending.clone(),
                None => {
                    // A fetch may have settled between the first check and the lock
                    if let Some(value) = self.inner.valid(&key) {
                        return Ok(Cached {
                            value,
                            freshness: Freshness::Hit,
                        });
                    }

                    debug!(cache = %self.inner.name, key = ?key, "Cache miss, fetching upstream");
                    let inner = Arc::clone(&self.inner);
                    let fetch_key = key.clone();
                    let upstream = fetch();
                    let pending = async move {
                        let result = upstream.await;
                        inner.complete(fetch_key, result)
                    }
                    .boxed()
                    .shared();

                    in_flight.insert(key, pending.clone());
                    tokio::spawn(pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    /// Valid value for `key`, without fetching.
    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.valid(key)
    }

    /// Last value held for `key`, valid or not.
    pub fn peek(&self, key: &K) -> Option<V> {
        let entries = self.inner.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(key).map(|e| e.value.clone())
    }

    /// Store a value with a fresh timestamp.
    pub fn insert(&self, key: K, value: V) {
        self.inner.store(key, value);
    }

    pub fn invalidate(&self, key: &K) {
        let mut entries = self.inner.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries.remove(key);
    }

    /// Remove entries whose `fetched_at + ttl` has passed. Returns the count.
    pub fn sweep_expired(&self) -> usize {
        let now = self.inner.clock.now();
        let mut entries = self.inner.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|_, entry| entry.is_valid_at(now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.inner
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let now = self.inner.clock.now();
        let (total, expired) = {
            let entries = self.inner.entries.read().unwrap_or_else(PoisonError::into_inner);
            let expired = entries.values().filter(|e| !e.is_valid_at(now)).count();
            (entries.len(), expired)
        };
        let in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();

        CacheStats {
            total_entries: total,
            expired_entries: expired,
            active_entries: total - expired,
            in_flight,
        }
    }
}

impl<K, V> Sweepable for TtlCache<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn sweep(&self) -> BotResult<usize> {
        Ok(self.sweep_expired())
    }
}

// ============================================================================
// Tests
// ============================================================================
