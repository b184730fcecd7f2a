//! Source Response Cache
//!
//! Bounded TTL cache shielding upstream quota.
//! - Expiry is lazy on `get`/`has`, plus a periodic sweep task
//! - Overflow evicts the single entry with the oldest `created_at`
//!
//! Eviction is by insertion time, not by access: a hot entry inserted early is
//! evicted before a cold one inserted later.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

/// Cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL used when `set` gets no explicit TTL
    pub default_ttl_secs: u64,
    pub max_size: usize,
    /// Interval of the active expiry sweep
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            max_size: 10_000,
            sweep_interval_secs: 60,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Cached value with its creation time and TTL
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub created_at: Instant,
    pub ttl: Duration,
    generation: u64,
}

impl<V> CacheEntry<V> {
    fn new(value: V, ttl: Duration, generation: u64) -> Self {
        Self {
            value,
            created_at: Instant::now(),
            ttl,
            generation,
        }
    }

    /// Expired strictly after `ttl` has elapsed
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) > self.ttl
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

/// Map plus an insertion-order index.
///
/// Every insert pushes `(generation, key)` to the back of `order`. Overwrites
/// and removals leave stale records behind; eviction skips any record whose
/// generation no longer matches the live entry.
#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    order: VecDeque<(u64, String)>,
    next_generation: u64,
    counters: Counters,
}

impl<V> Inner<V> {
    fn is_live(&self, generation: u64, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.generation == generation)
    }

    /// Remove the oldest live entry
    fn evict_oldest(&mut self) -> Option<String> {
        while let Some((generation, key)) = self.order.pop_front() {
            if self.is_live(generation, &key) {
                self.entries.remove(&key);
                return Some(key);
            }
        }
        None
    }

    /// Drop stale index records once they outnumber live entries
    fn compact(&mut self) {
        if self.order.len() > 2 * self.entries.len() + 16 {
            let entries = &self.entries;
            self.order.retain(|(generation, key)| {
                entries
                    .get(key)
                    .is_some_and(|entry| entry.generation == *generation)
            });
        }
    }
}

/// Bounded key/value cache with per-entry TTL
#[derive(Debug)]
pub struct TtlCache<V> {
    config: CacheConfig,
    inner: Mutex<Inner<V>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                order: VecDeque::new(),
                next_generation: 0,
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Insert or overwrite `key`; a new key on a full cache evicts the oldest entry first
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Option<Duration>) {
        let key = key.into();
        let ttl = ttl.unwrap_or_else(|| self.config.default_ttl());
        let mut inner = self.inner.lock();

        if !inner.entries.contains_key(&key) && inner.entries.len() >= self.config.max_size {
            if let Some(oldest) = inner.evict_oldest() {
                inner.counters.evictions += 1;
                debug!(key = %oldest, "Evicted oldest cache entry");
            }
        }

        if self.config.max_size > 0 {
            let generation = inner.next_generation;
            inner.next_generation += 1;
            inner.order.push_back((generation, key.clone()));
            inner.entries.insert(key, CacheEntry::new(value, ttl, generation));
            inner.compact();
        }
    }

    /// Fresh value for `key`, removing it if expired
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        let expired = match inner.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let value = entry.value.clone();
                inner.counters.hits += 1;
                return Some(value);
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            inner.entries.remove(key);
            inner.counters.expirations += 1;
        }
        inner.counters.misses += 1;
        None
    }

    /// True if a fresh entry exists; does not touch hit/miss counters
    pub fn has(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        match inner.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => true,
            Some(_) => {
                inner.entries.remove(key);
                inner.counters.expirations += 1;
                false
            }
            None => false,
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.inner.lock().entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every expired entry, returning how many were dropped
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before - inner.entries.len();
        inner.counters.expirations += removed as u64;
        inner.compact();
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        let c = &inner.counters;
        let lookups = c.hits + c.misses;
        CacheStats {
            size: inner.entries.len(),
            max_size: self.config.max_size,
            hits: c.hits,
            misses: c.misses,
            evictions: c.evictions,
            expirations: c.expirations,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                c.hits as f64 / lookups as f64
            },
        }
    }
}

/// Run `sweep` every `sweep_interval` until shutdown or until the cache is dropped
pub fn spawn_sweeper<V>(cache: &Arc<TtlCache<V>>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()>
where
    V: Clone + Send + 'static,
{
    let weak: Weak<TtlCache<V>> = Arc::downgrade(cache);
    let period = cache.config.sweep_interval().max(Duration::from_millis(10));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(cache) = weak.upgrade() else { break };
                    let removed = cache.sweep();
                    if removed > 0 {
                        debug!(removed, remaining = cache.len(), "Cache sweep");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    })
}
