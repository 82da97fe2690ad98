//! Best-effort TTL cache in front of expensive pipeline calls

use std::fmt;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, trace, warn};

use super::backend::{CacheBackend, CacheEntry, FileBackend, MemoryBackend, RedisBackend};
use super::key::{CacheKey, KeyPattern};
use super::stats::{CacheStats, MetricsCollector};
use super::CacheError;
use crate::resilience::{Clock, SystemClock};

/// TTL cache over a pluggable backend
///
/// The store never fails its caller: backend and serialization errors are
/// logged, counted in [`CacheStats::errors`] and treated as a miss (on read)
/// or a skipped write. Expired entries are evicted lazily when a lookup finds
/// them, or in bulk through [`purge_expired`](Self::purge_expired).
///
/// Clones share the backend and counters; construct one store at startup and
/// hand clones to whatever needs caching.
pub struct CacheStore<C: Clock = SystemClock> {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Duration,
    metrics: MetricsCollector,
    clock: Arc<C>,
}

impl<C: Clock> Clone for CacheStore<C> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            default_ttl: self.default_ttl,
            metrics: self.metrics.clone(),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<C: Clock> fmt::Debug for CacheStore<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheStore")
            .field("backend", &self.backend)
            .field("default_ttl", &self.default_ttl)
            .field("stats", &self.metrics.snapshot())
            .finish()
    }
}

enum Lookup {
    Found(serde_json::Value),
    Missing,
}

impl CacheStore<SystemClock> {
    /// Store over any backend, on the system clock
    pub fn new(backend: Arc<dyn CacheBackend>, default_ttl: Duration) -> Self {
        Self::with_clock(backend, default_ttl, SystemClock)
    }

    /// Durable store in `directory`
    pub fn file<P: AsRef<Path>>(directory: P, default_ttl: Duration) -> Result<Self, CacheError> {
        Ok(Self::new(Arc::new(FileBackend::new(directory)?), default_ttl))
    }

    /// Shared store on a Redis-compatible service
    pub fn redis(url: &str, namespace: &str, default_ttl: Duration) -> Result<Self, CacheError> {
        Ok(Self::new(Arc::new(RedisBackend::new(url, namespace)?), default_ttl))
    }

    /// Process-local store
    pub fn memory(default_ttl: Duration) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), default_ttl)
    }
}

impl<C: Clock> CacheStore<C> {
    /// Store with a custom clock (useful for testing expiry)
    pub fn with_clock(backend: Arc<dyn CacheBackend>, default_ttl: Duration, clock: C) -> Self {
        Self { backend, default_ttl, metrics: MetricsCollector::default(), clock: Arc::new(clock) }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Look up and deserialize a value; `None` on miss, expiry or error
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let Lookup::Found(value) = self.lookup(key) else {
            self.metrics.record_miss();
            return None;
        };

        match serde_json::from_value(value) {
            Ok(decoded) => {
                self.metrics.record_hit();
                trace!(key, "cache hit");
                Some(decoded)
            }
            Err(err) => {
                self.metrics.record_error();
                self.metrics.record_miss();
                warn!(backend = self.backend.name(), key, error = %err, "cached value has unexpected shape");
                None
            }
        }
    }

    /// Look up the raw JSON value
    pub fn get_value(&self, key: &str) -> Option<serde_json::Value> {
        match self.lookup(key) {
            Lookup::Found(value) => {
                self.metrics.record_hit();
                trace!(key, "cache hit");
                Some(value)
            }
            Lookup::Missing => {
                self.metrics.record_miss();
                None
            }
        }
    }

    /// Store `value` for `ttl`; returns whether the write succeeded
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) -> bool {
        let result = if ttl.is_zero() {
            Err(CacheError::InvalidTtl(ttl))
        } else {
            serde_json::to_value(value)
                .map_err(CacheError::from)
                .and_then(|value| CacheEntry::new(value, self.clock.utc_now(), ttl))
                .and_then(|entry| self.backend.store(key, &entry, ttl))
        };

        match result {
            Ok(()) => {
                trace!(key, ttl_ms = ttl.as_millis() as u64, "cache set");
                true
            }
            Err(err) => {
                self.metrics.record_error();
                warn!(backend = self.backend.name(), key, error = %err, "cache write failed");
                false
            }
        }
    }

    /// Store `value` for the configured default TTL
    pub fn set_default<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        self.set(key, value, self.default_ttl)
    }

    /// Remove one key; returns whether an entry was removed
    pub fn remove(&self, key: &str) -> bool {
        match self.backend.remove(key) {
            Ok(removed) => removed,
            Err(err) => {
                self.metrics.record_error();
                warn!(backend = self.backend.name(), key, error = %err, "cache remove failed");
                false
            }
        }
    }

    /// Remove every entry whose key matches the glob `pattern`
    #[instrument(skip(self), fields(backend = self.backend.name()))]
    pub fn invalidate(&self, pattern: &str) -> usize {
        let removed = KeyPattern::new(pattern).and_then(|p| self.backend.remove_matching(&p));
        match removed {
            Ok(count) => {
                debug!(count, "cache invalidated");
                count
            }
            Err(err) => {
                self.metrics.record_error();
                warn!(error = %err, "cache invalidation failed");
                0
            }
        }
    }

    /// Remove every entry
    pub fn invalidate_all(&self) -> usize {
        self.invalidate(KeyPattern::ALL)
    }

    /// Remove every entry already expired; there is no background sweep
    pub fn purge_expired(&self) -> usize {
        match self.backend.purge_expired(self.clock.utc_now()) {
            Ok(count) => {
                debug!(backend = self.backend.name(), count, "expired cache entries purged");
                count
            }
            Err(err) => {
                self.metrics.record_error();
                warn!(backend = self.backend.name(), error = %err, "cache purge failed");
                0
            }
        }
    }

    /// Return the cached value for `key`, or run `operation` and cache its
    /// success
    ///
    /// Failures are returned as-is and never cached.
    pub fn cached<T, E, F>(&self, key: &str, ttl: Duration, operation: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let value = operation()?;
        self.set(key, &value, ttl);
        Ok(value)
    }

    /// Async counterpart of [`cached`](Self::cached)
    ///
    /// Backend I/O runs on tokio's blocking pool so file or network latency
    /// never stalls the async worker.
    pub async fn cached_async<T, E, F, Fut>(&self, key: &str, ttl: Duration, operation: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get_async::<T>(key).await {
            return Ok(value);
        }

        let value = operation().await?;
        match serde_json::to_value(&value) {
            Ok(json) => {
                self.set_value_async(key, json, ttl).await;
            }
            Err(err) => {
                self.metrics.record_error();
                warn!(backend = self.backend.name(), key, error = %err, "cache write failed");
            }
        }
        Ok(value)
    }

    /// Turn `operation` into a function whose results are cached per argument
    /// value
    ///
    /// Keys are derived with [`CacheKey::from_call`] under the `name` prefix,
    /// so `invalidate("{name}:*")` clears this function's entries.
    pub fn wrap<A, T, E, F>(&self, name: &str, ttl: Duration, operation: F) -> impl Fn(&A) -> Result<T, E>
    where
        A: Serialize + ?Sized,
        T: Serialize + DeserializeOwned,
        F: Fn(&A) -> Result<T, E>,
    {
        let store = self.clone();
        let name = name.to_string();
        move |args: &A| match CacheKey::from_call(&name, args) {
            Ok(key) => store.cached(&key, ttl, || operation(args)),
            Err(err) => {
                store.metrics.record_error();
                warn!(operation = %name, error = %err, "cache key derivation failed");
                operation(args)
            }
        }
    }

    /// Snapshot of hit/miss/error counters
    pub fn stats(&self) -> CacheStats {
        self.metrics.snapshot()
    }

    pub fn reset_stats(&self) {
        self.metrics.reset();
    }

    fn lookup(&self, key: &str) -> Lookup {
        let entry = match self.backend.load(key) {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                trace!(key, "cache miss");
                return Lookup::Missing;
            }
            Err(err) => {
                self.metrics.record_error();
                warn!(backend = self.backend.name(), key, error = %err, "cache read failed");
                return Lookup::Missing;
            }
        };

        if entry.is_valid_at(self.clock.utc_now()) {
            return Lookup::Found(entry.value);
        }

        debug!(key, expired_at = %entry.expires_at, "cache entry expired, evicting");
        if let Err(err) = self.backend.remove_if_expired(key, entry.expires_at) {
            self.metrics.record_error();
            warn!(backend = self.backend.name(), key, error = %err, "cache eviction failed");
        }
        Lookup::Missing
    }

    async fn get_async<T>(&self, key: &str) -> Option<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let store = self.clone();
        let key = key.to_string();
        match tokio::task::spawn_blocking(move || store.get::<T>(&key)).await {
            Ok(value) => value,
            Err(err) => {
                self.metrics.record_error();
                self.metrics.record_miss();
                warn!(backend = self.backend.name(), error = %err, "cache read task failed");
                None
            }
        }
    }

    async fn set_value_async(&self, key: &str, value: serde_json::Value, ttl: Duration) -> bool {
        let store = self.clone();
        let key = key.to_string();
        match tokio::task::spawn_blocking(move || store.set(&key, &value, ttl)).await {
            Ok(stored) => stored,
            Err(err) => {
                self.metrics.record_error();
                warn!(backend = self.backend.name(), error = %err, "cache write task failed");
                false
            }
        }
    }
}
