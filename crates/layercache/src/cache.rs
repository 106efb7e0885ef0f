//! Flat cache: one keyspace sharded over `2^n` buckets

use std::sync::Arc;
use std::time::Duration;

use crate::bucket::{Bucket, Buckets};
use crate::config::Configuration;
use crate::engine::Engine;
use crate::error::Result;
use crate::item::{Item, TrackedItem};
use crate::stats::CacheStats;

/// Concurrent key → value cache with sampled LRU eviction
///
/// Reads and writes only take the lock of the key's bucket. Recency and
/// size bookkeeping happen asynchronously on a background worker, so
/// effects such as eviction become visible "eventually"; use
/// [`Cache::sync_updates`] to wait for them.
pub struct Cache<T>
where
    T: Send + Sync + 'static,
{
    engine: Engine<T, Buckets<T>>,
}

impl<T> Cache<T>
where
    T: Send + Sync + 'static,
{
    /// Create a cache and start its worker
    ///
    /// # Panics
    /// Panics if the worker thread cannot be spawned; see [`Cache::try_new`].
    pub fn new(config: Configuration<T>) -> Self {
        Self::try_new(config).expect("failed to spawn cache worker thread")
    }

    /// Create a cache, reporting a failed worker spawn as an error
    pub fn try_new(config: Configuration<T>) -> Result<Self> {
        let buckets = Buckets::new(config.buckets);
        Ok(Self {
            engine: Engine::new(config, buckets)?,
        })
    }

    /// Get a live entry
    ///
    /// # Arguments
    /// * `key` - Entry key
    ///
    /// # Returns
    /// * `Option<Arc<Item<T>>>` - `None` when the key is absent or expired
    pub fn get(&self, key: &str) -> Option<Arc<Item<T>>> {
        self.engine.get(Some(self.bucket(key)), key)
    }

    /// Get an entry even if it has expired, without promoting it
    pub fn peek(&self, key: &str) -> Option<Arc<Item<T>>> {
        self.engine.peek(Some(self.bucket(key)), key)
    }

    /// Insert or overwrite an entry
    ///
    /// # Arguments
    /// * `key` - Entry key
    /// * `value` - Payload
    /// * `ttl` - Time to live; `Duration::ZERO` stores an already expired entry
    ///
    /// # Returns
    /// * `Arc<Item<T>>` - The stored item
    pub fn set(&self, key: &str, value: T, ttl: Duration) -> Arc<Item<T>> {
        self.engine.set(self.bucket(key), key, "", value, ttl)
    }

    /// Overwrite the value of a live entry, keeping its TTL and recency
    ///
    /// Returns false, and stores nothing, when the key is absent or expired.
    pub fn replace(&self, key: &str, value: T) -> bool {
        self.engine.replace(Some(self.bucket(key)), key, value)
    }

    /// Remove an entry; returns whether it was present
    pub fn delete(&self, key: &str) -> bool {
        self.engine.delete(Some(self.bucket(key)), key)
    }

    /// Get a live entry, or load and store it on a miss
    ///
    /// Concurrent misses on the same key may each run `loader`. A loader
    /// error is returned unchanged and nothing is cached.
    ///
    /// # Arguments
    /// * `key` - Entry key
    /// * `ttl` - Time to live for a loaded value
    /// * `loader` - Produces the value on a miss
    pub fn fetch<F, E>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> std::result::Result<Arc<Item<T>>, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        if let Some(item) = self.get(key) {
            return Ok(item);
        }
        let value = loader()?;
        Ok(self.set(key, value, ttl))
    }

    /// Get a live entry and pin it until the returned guard is released
    ///
    /// Pins only protect from eviction when the cache was configured with
    /// [`Configuration::track`].
    pub fn tracking_get(&self, key: &str) -> Option<TrackedItem<T>> {
        self.engine.tracking_get(Some(self.bucket(key)), key)
    }

    /// Insert an entry and pin it in one step
    pub fn tracking_set(&self, key: &str, value: T, ttl: Duration) -> TrackedItem<T> {
        self.engine.tracking_set(self.bucket(key), key, "", value, ttl)
    }

    /// Reset the TTL of an entry to `ttl` from now; returns whether it exists
    pub fn extend(&self, key: &str, ttl: Duration) -> bool {
        self.engine.extend(Some(self.bucket(key)), key, ttl)
    }

    /// Number of entries across all buckets, expired ones included
    pub fn item_count(&self) -> usize {
        self.engine.store().len()
    }

    /// Remove every entry whose key starts with `prefix`
    pub fn delete_prefix(&self, prefix: &str) -> usize {
        self.delete_func(|key, _| key.starts_with(prefix))
    }

    /// Remove every entry matching `matches`; returns how many were removed
    ///
    /// `matches` runs under each bucket's write lock and must not call back
    /// into the cache. Use [`Cache::for_each_func`] to collect keys first
    /// when the decision needs the cache.
    pub fn delete_func<F>(&self, mut matches: F) -> usize
    where
        F: FnMut(&str, &Item<T>) -> bool,
    {
        self.engine
            .store()
            .iter()
            .map(|bucket| self.engine.delete_matching(bucket, &mut matches))
            .sum()
    }

    /// Visit entries until `f` returns false
    ///
    /// Each bucket is copied before it is visited, so `f` may use the cache.
    pub fn for_each_func<F>(&self, mut f: F)
    where
        F: FnMut(&Arc<Item<T>>) -> bool,
    {
        for bucket in self.engine.store().iter() {
            if !self.engine.for_each(bucket, &mut f) {
                break;
            }
        }
    }

    /// Drop every entry without calling `on_delete`
    pub fn clear(&self) -> Result<()> {
        self.engine.clear()
    }

    /// Change the size budget; prunes at once if it is now exceeded
    pub fn set_max_size(&self, max: u64) -> Result<()> {
        self.engine.set_max_size(max)
    }

    /// Block until every update and promotion queued so far is applied
    pub fn sync_updates(&self) -> Result<()> {
        self.engine.sync_updates()
    }

    /// Run one eviction pass; returns the number of entries dropped
    pub fn gc(&self) -> Result<usize> {
        self.engine.gc()
    }

    /// Aggregate size of the entries the worker has accounted for
    pub fn size(&self) -> Result<u64> {
        self.engine.size()
    }

    /// Stop the worker. Updates keep queueing until [`Cache::restart`].
    pub fn stop(&self) -> Result<()> {
        self.engine.stop()
    }

    /// Resume a stopped worker, or replace one that panicked
    pub fn restart(&self) -> Result<()> {
        self.engine.restart()
    }

    /// Entries dropped by GC since the previous call
    pub fn get_dropped(&self) -> u64 {
        self.engine.stats().take_dropped()
    }

    /// Hit, miss, insert and eviction counters
    pub fn stats(&self) -> &CacheStats {
        self.engine.stats()
    }

    fn bucket(&self, key: &str) -> &Bucket<T> {
        self.engine.store().bucket(key)
    }
}
