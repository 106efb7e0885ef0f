//! Two-level cache: entries are addressed by `(group, key)`
//!
//! Each group owns one [`Bucket`]; groups are sharded over `2^n` maps by
//! group name. Dropping a group is a single map removal no matter how many
//! keys it holds; the worker unlinks the members afterwards.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ahash::RandomState;
use parking_lot::RwLock;

use crate::bucket::Bucket;
use crate::config::Configuration;
use crate::engine::Engine;
use crate::error::Result;
use crate::item::{Item, TrackedItem};
use crate::secondary::SecondaryCache;
use crate::stats::CacheStats;
use crate::worker::{Eviction, Store};

type GroupMap<T> = HashMap<String, Arc<Bucket<T>>, RandomState>;

/// Group name → group bucket, sharded by group hash
pub(crate) struct Groups<T> {
    shards: Box<[RwLock<GroupMap<T>>]>,
    mask: u64,
    hasher: RandomState,
}

impl<T> Groups<T> {
    fn new(count: usize) -> Self {
        debug_assert!(count.is_power_of_two());
        Self {
            shards: (0..count)
                .map(|_| RwLock::new(HashMap::with_hasher(RandomState::new())))
                .collect(),
            mask: count as u64 - 1,
            hasher: RandomState::new(),
        }
    }

    fn shard(&self, group: &str) -> &RwLock<GroupMap<T>> {
        let hash = self.hasher.hash_one(group);
        &self.shards[(hash & self.mask) as usize]
    }

    /// Bucket of an existing group
    fn find(&self, group: &str) -> Option<Arc<Bucket<T>>> {
        self.shard(group).read().get(group).cloned()
    }

    /// Run `write` against the group's bucket, creating the group if needed.
    ///
    /// The shard lock is held until `write` returns, so the write cannot land
    /// in a bucket that [`Groups::remove`] has already detached.
    fn write<R>(&self, group: &str, write: impl FnOnce(&Bucket<T>) -> R) -> R {
        let shard = self.shard(group);
        {
            let groups = shard.read();
            if let Some(bucket) = groups.get(group) {
                return write(bucket);
            }
        }
        let mut groups = shard.write();
        let bucket = groups
            .entry(group.to_string())
            .or_insert_with(|| Arc::new(Bucket::new()));
        write(bucket)
    }

    /// Detach a group's bucket
    fn remove(&self, group: &str) -> Option<Arc<Bucket<T>>> {
        self.shard(group).write().remove(group)
    }

    fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| shard.read().values().map(|bucket| bucket.len()).sum::<usize>())
            .sum()
    }
}

impl<T: Send + Sync + 'static> Store<T> for Groups<T> {
    fn evict(&self, item: &Arc<Item<T>>, respect_pins: bool) -> Eviction {
        match self.find(item.group()) {
            Some(bucket) => bucket.evict(item, respect_pins),
            None => Eviction::Detached,
        }
    }

    fn drain(&self) -> Vec<Arc<Item<T>>> {
        let mut drained = Vec::new();
        for shard in self.shards.iter() {
            for (_, bucket) in shard.write().drain() {
                drained.extend(bucket.drain());
            }
        }
        drained
    }
}

/// Cache keyed by `(group, key)` with O(1) removal of whole groups
///
/// Shares the configuration, worker and size budget semantics of
/// [`Cache`](crate::Cache); the budget spans all groups.
///
/// A group is created by its first write and only removed by
/// [`LayeredCache::delete_all`] or [`LayeredCache::clear`]. Deleting the last
/// key of a group leaves an empty group behind, so callers that churn
/// through many group names should drop them with `delete_all`.
pub struct LayeredCache<T>
where
    T: Send + Sync + 'static,
{
    engine: Engine<T, Groups<T>>,
}

impl<T> LayeredCache<T>
where
    T: Send + Sync + 'static,
{
    /// Create a layered cache and start its worker
    ///
    /// # Panics
    /// Panics if the worker thread cannot be spawned; see
    /// [`LayeredCache::try_new`].
    pub fn new(config: Configuration<T>) -> Self {
        Self::try_new(config).expect("failed to spawn cache worker thread")
    }

    /// Create a layered cache, reporting a failed worker spawn as an error
    pub fn try_new(config: Configuration<T>) -> Result<Self> {
        let groups = Groups::new(config.buckets);
        Ok(Self {
            engine: Engine::new(config, groups)?,
        })
    }

    /// Get a live entry of `group`
    ///
    /// # Arguments
    /// * `group` - Group name
    /// * `key` - Key within the group
    ///
    /// # Returns
    /// * `Option<Arc<Item<T>>>` - `None` when absent or expired
    pub fn get(&self, group: &str, key: &str) -> Option<Arc<Item<T>>> {
        let bucket = self.find(group);
        self.engine.get(bucket.as_deref(), key)
    }

    /// Get an entry even if it has expired, without promoting it
    pub fn peek(&self, group: &str, key: &str) -> Option<Arc<Item<T>>> {
        let bucket = self.find(group);
        self.engine.peek(bucket.as_deref(), key)
    }

    /// Insert or overwrite an entry, creating the group if needed
    pub fn set(&self, group: &str, key: &str, value: T, ttl: Duration) -> Arc<Item<T>> {
        self.engine
            .store()
            .write(group, |bucket| self.engine.set(bucket, key, group, value, ttl))
    }

    /// Overwrite the value of a live entry, keeping its TTL and recency
    pub fn replace(&self, group: &str, key: &str, value: T) -> bool {
        let bucket = self.find(group);
        self.engine.replace(bucket.as_deref(), key, value)
    }

    /// Remove one entry; returns whether it was present
    ///
    /// The group itself stays even when this empties it.
    pub fn delete(&self, group: &str, key: &str) -> bool {
        let bucket = self.find(group);
        self.engine.delete(bucket.as_deref(), key)
    }

    /// Remove a whole group; returns whether it existed
    ///
    /// Cost does not depend on the size of the group.
    pub fn delete_all(&self, group: &str) -> bool {
        match self.engine.store().remove(group) {
            Some(bucket) => {
                self.engine.drop_group(bucket);
                true
            }
            None => false,
        }
    }

    /// Get a live entry, or load and store it on a miss
    ///
    /// Same contract as [`Cache::fetch`](crate::Cache::fetch).
    pub fn fetch<F, E>(
        &self,
        group: &str,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> std::result::Result<Arc<Item<T>>, E>
    where
        F: FnOnce() -> std::result::Result<T, E>,
    {
        if let Some(item) = self.get(group, key) {
            return Ok(item);
        }
        let value = loader()?;
        Ok(self.set(group, key, value, ttl))
    }

    /// Get a live entry and pin it until the guard is released
    pub fn tracking_get(&self, group: &str, key: &str) -> Option<TrackedItem<T>> {
        let bucket = self.find(group);
        self.engine.tracking_get(bucket.as_deref(), key)
    }

    /// Insert an entry and pin it in one step
    pub fn tracking_set(
        &self,
        group: &str,
        key: &str,
        value: T,
        ttl: Duration,
    ) -> TrackedItem<T> {
        self.engine.store().write(group, |bucket| {
            self.engine.tracking_set(bucket, key, group, value, ttl)
        })
    }

    /// Reset the TTL of an entry; returns whether it exists
    pub fn extend(&self, group: &str, key: &str, ttl: Duration) -> bool {
        let bucket = self.find(group);
        self.engine.extend(bucket.as_deref(), key, ttl)
    }

    /// Remove every entry of `group` whose key starts with `prefix`
    pub fn delete_prefix(&self, group: &str, prefix: &str) -> usize {
        self.delete_func(group, |key, _| key.starts_with(prefix))
    }

    /// Remove every entry of `group` matching `matches`
    ///
    /// `matches` runs under the group's write lock and must not call back
    /// into the cache.
    pub fn delete_func<F>(&self, group: &str, matches: F) -> usize
    where
        F: FnMut(&str, &Item<T>) -> bool,
    {
        match self.find(group) {
            Some(bucket) => self.engine.delete_matching(&bucket, matches),
            None => 0,
        }
    }

    /// Visit the entries of `group` until `f` returns false
    pub fn for_each_func<F>(&self, group: &str, mut f: F)
    where
        F: FnMut(&Arc<Item<T>>) -> bool,
    {
        if let Some(bucket) = self.find(group) {
            self.engine.for_each(&bucket, &mut f);
        }
    }

    /// A view of one group; the group is created on its first write
    pub fn get_or_create_secondary_cache(&self, group: &str) -> SecondaryCache<'_, T> {
        SecondaryCache::new(self, group)
    }

    /// Number of entries across all groups
    pub fn item_count(&self) -> usize {
        self.engine.store().len()
    }

    /// Drop every group without calling `on_delete`
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

    /// Stop the worker
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

    fn find(&self, group: &str) -> Option<Arc<Bucket<T>>> {
        self.engine.store().find(group)
    }
}
