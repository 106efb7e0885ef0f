//! Key shards
//!
//! A [`Bucket`] is one lock-guarded slice of the keyspace. Operations take
//! exactly one bucket lock and never wait on the worker.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use ahash::RandomState;
use parking_lot::RwLock;

use crate::item::{Item, TrackedItem};
use crate::worker::{Eviction, Store};

/// One shard: key → item map behind a reader/writer lock
pub(crate) struct Bucket<T> {
    lookup: RwLock<HashMap<String, Arc<Item<T>>, RandomState>>,
}

impl<T> Bucket<T> {
    pub(crate) fn new() -> Self {
        Self {
            lookup: RwLock::new(HashMap::with_hasher(RandomState::new())),
        }
    }

    /// Current entry for `key`, expired or not
    pub(crate) fn get(&self, key: &str) -> Option<Arc<Item<T>>> {
        self.lookup.read().get(key).cloned()
    }

    /// Pin the live entry for `key`.
    ///
    /// The pin is taken under the read lock, so it cannot interleave with
    /// [`Bucket::evict`], which checks pins under the write lock.
    pub(crate) fn pin(&self, key: &str) -> Option<TrackedItem<T>> {
        let lookup = self.lookup.read();
        let item = lookup.get(key).filter(|item| !item.expired())?;
        Some(TrackedItem::pin(Arc::clone(item)))
    }

    /// Insert a fresh item, returning it and the entry it displaced
    pub(crate) fn set(
        &self,
        key: &str,
        group: &str,
        value: T,
        size: u64,
        ttl: Duration,
    ) -> (Arc<Item<T>>, Option<Arc<Item<T>>>) {
        let item = Arc::new(Item::new(key, group, value, size, ttl));
        let previous = self.insert(Arc::clone(&item));
        (item, previous)
    }

    /// Insert a prebuilt item, returning the entry it displaced
    pub(crate) fn insert(&self, item: Arc<Item<T>>) -> Option<Arc<Item<T>>> {
        self.lookup.write().insert(item.key().to_string(), item)
    }

    /// Swap in a new value for a live entry, keeping its expiry.
    ///
    /// Returns the new and the displaced item, or `None` when the key is
    /// absent or expired.
    pub(crate) fn replace(
        &self,
        key: &str,
        value: T,
        size: u64,
    ) -> Option<(Arc<Item<T>>, Arc<Item<T>>)> {
        let mut lookup = self.lookup.write();
        let slot = lookup.get_mut(key).filter(|item| !item.expired())?;
        let item = Arc::new(Item::with_expiry(
            slot.key(),
            slot.group(),
            value,
            size,
            slot.expires_at(),
        ));
        let previous = std::mem::replace(slot, Arc::clone(&item));
        Some((item, previous))
    }

    pub(crate) fn delete(&self, key: &str) -> Option<Arc<Item<T>>> {
        self.lookup.write().remove(key)
    }

    /// Remove every entry matching `matches`, returning the removed items.
    ///
    /// `matches` runs with the write lock held.
    pub(crate) fn delete_matching<F>(&self, mut matches: F) -> Vec<Arc<Item<T>>>
    where
        F: FnMut(&str, &Item<T>) -> bool,
    {
        let mut removed = Vec::new();
        self.lookup.write().retain(|key, item| {
            if matches(key.as_str(), &**item) {
                removed.push(Arc::clone(item));
                false
            } else {
                true
            }
        });
        removed
    }

    /// Remove `item` if this bucket still holds exactly that item.
    ///
    /// With `respect_pins`, an item with live [`TrackedItem`] guards stays.
    pub(crate) fn evict(&self, item: &Arc<Item<T>>, respect_pins: bool) -> Eviction {
        let mut lookup = self.lookup.write();
        match lookup.get(item.key()) {
            Some(current) if Arc::ptr_eq(current, item) => {
                if respect_pins && item.ref_count() > 0 {
                    return Eviction::Pinned;
                }
                lookup.remove(item.key());
                Eviction::Evicted
            }
            _ => Eviction::Detached,
        }
    }

    /// Copy of the current entries, taken under the read lock
    pub(crate) fn snapshot(&self) -> Vec<Arc<Item<T>>> {
        self.lookup.read().values().cloned().collect()
    }

    /// Take every entry out of the bucket
    pub(crate) fn drain(&self) -> Vec<Arc<Item<T>>> {
        self.lookup.write().drain().map(|(_, item)| item).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.lookup.read().len()
    }
}

/// Fixed array of `2^n` buckets addressed by key hash
pub(crate) struct Buckets<T> {
    shards: Box<[Bucket<T>]>,
    mask: u64,
    hasher: RandomState,
}

impl<T> Buckets<T> {
    /// `count` must be a power of two; [`Configuration`](crate::Configuration)
    /// guarantees it.
    pub(crate) fn new(count: usize) -> Self {
        debug_assert!(count.is_power_of_two());
        Self {
            shards: (0..count).map(|_| Bucket::new()).collect(),
            mask: count as u64 - 1,
            hasher: RandomState::new(),
        }
    }

    pub(crate) fn bucket(&self, key: &str) -> &Bucket<T> {
        let hash = self.hasher.hash_one(key);
        &self.shards[(hash & self.mask) as usize]
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = &Bucket<T>> + '_ {
        self.shards.iter()
    }

    pub(crate) fn len(&self) -> usize {
        self.shards.iter().map(Bucket::len).sum()
    }
}

impl<T: Send + Sync + 'static> Store<T> for Buckets<T> {
    fn evict(&self, item: &Arc<Item<T>>, respect_pins: bool) -> Eviction {
        self.bucket(item.key()).evict(item, respect_pins)
    }

    fn drain(&self) -> Vec<Arc<Item<T>>> {
        self.iter().flat_map(Bucket::drain).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_get_missing() {
        let bucket = Bucket::<String>::new();
        assert!(bucket.get("power").is_none());
    }

    #[test]
    fn test_set_new() {
        let bucket = Bucket::new();
        let (item, previous) = bucket.set("power", "", "9000".to_string(), 1, MINUTE);
        assert!(previous.is_none());
        assert_eq!(item.value(), "9000");

        let found = bucket.get("power").unwrap();
        assert!(Arc::ptr_eq(&found, &item));
    }

    #[test]
    fn test_set_existing_returns_previous() {
        let bucket = Bucket::new();
        let (first, _) = bucket.set("power", "", "9000".to_string(), 1, MINUTE);
        let (second, previous) = bucket.set("power", "", "9001".to_string(), 1, MINUTE);

        assert!(Arc::ptr_eq(&previous.unwrap(), &first));
        assert_eq!(bucket.get("power").unwrap().value(), "9001");
        assert_eq!(second.value(), "9001");
        assert_eq!(bucket.len(), 1);
    }

    #[test]
    fn test_delete() {
        let bucket = Bucket::new();
        bucket.set("power", "", 9000, 1, MINUTE);
        assert_eq!(*bucket.delete("power").unwrap().value(), 9000);
        assert!(bucket.get("power").is_none());
        assert!(bucket.delete("power").is_none());
    }

    #[test]
    fn test_replace_keeps_expiry() {
        let bucket = Bucket::new();
        let (original, _) = bucket.set("power", "group", 9000, 1, MINUTE);

        let (item, previous) = bucket.replace("power", 9002, 3).unwrap();
        assert!(Arc::ptr_eq(&previous, &original));
        assert_eq!(item.expires_at(), original.expires_at());
        assert_eq!(item.group(), "group");
        assert_eq!(item.size(), 3);
        assert_eq!(*bucket.get("power").unwrap().value(), 9002);
    }

    #[test]
    fn test_replace_missing_or_expired() {
        let bucket = Bucket::new();
        assert!(bucket.replace("power", 1, 1).is_none());
        assert!(bucket.get("power").is_none());

        bucket.set("stale", "", 1, 1, Duration::ZERO);
        assert!(bucket.replace("stale", 2, 1).is_none());
        assert_eq!(*bucket.get("stale").unwrap().value(), 1);
    }

    #[test]
    fn test_evict_only_current_unpinned() {
        let bucket = Bucket::new();
        let (old, _) = bucket.set("a", "", 1, 1, MINUTE);
        let (current, _) = bucket.set("a", "", 2, 1, MINUTE);

        assert_eq!(bucket.evict(&old, true), Eviction::Detached);

        let pinned = bucket.pin("a").unwrap();
        assert_eq!(bucket.evict(&current, true), Eviction::Pinned);
        assert_eq!(bucket.evict(&current, false), Eviction::Evicted);
        assert!(bucket.get("a").is_none());
        drop(pinned);
        assert_eq!(current.ref_count(), 0);
    }

    #[test]
    fn test_pin_skips_expired() {
        let bucket = Bucket::new();
        bucket.set("a", "", 1, 1, Duration::ZERO);
        assert!(bucket.pin("a").is_none());
    }

    #[test]
    fn test_delete_matching() {
        let bucket = Bucket::new();
        for key in ["user:1", "user:2", "order:1"] {
            bucket.set(key, "", key.len(), 1, MINUTE);
        }

        let removed = bucket.delete_matching(|key, _| key.starts_with("user:"));
        assert_eq!(removed.len(), 2);
        assert_eq!(bucket.len(), 1);
        assert!(bucket.get("order:1").is_some());
    }

    #[test]
    fn test_buckets_route_consistently() {
        let buckets = Buckets::new(8);
        buckets.bucket("spice").set("spice", "", 1, 1, MINUTE);
        buckets.bucket("worm").set("worm", "", 2, 1, MINUTE);

        assert!(buckets.bucket("spice").get("spice").is_some());
        assert!(buckets.bucket("worm").get("worm").is_some());
        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets.iter().count(), 8);

        assert_eq!(Store::drain(&buckets).len(), 2);
        assert_eq!(buckets.len(), 0);
    }
}
