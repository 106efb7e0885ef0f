//! Group-scoped view of a [`LayeredCache`]

use std::sync::Arc;
use std::time::Duration;

use crate::item::{Item, TrackedItem};
use crate::layered::LayeredCache;

/// Handle on one group of a [`LayeredCache`]
///
/// Owns no entries; every call is forwarded to the layered cache with the
/// group filled in. The group does not need to exist yet.
pub struct SecondaryCache<'a, T>
where
    T: Send + Sync + 'static,
{
    cache: &'a LayeredCache<T>,
    group: String,
}

impl<'a, T> SecondaryCache<'a, T>
where
    T: Send + Sync + 'static,
{
    pub(crate) fn new(cache: &'a LayeredCache<T>, group: &str) -> Self {
        Self {
            cache,
            group: group.to_string(),
        }
    }

    /// Group this view is scoped to
    pub fn group(&self) -> &str {
        &self.group
    }

    /// See [`LayeredCache::get`]
    pub fn get(&self, key: &str) -> Option<Arc<Item<T>>> {
        self.cache.get(&self.group, key)
    }

    /// See [`LayeredCache::peek`]
    pub fn peek(&self, key: &str) -> Option<Arc<Item<T>>> {
        self.cache.peek(&self.group, key)
    }

    /// See [`LayeredCache::set`]
    pub fn set(&self, key: &str, value: T, ttl: Duration) -> Arc<Item<T>> {
        self.cache.set(&self.group, key, value, ttl)
    }

    /// See [`LayeredCache::replace`]
    pub fn replace(&self, key: &str, value: T) -> bool {
        self.cache.replace(&self.group, key, value)
    }

    /// See [`LayeredCache::delete`]
    pub fn delete(&self, key: &str) -> bool {
        self.cache.delete(&self.group, key)
    }

    /// See [`LayeredCache::fetch`]
    pub fn fetch<F, E>(&self, key: &str, ttl: Duration, loader: F) -> Result<Arc<Item<T>>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        self.cache.fetch(&self.group, key, ttl, loader)
    }

    /// See [`LayeredCache::tracking_get`]
    pub fn tracking_get(&self, key: &str) -> Option<TrackedItem<T>> {
        self.cache.tracking_get(&self.group, key)
    }

    /// See [`LayeredCache::tracking_set`]
    pub fn tracking_set(&self, key: &str, value: T, ttl: Duration) -> TrackedItem<T> {
        self.cache.tracking_set(&self.group, key, value, ttl)
    }

    /// See [`LayeredCache::extend`]
    pub fn extend(&self, key: &str, ttl: Duration) -> bool {
        self.cache.extend(&self.group, key, ttl)
    }
}
