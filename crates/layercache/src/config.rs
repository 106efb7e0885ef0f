//! Cache configuration
//!
//! A [`Configuration`] is built with chained setters and handed to
//! [`Cache::new`](crate::Cache::new) or
//! [`LayeredCache::new`](crate::LayeredCache::new). It is immutable after
//! that; only `max_size` can be changed later through the cache itself.

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::item::{Item, Sizeable};

/// Bucket count used when the configured one is unusable
pub const DEFAULT_BUCKETS: usize = 16;

/// Largest supported bucket count
pub const MAX_BUCKETS: usize = 1 << 16;

/// Callback invoked on the worker thread for every item that leaves the cache
pub type OnDelete<T> = Arc<dyn Fn(&Item<T>) + Send + Sync>;

/// Function computing the size charged for a value
pub type Sizer<T> = Arc<dyn Fn(&T) -> u64 + Send + Sync>;

/// Runtime parameters of a cache
pub struct Configuration<T> {
    pub(crate) max_size: u64,
    pub(crate) buckets: usize,
    pub(crate) items_to_prune: usize,
    pub(crate) promote_buffer: usize,
    pub(crate) gets_per_promote: i32,
    pub(crate) tracking: bool,
    pub(crate) on_delete: Option<OnDelete<T>>,
    pub(crate) sizer: Sizer<T>,
}

impl<T: 'static> Configuration<T> {
    /// Configuration with default settings
    pub fn new() -> Self {
        Self {
            max_size: 5000,
            buckets: DEFAULT_BUCKETS,
            items_to_prune: 500,
            promote_buffer: 1024,
            gets_per_promote: 3,
            tracking: false,
            on_delete: None,
            sizer: Arc::new(|_: &T| 1u64),
        }
    }

    /// Aggregate size the cache may hold before GC runs
    pub fn max_size(mut self, max: u64) -> Self {
        self.max_size = max;
        self
    }

    /// Number of key shards.
    ///
    /// Must be a power of two no larger than [`MAX_BUCKETS`]; anything else
    /// falls back to [`DEFAULT_BUCKETS`].
    pub fn buckets(mut self, count: usize) -> Self {
        if count.is_power_of_two() && count <= MAX_BUCKETS {
            self.buckets = count;
        } else {
            warn!(
                "Unsupported bucket count {}, using {}",
                count, DEFAULT_BUCKETS
            );
            self.buckets = DEFAULT_BUCKETS;
        }
        self
    }

    /// Minimum number of items a GC pass examines
    pub fn items_to_prune(mut self, count: usize) -> Self {
        self.items_to_prune = count;
        self
    }

    /// Capacity of the promotion queue; promotions beyond it are dropped
    pub fn promote_buffer(mut self, size: usize) -> Self {
        self.promote_buffer = size;
        self
    }

    /// Number of hits between two promotions of the same item
    pub fn gets_per_promote(mut self, count: i32) -> Self {
        self.gets_per_promote = count.max(1);
        self
    }

    /// Make eviction skip items pinned by `tracking_get`
    pub fn track(mut self) -> Self {
        self.tracking = true;
        self
    }

    /// Callback for every item that leaves the cache
    pub fn on_delete<F>(mut self, callback: F) -> Self
    where
        F: Fn(&Item<T>) + Send + Sync + 'static,
    {
        self.on_delete = Some(Arc::new(callback));
        self
    }

    /// Compute item sizes with `sizer` instead of counting every item as 1
    pub fn sizer<F>(mut self, sizer: F) -> Self
    where
        F: Fn(&T) -> u64 + Send + Sync + 'static,
    {
        self.sizer = Arc::new(sizer);
        self
    }
}

impl<T: Sizeable + 'static> Configuration<T> {
    /// Size items with their [`Sizeable`] implementation
    pub fn sized(self) -> Self {
        self.sizer(|value: &T| value.size())
    }
}

impl<T: 'static> Default for Configuration<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Configuration<T> {
    fn clone(&self) -> Self {
        Self {
            max_size: self.max_size,
            buckets: self.buckets,
            items_to_prune: self.items_to_prune,
            promote_buffer: self.promote_buffer,
            gets_per_promote: self.gets_per_promote,
            tracking: self.tracking,
            on_delete: self.on_delete.clone(),
            sizer: Arc::clone(&self.sizer),
        }
    }
}

impl<T> fmt::Debug for Configuration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("max_size", &self.max_size)
            .field("buckets", &self.buckets)
            .field("items_to_prune", &self.items_to_prune)
            .field("promote_buffer", &self.promote_buffer)
            .field("gets_per_promote", &self.gets_per_promote)
            .field("tracking", &self.tracking)
            .field("on_delete", &self.on_delete.is_some())
            .finish()
    }
}
