//! Cache entries
//!
//! An [`Item`] is shared between its bucket, the worker's recency list and
//! any caller holding a lookup result, so every mutable field is atomic.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicI32, AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// List slot of an item the worker has not linked yet
pub(crate) const UNLINKED: usize = usize::MAX;

/// List slot of an item the worker has removed for good
pub(crate) const DELETED: usize = usize::MAX - 1;

/// Capability for values that report their own logical size.
///
/// The size is application-defined (bytes, object count, ...) and is what
/// `max_size` budgets against. Values without this capability count as 1.
pub trait Sizeable {
    /// Logical size of the value
    fn size(&self) -> u64;
}

impl Sizeable for String {
    fn size(&self) -> u64 {
        self.len() as u64
    }
}

impl Sizeable for Vec<u8> {
    fn size(&self) -> u64 {
        self.len() as u64
    }
}

impl Sizeable for Box<[u8]> {
    fn size(&self) -> u64 {
        self.len() as u64
    }
}

impl<S: Sizeable + ?Sized> Sizeable for Arc<S> {
    fn size(&self) -> u64 {
        (**self).size()
    }
}

/// Current wall-clock time in nanoseconds since the Unix epoch
pub(crate) fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

fn deadline(ttl: Duration) -> i64 {
    let ttl = i64::try_from(ttl.as_nanos()).unwrap_or(i64::MAX);
    now_nanos().saturating_add(ttl)
}

/// A single cache entry
pub struct Item<T> {
    key: String,
    group: String,
    value: T,
    size: u64,
    /// Absolute expiry, nanoseconds since the Unix epoch
    expires: AtomicI64,
    /// Hits since the last promotion
    promotions: AtomicI32,
    /// Live [`TrackedItem`] guards
    refs: AtomicI32,
    /// Recency list handle. Only the worker reads or writes it.
    slot: AtomicUsize,
}

impl<T> Item<T> {
    pub(crate) fn new(key: &str, group: &str, value: T, size: u64, ttl: Duration) -> Self {
        Self::with_expiry(key, group, value, size, deadline(ttl))
    }

    pub(crate) fn with_expiry(key: &str, group: &str, value: T, size: u64, expires: i64) -> Self {
        Self {
            key: key.to_string(),
            group: group.to_string(),
            value,
            size,
            expires: AtomicI64::new(expires),
            promotions: AtomicI32::new(0),
            refs: AtomicI32::new(0),
            slot: AtomicUsize::new(UNLINKED),
        }
    }

    /// Entry key
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Group the entry belongs to; empty for a flat [`Cache`](crate::Cache)
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Stored value
    pub fn value(&self) -> &T {
        &self.value
    }

    /// Size charged against the cache budget
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Whether the entry is past its expiry
    pub fn expired(&self) -> bool {
        now_nanos() >= self.expires_at()
    }

    /// Time left until expiry; negative once expired
    pub fn ttl(&self) -> TimeDelta {
        TimeDelta::nanoseconds(self.expires_at().saturating_sub(now_nanos()))
    }

    /// Absolute expiry time
    pub fn expires(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.expires_at())
    }

    /// Move the expiry to `ttl` from now
    pub fn extend(&self, ttl: Duration) {
        self.expires.store(deadline(ttl), Ordering::Relaxed);
    }

    /// Number of live [`TrackedItem`] guards pinning this entry
    pub fn ref_count(&self) -> i32 {
        self.refs.load(Ordering::Acquire)
    }

    pub(crate) fn expires_at(&self) -> i64 {
        self.expires.load(Ordering::Relaxed)
    }

    /// Count a hit; true once every `threshold` hits, resetting the count.
    pub(crate) fn should_promote(&self, threshold: i32) -> bool {
        let hits = self.promotions.fetch_add(1, Ordering::Relaxed) + 1;
        if hits >= threshold {
            self.promotions.store(0, Ordering::Relaxed);
            return true;
        }
        false
    }

    pub(crate) fn track(&self) {
        self.refs.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn release(&self) {
        self.refs.fetch_sub(1, Ordering::AcqRel);
    }

    pub(crate) fn slot(&self) -> usize {
        self.slot.load(Ordering::Relaxed)
    }

    pub(crate) fn set_slot(&self, slot: usize) {
        self.slot.store(slot, Ordering::Relaxed);
    }
}

impl<T: fmt::Debug> fmt::Debug for Item<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Item")
            .field("key", &self.key)
            .field("group", &self.group)
            .field("value", &self.value)
            .field("size", &self.size)
            .field("expires", &self.expires())
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// A pinned entry.
///
/// While at least one guard is alive the entry is skipped by eviction (when
/// the cache was configured with `track()`). The pin is released by
/// [`TrackedItem::release`] or by dropping the guard.
pub struct TrackedItem<T> {
    item: Arc<Item<T>>,
}

impl<T> TrackedItem<T> {
    /// Wrap an item whose pin count was already incremented
    pub(crate) fn new(item: Arc<Item<T>>) -> Self {
        Self { item }
    }

    /// Pin `item` and wrap it
    pub(crate) fn pin(item: Arc<Item<T>>) -> Self {
        item.track();
        Self::new(item)
    }

    /// Shared handle to the underlying entry
    pub fn item(&self) -> &Arc<Item<T>> {
        &self.item
    }

    /// Drop the pin
    pub fn release(self) {}
}

impl<T> Deref for TrackedItem<T> {
    type Target = Item<T>;

    fn deref(&self) -> &Item<T> {
        &self.item
    }
}

impl<T> Drop for TrackedItem<T> {
    fn drop(&mut self) {
        self.item.release();
    }
}

impl<T: fmt::Debug> fmt::Debug for TrackedItem<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TrackedItem").field(&self.item).finish()
    }
}
