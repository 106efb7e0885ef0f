//! Traffic counters shared by a cache and its worker
//!
//! All counters are relaxed atomics; a reader sees each one individually
//! current, not a consistent snapshot across them.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lookup, write and eviction counts of one cache
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    inserts: AtomicU64,
    evictions: AtomicU64,
    /// Evictions since the last `take_dropped`
    dropped: AtomicU64,
}

impl CacheStats {
    /// Zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a lookup that returned a live entry
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a lookup that found nothing, or only an expired entry
    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an entry the worker pruned to stay within budget
    pub fn record_eviction(&self) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a `set` or `tracking_set`
    pub fn record_insert(&self) {
        self.inserts.fetch_add(1, Ordering::Relaxed);
    }

    /// Lookups that hit
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Lookups that missed
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Entries pruned by GC since creation or the last `reset`
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Writes that stored a new item, replacements excluded
    pub fn inserts(&self) -> u64 {
        self.inserts.load(Ordering::Relaxed)
    }

    /// Evictions since the previous call; resets the count
    pub fn take_dropped(&self) -> u64 {
        self.dropped.swap(0, Ordering::Relaxed)
    }

    /// Share of lookups that hit, or 0 before the first lookup
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        match hits + self.misses() {
            0 => 0.0,
            lookups => hits as f64 / lookups as f64,
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        for counter in [
            &self.hits,
            &self.misses,
            &self.inserts,
            &self.evictions,
            &self.dropped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ratio_counts_lookups() {
        let stats = CacheStats::new();
        assert_eq!(stats.hit_ratio(), 0.0);

        stats.record_hit();
        stats.record_miss();
        stats.record_miss();
        stats.record_miss();

        assert_eq!(stats.hits(), 1);
        assert_eq!(stats.misses(), 3);
        assert_eq!(stats.hit_ratio(), 0.25);
    }

    #[test]
    fn test_take_dropped_is_separate_from_evictions() {
        let stats = CacheStats::new();

        stats.record_eviction();
        stats.record_eviction();
        assert_eq!(stats.take_dropped(), 2);
        assert_eq!(stats.take_dropped(), 0);

        stats.record_eviction();
        assert_eq!(stats.evictions(), 3);
        assert_eq!(stats.take_dropped(), 1);
    }

    #[test]
    fn test_reset_zeroes_everything() {
        let stats = CacheStats::new();
        stats.record_hit();
        stats.record_miss();
        stats.record_insert();
        stats.record_eviction();
        stats.reset();

        assert_eq!(stats.hits(), 0);
        assert_eq!(stats.misses(), 0);
        assert_eq!(stats.inserts(), 0);
        assert_eq!(stats.evictions(), 0);
        assert_eq!(stats.take_dropped(), 0);
        assert_eq!(stats.hit_ratio(), 0.0);
    }
}
