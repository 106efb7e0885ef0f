//! Background worker
//!
//! Every cache owns one worker thread. It is the only code that touches the
//! recency list and the aggregate size counter; everything else reaches them
//! by queueing an [`Update`] or a promotion.
//!
//! ## Queues
//! - **promotions**: bounded, filled with `try_send` from the read path.
//!   A full queue drops the promotion.
//! - **updates**: unbounded FIFO for sets, deletes and control requests.
//!   Nothing queued here is lost, even while the worker is stopped.

use std::sync::Arc;

use crossbeam_channel::{select, Receiver, Sender};
use tracing::debug;

use crate::bucket::Bucket;
use crate::config::{Configuration, OnDelete};
use crate::item::{Item, DELETED};
use crate::list::RecencyList;
use crate::stats::CacheStats;

/// Outcome of asking a [`Store`] to drop an item chosen by GC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Eviction {
    /// Removed from its bucket
    Evicted,
    /// Pinned by a tracked reference; left in place
    Pinned,
    /// Its bucket no longer holds this exact item
    Detached,
}

/// Position of an item relative to the recency list
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Link {
    Linked(usize),
    Unlinked,
    Deleted,
}

/// Keyspace the worker evicts from
pub(crate) trait Store<T>: Send + Sync + 'static {
    /// Remove `item` from its bucket if it is still the live entry
    fn evict(&self, item: &Arc<Item<T>>, respect_pins: bool) -> Eviction;

    /// Remove every entry, handing back what was removed
    fn drain(&self) -> Vec<Arc<Item<T>>>;
}

/// Message on the updates queue
pub(crate) enum Update<T> {
    /// `item` was inserted, displacing `previous`
    Set {
        item: Arc<Item<T>>,
        previous: Option<Arc<Item<T>>>,
    },
    /// `item` took over `previous`'s bucket slot and should take its list slot
    Swap {
        item: Arc<Item<T>>,
        previous: Arc<Item<T>>,
    },
    /// `item` was removed from its bucket
    Delete(Arc<Item<T>>),
    /// Several items were removed from their buckets
    DeleteMany(Vec<Arc<Item<T>>>),
    /// A whole group's bucket was detached from its layered cache
    DropGroup(Arc<Bucket<T>>),
    Control(Control),
}

/// Requests answered by the worker
pub(crate) enum Control {
    Stop,
    Sync(Sender<()>),
    Gc(Sender<usize>),
    Size(Sender<u64>),
    Clear(Sender<()>),
    SetMaxSize(u64, Sender<()>),
}

/// State owned by the worker thread
pub(crate) struct Worker<T, S> {
    store: Arc<S>,
    list: RecencyList<Arc<Item<T>>>,
    size: u64,
    max_size: u64,
    items_to_prune: usize,
    tracking: bool,
    on_delete: Option<OnDelete<T>>,
    stats: Arc<CacheStats>,
    promotions: Receiver<Arc<Item<T>>>,
    updates: Receiver<Update<T>>,
}

impl<T, S> Worker<T, S>
where
    T: Send + Sync + 'static,
    S: Store<T>,
{
    pub(crate) fn new(
        config: &Configuration<T>,
        store: Arc<S>,
        stats: Arc<CacheStats>,
        promotions: Receiver<Arc<Item<T>>>,
        updates: Receiver<Update<T>>,
    ) -> Self {
        Self {
            store,
            list: RecencyList::new(),
            size: 0,
            max_size: config.max_size,
            items_to_prune: config.items_to_prune,
            tracking: config.tracking,
            on_delete: config.on_delete.clone(),
            stats,
            promotions,
            updates,
        }
    }

    /// Process messages until a stop request arrives, then hand the state back
    pub(crate) fn run(mut self) -> Self {
        debug!(size = self.size, items = self.list.len(), "Cache worker started");

        let promotions = self.promotions.clone();
        let updates = self.updates.clone();
        loop {
            select! {
                recv(promotions) -> msg => match msg {
                    Ok(item) => self.promote(&item),
                    Err(_) => break,
                },
                recv(updates) -> msg => match msg {
                    Ok(Update::Control(Control::Stop)) | Err(_) => break,
                    Ok(update) => self.apply(update),
                },
            }
        }

        debug!(size = self.size, items = self.list.len(), "Cache worker stopped");
        self
    }

    /// Apply everything queued so far without a thread
    pub(crate) fn drain(&mut self) {
        while let Ok(update) = self.updates.try_recv() {
            self.apply(update);
        }
        self.drain_promotions();
    }

    pub(crate) fn size(&self) -> u64 {
        self.size
    }

    pub(crate) fn set_max_size(&mut self, max: u64) {
        self.max_size = max;
        self.enforce_budget();
    }

    /// One eviction pass from the least recently promoted end.
    ///
    /// Examines `max(items_to_prune, size - max_size)` items. Pinned items
    /// are skipped (when tracking); items their bucket no longer holds are
    /// unlinked without counting as evictions.
    pub(crate) fn gc(&mut self) -> usize {
        let excess = usize::try_from(self.size.saturating_sub(self.max_size)).unwrap_or(usize::MAX);
        let budget = self.items_to_prune.max(excess);

        let mut cursor = self.list.back();
        let mut dropped = 0;
        for _ in 0..budget {
            let Some(idx) = cursor else {
                break;
            };
            cursor = self.list.prev(idx);
            let Some(item) = self.list.get(idx).cloned() else {
                break;
            };

            match self.store.evict(&item, self.tracking) {
                Eviction::Pinned => continue,
                Eviction::Evicted => {
                    dropped += 1;
                    self.stats.record_eviction();
                }
                Eviction::Detached => {}
            }

            self.list.remove(idx);
            self.size -= item.size();
            item.set_slot(DELETED);
            self.notify(&item);
        }

        if dropped > 0 {
            debug!(dropped, size = self.size, "Pruned cache");
        }
        dropped
    }

    /// Empty the store and the list; no delete callbacks.
    ///
    /// Drained entries may still have a `Set` queued; marking them deleted
    /// keeps that late update from linking them again.
    pub(crate) fn clear(&mut self) {
        for item in self.store.drain() {
            item.set_slot(DELETED);
        }
        for item in self.list.drain() {
            item.set_slot(DELETED);
        }
        self.size = 0;
    }

    fn apply(&mut self, update: Update<T>) {
        match update {
            Update::Set { item, previous } => {
                if let Some(previous) = previous {
                    self.remove(&previous);
                }
                self.link(&item, true);
            }
            Update::Swap { item, previous } => self.swap(&item, &previous),
            Update::Delete(item) => self.remove(&item),
            Update::DeleteMany(items) => {
                for item in &items {
                    self.remove(item);
                }
            }
            Update::DropGroup(bucket) => {
                for item in bucket.drain() {
                    self.remove(&item);
                }
            }
            Update::Control(control) => self.control(control),
        }
        self.enforce_budget();
    }

    fn control(&mut self, control: Control) {
        // Replies go to callers that may have given up; a closed channel is fine.
        match control {
            Control::Stop => {}
            Control::Sync(done) => {
                self.drain_promotions();
                let _ = done.send(());
            }
            Control::Gc(reply) => {
                let dropped = self.gc();
                let _ = reply.send(dropped);
            }
            Control::Size(reply) => {
                let _ = reply.send(self.size);
            }
            Control::Clear(done) => {
                self.clear();
                let _ = done.send(());
            }
            Control::SetMaxSize(max, done) => {
                self.set_max_size(max);
                let _ = done.send(());
            }
        }
    }

    fn drain_promotions(&mut self) {
        while let Ok(item) = self.promotions.try_recv() {
            self.promote(&item);
        }
    }

    fn promote(&mut self, item: &Arc<Item<T>>) {
        self.link(item, true);
        self.enforce_budget();
    }

    fn enforce_budget(&mut self) {
        if self.size > self.max_size {
            self.gc();
        }
    }

    /// Where `item` currently sits. A slot index only counts if the node
    /// there holds this exact item.
    fn link_state(&self, item: &Arc<Item<T>>) -> Link {
        match item.slot() {
            DELETED => Link::Deleted,
            idx => match self.list.get(idx) {
                Some(node) if Arc::ptr_eq(node, item) => Link::Linked(idx),
                _ => Link::Unlinked,
            },
        }
    }

    /// Put `item` on the list if it is new; optionally move it to the front
    fn link(&mut self, item: &Arc<Item<T>>, to_front: bool) {
        match self.link_state(item) {
            Link::Deleted => {}
            Link::Unlinked => {
                let idx = self.list.push_front(Arc::clone(item));
                item.set_slot(idx);
                self.size += item.size();
            }
            Link::Linked(idx) => {
                if to_front {
                    self.list.move_to_front(idx);
                }
            }
        }
    }

    /// Unlink `item` for good and report it, once
    fn remove(&mut self, item: &Arc<Item<T>>) {
        match self.link_state(item) {
            Link::Deleted => return,
            Link::Unlinked => {}
            Link::Linked(idx) => {
                self.list.remove(idx);
                self.size -= item.size();
            }
        }
        item.set_slot(DELETED);
        self.notify(item);
    }

    fn swap(&mut self, item: &Arc<Item<T>>, previous: &Arc<Item<T>>) {
        match (self.link_state(previous), self.link_state(item)) {
            (Link::Linked(idx), Link::Unlinked) => {
                self.list.replace(idx, Arc::clone(item));
                item.set_slot(idx);
                previous.set_slot(DELETED);
                self.size = self.size - previous.size() + item.size();
                self.notify(previous);
            }
            _ => {
                self.remove(previous);
                self.link(item, false);
            }
        }
    }

    fn notify(&self, item: &Item<T>) {
        if let Some(on_delete) = &self.on_delete {
            on_delete(item);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::Buckets;
    use crossbeam_channel::unbounded;
    use parking_lot::Mutex;
    use std::time::Duration;

    const MINUTE: Duration = Duration::from_secs(60);

    struct Harness {
        buckets: Arc<Buckets<u32>>,
        worker: Worker<u32, Buckets<u32>>,
        updates: Sender<Update<u32>>,
        promotions: Sender<Arc<Item<u32>>>,
        deleted: Arc<Mutex<Vec<String>>>,
    }

    impl Harness {
        fn new(config: Configuration<u32>) -> Self {
            let deleted = Arc::new(Mutex::new(Vec::new()));
            let log = Arc::clone(&deleted);
            let config = config.on_delete(move |item| log.lock().push(item.key().to_string()));

            let buckets = Arc::new(Buckets::new(4));
            let (promotions, promotions_rx) = unbounded();
            let (updates, updates_rx) = unbounded();
            let worker = Worker::new(
                &config,
                Arc::clone(&buckets),
                Arc::new(CacheStats::new()),
                promotions_rx,
                updates_rx,
            );
            Self {
                buckets,
                worker,
                updates,
                promotions,
                deleted,
            }
        }

        fn set(&mut self, key: &str, size: u64) -> Arc<Item<u32>> {
            let (item, previous) = self.buckets.bucket(key).set(key, "", 0, size, MINUTE);
            self.updates
                .send(Update::Set {
                    item: Arc::clone(&item),
                    previous,
                })
                .unwrap();
            self.worker.drain();
            item
        }

        fn delete(&mut self, key: &str) {
            let item = self.buckets.bucket(key).delete(key).unwrap();
            self.updates.send(Update::Delete(item)).unwrap();
            self.worker.drain();
        }

        fn order(&self) -> Vec<String> {
            self.worker.list.iter().map(|item| item.key().to_string()).collect()
        }

        fn deleted(&self) -> Vec<String> {
            self.deleted.lock().clone()
        }
    }

    #[test]
    fn test_set_links_and_sizes() {
        let mut h = Harness::new(Configuration::new());
        h.set("a", 2);
        h.set("b", 3);

        assert_eq!(h.order(), ["b", "a"]);
        assert_eq!(h.worker.size(), 5);
        assert!(h.deleted().is_empty());
    }

    #[test]
    fn test_overwrite_replaces_previous() {
        let mut h = Harness::new(Configuration::new());
        let first = h.set("a", 2);
        h.set("b", 3);
        h.set("a", 4);

        assert_eq!(h.order(), ["a", "b"]);
        assert_eq!(h.worker.size(), 7);
        assert_eq!(first.slot(), DELETED);
        assert_eq!(h.deleted(), ["a"]);
    }

    #[test]
    fn test_delete_notifies_once() {
        let mut h = Harness::new(Configuration::new());
        let item = h.set("a", 1);
        h.delete("a");

        h.updates.send(Update::Delete(Arc::clone(&item))).unwrap();
        h.worker.drain();

        assert_eq!(h.worker.size(), 0);
        assert!(h.order().is_empty());
        assert_eq!(h.deleted(), ["a"]);
    }

    #[test]
    fn test_promotion_after_delete_is_ignored() {
        let mut h = Harness::new(Configuration::new());
        let item = h.set("a", 1);
        h.delete("a");

        h.promotions.send(item).unwrap();
        h.worker.drain();
        assert!(h.order().is_empty());
        assert_eq!(h.worker.size(), 0);
    }

    #[test]
    fn test_promotion_moves_to_front() {
        let mut h = Harness::new(Configuration::new());
        let a = h.set("a", 1);
        h.set("b", 1);
        h.set("c", 1);

        h.promotions.send(a).unwrap();
        h.worker.drain();
        assert_eq!(h.order(), ["a", "c", "b"]);
    }

    #[test]
    fn test_swap_keeps_position() {
        let mut h = Harness::new(Configuration::new());
        h.set("a", 1);
        h.set("b", 1);

        let (item, previous) = h.buckets.bucket("a").replace("a", 7, 3).unwrap();
        h.updates
            .send(Update::Swap {
                item: Arc::clone(&item),
                previous,
            })
            .unwrap();
        h.worker.drain();

        assert_eq!(h.order(), ["b", "a"]);
        assert_eq!(*h.worker.list.get(item.slot()).unwrap().value(), 7);
        assert_eq!(h.worker.size(), 4);
        assert_eq!(h.deleted(), ["a"]);
    }

    #[test]
    fn test_gc_prunes_from_back() {
        let mut h = Harness::new(Configuration::new().items_to_prune(2));
        for key in ["a", "b", "c", "d"] {
            h.set(key, 1);
        }

        assert_eq!(h.worker.gc(), 2);
        assert_eq!(h.order(), ["d", "c"]);
        assert_eq!(h.worker.size(), 2);
        assert!(h.buckets.bucket("a").get("a").is_none());
        assert_eq!(h.deleted(), ["a", "b"]);
    }

    #[test]
    fn test_gc_prunes_excess_beyond_budget() {
        let mut h = Harness::new(Configuration::new().items_to_prune(1));
        for key in ["a", "b", "c", "d", "e"] {
            h.set(key, 1);
        }
        h.worker.max_size = 2;

        assert_eq!(h.worker.gc(), 3);
        assert_eq!(h.order(), ["e", "d"]);
    }

    #[test]
    fn test_gc_skips_pinned() {
        let mut h = Harness::new(Configuration::new().items_to_prune(2).track());
        h.set("a", 1);
        h.set("b", 1);
        h.set("c", 1);
        let pinned = h.buckets.bucket("a").pin("a").unwrap();

        assert_eq!(h.worker.gc(), 1);
        assert_eq!(h.order(), ["c", "a"]);

        drop(pinned);
        assert_eq!(h.worker.gc(), 2);
        assert!(h.order().is_empty());
    }

    #[test]
    fn test_gc_ignores_pins_without_tracking() {
        let mut h = Harness::new(Configuration::new().items_to_prune(1));
        h.set("a", 1);
        let _pinned = h.buckets.bucket("a").pin("a").unwrap();

        assert_eq!(h.worker.gc(), 1);
        assert!(h.buckets.bucket("a").get("a").is_none());
    }

    #[test]
    fn test_gc_unlinks_detached() {
        let mut h = Harness::new(Configuration::new().items_to_prune(1));
        h.set("a", 1);
        h.buckets.bucket("a").delete("a");

        assert_eq!(h.worker.gc(), 0);
        assert!(h.order().is_empty());
        assert_eq!(h.worker.size(), 0);
        assert_eq!(h.deleted(), ["a"]);
    }

    #[test]
    fn test_budget_enforced_on_insert() {
        let mut h = Harness::new(Configuration::new().max_size(3).items_to_prune(1));
        for key in ["a", "b", "c", "d", "e"] {
            h.set(key, 1);
        }
        assert_eq!(h.order(), ["e", "d", "c"]);
        assert_eq!(h.worker.size(), 3);
    }

    #[test]
    fn test_set_max_size_prunes() {
        let mut h = Harness::new(Configuration::new().items_to_prune(1));
        for key in ["a", "b", "c"] {
            h.set(key, 1);
        }
        h.worker.set_max_size(1);
        assert_eq!(h.order(), ["c"]);
    }

    #[test]
    fn test_clear() {
        let mut h = Harness::new(Configuration::new());
        let a = h.set("a", 1);
        h.set("b", 1);

        h.worker.clear();
        assert_eq!(h.worker.size(), 0);
        assert!(h.order().is_empty());
        assert_eq!(h.buckets.len(), 0);
        assert_eq!(a.slot(), DELETED);
        assert!(h.deleted().is_empty());
    }

    #[test]
    fn test_clear_ignores_pending_sets() {
        let mut h = Harness::new(Configuration::new());
        h.set("a", 1);
        let (pending, previous) = h.buckets.bucket("b").set("b", "", 0, 1, MINUTE);
        h.updates
            .send(Update::Set {
                item: Arc::clone(&pending),
                previous,
            })
            .unwrap();

        h.worker.clear();
        h.worker.drain();

        assert_eq!(pending.slot(), DELETED);
        assert!(h.order().is_empty());
        assert_eq!(h.worker.size(), 0);
        assert_eq!(h.buckets.len(), 0);
    }

    #[test]
    fn test_drop_group() {
        let mut h = Harness::new(Configuration::new());
        let group = Arc::new(Bucket::new());
        for key in ["x", "y"] {
            let (item, _) = group.set(key, "g", 0, 2, MINUTE);
            h.updates.send(Update::Set { item, previous: None }).unwrap();
        }
        h.set("a", 1);

        h.updates.send(Update::DropGroup(Arc::clone(&group))).unwrap();
        h.worker.drain();

        assert_eq!(h.order(), ["a"]);
        assert_eq!(h.worker.size(), 1);
        assert_eq!(group.len(), 0);
        let mut deleted = h.deleted();
        deleted.sort();
        assert_eq!(deleted, ["x", "y"]);
    }
}
