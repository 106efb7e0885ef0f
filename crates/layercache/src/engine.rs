//! Shared cache machinery
//!
//! [`Engine`] owns the worker thread with its queues and implements the
//! per-key operations that [`Cache`](crate::Cache) and
//! [`LayeredCache`](crate::LayeredCache) run against a [`Bucket`]. The two
//! caches differ only in how they find the bucket for a key.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use tracing::{trace, warn};

use crate::bucket::Bucket;
use crate::config::Configuration;
use crate::error::{Error, Result};
use crate::item::{Item, TrackedItem};
use crate::stats::CacheStats;
use crate::worker::{Control, Store, Update, Worker};

/// How often a control request re-checks that the worker is still alive
const REPLY_POLL: Duration = Duration::from_millis(50);

/// Where the worker state currently lives
enum Slot<T, S> {
    /// Owned by a running thread
    Running(JoinHandle<Worker<T, S>>),
    /// Handed back by `stop`
    Parked(Worker<T, S>),
    /// Lost with a panicked thread
    Gone,
}

pub(crate) struct Engine<T, S>
where
    T: Send + Sync + 'static,
    S: Store<T>,
{
    store: Arc<S>,
    config: Configuration<T>,
    stats: Arc<CacheStats>,
    promotions: Sender<Arc<Item<T>>>,
    updates: Sender<Update<T>>,
    /// Kept so a fresh worker can be built after a panic
    promotions_rx: Receiver<Arc<Item<T>>>,
    updates_rx: Receiver<Update<T>>,
    worker: Mutex<Slot<T, S>>,
}

impl<T, S> Engine<T, S>
where
    T: Send + Sync + 'static,
    S: Store<T>,
{
    /// Wrap `store` and start its worker
    pub(crate) fn new(config: Configuration<T>, store: S) -> Result<Self> {
        let store = Arc::new(store);
        let stats = Arc::new(CacheStats::new());
        let (promotions, promotions_rx) = bounded(config.promote_buffer);
        let (updates, updates_rx) = unbounded();

        let worker = Worker::new(
            &config,
            Arc::clone(&store),
            Arc::clone(&stats),
            promotions_rx.clone(),
            updates_rx.clone(),
        );
        let handle = spawn(worker)?;

        Ok(Self {
            store,
            config,
            stats,
            promotions,
            updates,
            promotions_rx,
            updates_rx,
            worker: Mutex::new(Slot::Running(handle)),
        })
    }

    pub(crate) fn store(&self) -> &S {
        &self.store
    }

    pub(crate) fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Live entry for `key`; counts the hit or miss and samples a promotion
    pub(crate) fn get(&self, bucket: Option<&Bucket<T>>, key: &str) -> Option<Arc<Item<T>>> {
        let item = bucket
            .and_then(|bucket| bucket.get(key))
            .filter(|item| !item.expired());
        match &item {
            Some(item) => {
                self.stats.record_hit();
                self.touch(item);
            }
            None => self.stats.record_miss(),
        }
        item
    }

    /// Entry for `key`, expired or not, without side effects
    pub(crate) fn peek(&self, bucket: Option<&Bucket<T>>, key: &str) -> Option<Arc<Item<T>>> {
        bucket?.get(key)
    }

    pub(crate) fn tracking_get(
        &self,
        bucket: Option<&Bucket<T>>,
        key: &str,
    ) -> Option<TrackedItem<T>> {
        let tracked = bucket.and_then(|bucket| bucket.pin(key));
        match &tracked {
            Some(tracked) => {
                self.stats.record_hit();
                self.touch(tracked.item());
            }
            None => self.stats.record_miss(),
        }
        tracked
    }

    pub(crate) fn set(
        &self,
        bucket: &Bucket<T>,
        key: &str,
        group: &str,
        value: T,
        ttl: Duration,
    ) -> Arc<Item<T>> {
        let size = (self.config.sizer)(&value);
        let (item, previous) = bucket.set(key, group, value, size, ttl);
        self.stats.record_insert();
        self.send(Update::Set {
            item: Arc::clone(&item),
            previous,
        });
        item
    }

    /// Like `set`, but the item is pinned before any other thread can see it
    pub(crate) fn tracking_set(
        &self,
        bucket: &Bucket<T>,
        key: &str,
        group: &str,
        value: T,
        ttl: Duration,
    ) -> TrackedItem<T> {
        let size = (self.config.sizer)(&value);
        let item = Item::new(key, group, value, size, ttl);
        item.track();
        let item = Arc::new(item);

        let previous = bucket.insert(Arc::clone(&item));
        self.stats.record_insert();
        self.send(Update::Set {
            item: Arc::clone(&item),
            previous,
        });
        TrackedItem::new(item)
    }

    pub(crate) fn replace(&self, bucket: Option<&Bucket<T>>, key: &str, value: T) -> bool {
        let Some(bucket) = bucket else {
            return false;
        };
        let size = (self.config.sizer)(&value);
        match bucket.replace(key, value, size) {
            Some((item, previous)) => {
                self.send(Update::Swap { item, previous });
                true
            }
            None => false,
        }
    }

    pub(crate) fn delete(&self, bucket: Option<&Bucket<T>>, key: &str) -> bool {
        match bucket.and_then(|bucket| bucket.delete(key)) {
            Some(item) => {
                self.send(Update::Delete(item));
                true
            }
            None => false,
        }
    }

    pub(crate) fn extend(&self, bucket: Option<&Bucket<T>>, key: &str, ttl: Duration) -> bool {
        match bucket.and_then(|bucket| bucket.get(key)) {
            Some(item) => {
                item.extend(ttl);
                true
            }
            None => false,
        }
    }

    /// Remove matching entries of one bucket; returns how many went
    pub(crate) fn delete_matching<F>(&self, bucket: &Bucket<T>, matches: F) -> usize
    where
        F: FnMut(&str, &Item<T>) -> bool,
    {
        let removed = bucket.delete_matching(matches);
        let count = removed.len();
        if count > 0 {
            self.send(Update::DeleteMany(removed));
        }
        count
    }

    /// Visit a snapshot of one bucket; false once `f` asked to stop.
    ///
    /// No lock is held while `f` runs, so it may call back into the cache.
    pub(crate) fn for_each<F>(&self, bucket: &Bucket<T>, f: &mut F) -> bool
    where
        F: FnMut(&Arc<Item<T>>) -> bool,
    {
        bucket.snapshot().iter().all(|item| f(item))
    }

    /// Hand a detached group bucket to the worker for unlinking
    pub(crate) fn drop_group(&self, bucket: Arc<Bucket<T>>) {
        self.send(Update::DropGroup(bucket));
    }

    pub(crate) fn stop(&self) -> Result<()> {
        let mut slot = self.worker.lock();
        match std::mem::replace(&mut *slot, Slot::Gone) {
            Slot::Running(handle) => {
                self.send(Update::Control(Control::Stop));
                match handle.join() {
                    Ok(worker) => {
                        *slot = Slot::Parked(worker);
                        Ok(())
                    }
                    Err(_) => {
                        warn!("Cache worker panicked; restart will clear the cache");
                        Err(Error::WorkerPanicked)
                    }
                }
            }
            other => {
                *slot = other;
                Ok(())
            }
        }
    }

    pub(crate) fn restart(&self) -> Result<()> {
        let mut slot = self.worker.lock();
        let worker = match std::mem::replace(&mut *slot, Slot::Gone) {
            Slot::Running(handle) if !handle.is_finished() => {
                *slot = Slot::Running(handle);
                return Ok(());
            }
            Slot::Running(handle) => match handle.join() {
                Ok(worker) => worker,
                Err(_) => self.rebuild(),
            },
            Slot::Parked(worker) => worker,
            Slot::Gone => self.rebuild(),
        };
        *slot = Slot::Running(spawn(worker)?);
        Ok(())
    }

    pub(crate) fn sync_updates(&self) -> Result<()> {
        self.control(Control::Sync, Worker::drain)
    }

    pub(crate) fn gc(&self) -> Result<usize> {
        self.control(Control::Gc, Worker::gc)
    }

    pub(crate) fn size(&self) -> Result<u64> {
        self.control(Control::Size, |worker| worker.size())
    }

    pub(crate) fn clear(&self) -> Result<()> {
        self.control(Control::Clear, Worker::clear)
    }

    pub(crate) fn set_max_size(&self, max: u64) -> Result<()> {
        self.control(
            |done| Control::SetMaxSize(max, done),
            |worker| worker.set_max_size(max),
        )
    }

    /// Run a control request on the running worker, or directly on the
    /// parked one when the cache is stopped.
    fn control<R, Q, P>(&self, request: Q, parked: P) -> Result<R>
    where
        Q: FnOnce(Sender<R>) -> Control,
        P: FnOnce(&mut Worker<T, S>) -> R,
    {
        let mut slot = self.worker.lock();
        match &mut *slot {
            Slot::Running(handle) => {
                let (reply, response) = bounded(1);
                self.send(Update::Control(request(reply)));
                loop {
                    match response.recv_timeout(REPLY_POLL) {
                        Ok(value) => return Ok(value),
                        Err(RecvTimeoutError::Timeout) if !handle.is_finished() => continue,
                        Err(_) => return response.try_recv().map_err(|_| Error::WorkerGone),
                    }
                }
            }
            Slot::Parked(worker) => Ok(parked(worker)),
            Slot::Gone => Err(Error::WorkerGone),
        }
    }

    /// Fresh worker state after the old one died with its thread.
    ///
    /// The recency list is gone, so the entries it tracked are dropped too.
    fn rebuild(&self) -> Worker<T, S> {
        warn!("Rebuilding cache worker; all entries are dropped");
        while self.updates_rx.try_recv().is_ok() {}
        while self.promotions_rx.try_recv().is_ok() {}
        self.store.drain();
        Worker::new(
            &self.config,
            Arc::clone(&self.store),
            Arc::clone(&self.stats),
            self.promotions_rx.clone(),
            self.updates_rx.clone(),
        )
    }

    /// Count a hit and queue a promotion when the item's sample is due
    fn touch(&self, item: &Arc<Item<T>>) {
        if !item.should_promote(self.config.gets_per_promote) {
            return;
        }
        if let Err(TrySendError::Full(item)) = self.promotions.try_send(Arc::clone(item)) {
            trace!(key = item.key(), "Promotion queue full, dropping promotion");
        }
    }

    fn send(&self, update: Update<T>) {
        if self.updates.send(update).is_err() {
            warn!("Cache update queue is closed");
        }
    }
}

impl<T, S> Drop for Engine<T, S>
where
    T: Send + Sync + 'static,
    S: Store<T>,
{
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!("Failed to stop cache worker: {}", e);
        }
    }
}

fn spawn<T, S>(worker: Worker<T, S>) -> Result<JoinHandle<Worker<T, S>>>
where
    T: Send + Sync + 'static,
    S: Store<T>,
{
    let handle = thread::Builder::new()
        .name("layercache-worker".to_string())
        .spawn(move || worker.run())?;
    Ok(handle)
}
