//! Tiered, best-effort persistence for event and clock records.
//!
//! Reads try, in order: a fresh process-local cache, the durable store (repopulating the
//! cache), the stale cache. Writes land in the cache synchronously and are then pushed to
//! the durable store with a whole-collection read-modify-write. Durable failures are
//! logged and never reach the caller.

use std::{
    collections::HashMap,
    sync::{Arc, PoisonError, RwLock as StdRwLock},
    time::Duration,
};

use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::{
    sync::{Mutex, RwLock, watch},
    time::Instant,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dao::{
    clock_store::ClockStore,
    models::{ClockEntity, EventEntity},
    storage::{StorageError, StorageResult},
};

/// Default age after which the process-local cache is considered stale.
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_secs(5);

/// A record family stored as one durable collection.
pub trait Record: Clone + Send + Sync + 'static {
    /// Collection name used in logs.
    const COLLECTION: &'static str;

    /// Primary key.
    fn key(&self) -> Uuid;

    /// Load the whole collection from the durable store.
    fn load(store: &dyn ClockStore) -> BoxFuture<'static, StorageResult<Vec<Self>>>;

    /// Replace the whole collection in the durable store.
    fn store(store: &dyn ClockStore, records: Vec<Self>) -> BoxFuture<'static, StorageResult<()>>;
}

impl Record for EventEntity {
    const COLLECTION: &'static str = "events";

    fn key(&self) -> Uuid {
        self.id
    }

    fn load(store: &dyn ClockStore) -> BoxFuture<'static, StorageResult<Vec<Self>>> {
        store.load_events()
    }

    fn store(store: &dyn ClockStore, records: Vec<Self>) -> BoxFuture<'static, StorageResult<()>> {
        store.store_events(records)
    }
}

impl Record for ClockEntity {
    const COLLECTION: &'static str = "clocks";

    fn key(&self) -> Uuid {
        self.event_id
    }

    fn load(store: &dyn ClockStore) -> BoxFuture<'static, StorageResult<Vec<Self>>> {
        store.load_clocks()
    }

    fn store(store: &dyn ClockStore, records: Vec<Self>) -> BoxFuture<'static, StorageResult<()>> {
        store.store_clocks(records)
    }
}

/// Process-local copy of one collection.
struct CacheSlot<T> {
    records: IndexMap<Uuid, T>,
    refreshed_at: Option<Instant>,
    /// Ids changed locally but not yet confirmed durable, with their change generation.
    pending: HashMap<Uuid, u64>,
    next_generation: u64,
    /// Bumped by every completed flush; snapshots loaded across a bump are outdated.
    flush_epoch: u64,
}

impl<T: Record> CacheSlot<T> {
    fn new() -> Self {
        Self {
            records: IndexMap::new(),
            refreshed_at: None,
            pending: HashMap::new(),
            next_generation: 0,
            flush_epoch: 0,
        }
    }

    fn is_fresh(&self, timeout: Duration) -> bool {
        self.refreshed_at
            .is_some_and(|refreshed_at| refreshed_at.elapsed() < timeout)
    }

    fn mark_pending(&mut self, id: Uuid) {
        self.next_generation += 1;
        self.pending.insert(id, self.next_generation);
    }

    /// Local view of every pending id: `Some` for upserts, `None` for removals.
    fn pending_changes(&self) -> Vec<(Uuid, Option<T>)> {
        self.pending
            .keys()
            .map(|id| (*id, self.records.get(id).cloned()))
            .collect()
    }

    /// Replace the cache with a durable snapshot, keeping unflushed local changes on top.
    fn repopulate(&mut self, snapshot: Vec<T>) {
        let mut merged: IndexMap<Uuid, T> = snapshot
            .into_iter()
            .map(|record| (record.key(), record))
            .collect();
        for (id, local) in self.pending_changes() {
            match local {
                Some(record) => {
                    merged.insert(id, record);
                }
                None => {
                    merged.shift_remove(&id);
                }
            }
        }
        self.records = merged;
        self.refreshed_at = Some(Instant::now());
    }
}

/// Cache plus write serialization for one record family.
struct TieredCollection<T> {
    cache: StdRwLock<CacheSlot<T>>,
    write_gate: Mutex<()>,
}

impl<T: Record> TieredCollection<T> {
    fn new() -> Self {
        Self {
            cache: StdRwLock::new(CacheSlot::new()),
            write_gate: Mutex::new(()),
        }
    }

    fn read_cache<R>(&self, f: impl FnOnce(&CacheSlot<T>) -> R) -> R {
        let guard = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        f(&guard)
    }

    fn write_cache<R>(&self, f: impl FnOnce(&mut CacheSlot<T>) -> R) -> R {
        let mut guard = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    async fn get(
        &self,
        store: Option<Arc<dyn ClockStore>>,
        id: Uuid,
        timeout: Duration,
    ) -> Option<T> {
        let fresh_hit = self.read_cache(|slot| {
            if slot.is_fresh(timeout) {
                slot.records.get(&id).cloned()
            } else {
                None
            }
        });
        if fresh_hit.is_some() {
            return fresh_hit;
        }

        if let Err(err) = self.refresh(store).await {
            debug!(
                collection = T::COLLECTION,
                %id,
                error = %err,
                "durable read failed; falling back to stale cache"
            );
        }
        self.read_cache(|slot| slot.records.get(&id).cloned())
    }

    async fn all(&self, store: Option<Arc<dyn ClockStore>>, timeout: Duration) -> Vec<T> {
        if !self.read_cache(|slot| slot.is_fresh(timeout)) {
            if let Err(err) = self.refresh(store).await {
                debug!(
                    collection = T::COLLECTION,
                    error = %err,
                    "durable read failed; falling back to stale cache"
                );
            }
        }
        self.read_cache(|slot| slot.records.values().cloned().collect())
    }

    async fn refresh(&self, store: Option<Arc<dyn ClockStore>>) -> StorageResult<()> {
        let store = store.ok_or(StorageError::Detached)?;
        let epoch = self.read_cache(|slot| slot.flush_epoch);
        let snapshot = T::load(store.as_ref()).await?;
        self.write_cache(|slot| {
            if slot.flush_epoch == epoch {
                slot.repopulate(snapshot);
            } else {
                debug!(
                    collection = T::COLLECTION,
                    "dropping durable snapshot that predates a local flush"
                );
            }
        });
        Ok(())
    }

    fn stage(&self, records: impl IntoIterator<Item = T>) {
        self.write_cache(|slot| {
            for record in records {
                let id = record.key();
                slot.records.insert(id, record);
                slot.mark_pending(id);
            }
        });
    }

    fn stage_removal(&self, id: Uuid) {
        self.write_cache(|slot| {
            slot.records.shift_remove(&id);
            slot.mark_pending(id);
        });
    }

    /// Push every pending local change to the durable store in one write.
    async fn flush(&self, store: Option<Arc<dyn ClockStore>>) -> StorageResult<()> {
        let store = store.ok_or(StorageError::Detached)?;
        let _gate = self.write_gate.lock().await;

        let (changes, generations) =
            self.read_cache(|slot| (slot.pending_changes(), slot.pending.clone()));
        if changes.is_empty() {
            return Ok(());
        }

        let mut merged: IndexMap<Uuid, T> = T::load(store.as_ref())
            .await?
            .into_iter()
            .map(|record| (record.key(), record))
            .collect();
        for (id, local) in changes {
            match local {
                Some(record) => {
                    merged.insert(id, record);
                }
                None => {
                    merged.shift_remove(&id);
                }
            }
        }

        let snapshot: Vec<T> = merged.into_values().collect();
        T::store(store.as_ref(), snapshot.clone()).await?;

        self.write_cache(|slot| {
            for (id, generation) in generations {
                if slot.pending.get(&id) == Some(&generation) {
                    slot.pending.remove(&id);
                }
            }
            slot.flush_epoch += 1;
            slot.repopulate(snapshot);
        });
        Ok(())
    }

    fn pending_count(&self) -> usize {
        self.read_cache(|slot| slot.pending.len())
    }
}

/// Durable storage for event and clock records with graceful degradation.
pub struct PersistenceLayer {
    store: RwLock<Option<Arc<dyn ClockStore>>>,
    events: TieredCollection<EventEntity>,
    clocks: TieredCollection<ClockEntity>,
    cache_timeout: Duration,
    degraded: watch::Sender<bool>,
}

impl PersistenceLayer {
    /// Create a layer without a durable backend (degraded until one is installed).
    pub fn new(cache_timeout: Duration) -> Self {
        Self::build(None, cache_timeout)
    }

    /// Create a layer already backed by `store`.
    pub fn with_store(store: Arc<dyn ClockStore>, cache_timeout: Duration) -> Self {
        Self::build(Some(store), cache_timeout)
    }

    fn build(store: Option<Arc<dyn ClockStore>>, cache_timeout: Duration) -> Self {
        let (degraded, _rx) = watch::channel(store.is_none());
        Self {
            store: RwLock::new(store),
            events: TieredCollection::new(),
            clocks: TieredCollection::new(),
            cache_timeout,
            degraded,
        }
    }

    /// Current durable backend, if any.
    pub async fn store(&self) -> Option<Arc<dyn ClockStore>> {
        self.store.read().await.clone()
    }

    /// Install a durable backend and leave degraded mode.
    pub async fn install_store(&self, store: Arc<dyn ClockStore>) {
        *self.store.write().await = Some(store);
        self.update_degraded(false);
    }

    /// Drop the durable backend and enter degraded mode.
    pub async fn clear_store(&self) {
        self.store.write().await.take();
        self.update_degraded(true);
    }

    /// True when reads and writes only reach the process-local cache.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Flip the degraded flag, notifying watchers only on change.
    pub fn update_degraded(&self, value: bool) {
        let changed = self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
        if changed {
            info!(degraded = value, "persistence degraded mode changed");
        }
    }

    /// Ping the durable backend.
    pub async fn health_check(&self) -> StorageResult<()> {
        let store = self.store().await.ok_or(StorageError::Detached)?;
        store.health_check().await
    }

    /// Number of local changes not yet confirmed durable.
    pub fn pending_writes(&self) -> usize {
        self.events.pending_count() + self.clocks.pending_count()
    }

    /// Look up an event record.
    pub async fn get_event(&self, id: Uuid) -> Option<EventEntity> {
        self.events
            .get(self.store().await, id, self.cache_timeout)
            .await
    }

    /// List every known event record.
    pub async fn list_events(&self) -> Vec<EventEntity> {
        self.events.all(self.store().await, self.cache_timeout).await
    }

    /// Create or replace an event record.
    pub async fn save_event(&self, event: EventEntity) {
        self.events.stage([event]);
        self.flush_events().await;
    }

    /// Delete an event record together with its clock record.
    ///
    /// Returns whether an event record existed.
    pub async fn delete_event(&self, id: Uuid) -> bool {
        let existed = self.get_event(id).await.is_some();
        self.events.stage_removal(id);
        self.flush_events().await;
        self.delete_clock(id).await;
        existed
    }

    /// Look up a clock record.
    pub async fn get_clock(&self, event_id: Uuid) -> Option<ClockEntity> {
        self.clocks
            .get(self.store().await, event_id, self.cache_timeout)
            .await
    }

    /// List every known clock record.
    pub async fn list_clocks(&self) -> Vec<ClockEntity> {
        self.clocks.all(self.store().await, self.cache_timeout).await
    }

    /// Create or replace a clock record.
    pub async fn save_clock(&self, clock: ClockEntity) {
        self.stage_clock(clock);
        self.flush_clocks().await;
    }

    /// Create or replace several clock records with a single durable write.
    pub async fn save_clocks(&self, clocks: Vec<ClockEntity>) {
        if clocks.is_empty() {
            return;
        }
        self.clocks.stage(clocks);
        self.flush_clocks().await;
    }

    /// Update the cache synchronously; pair with [`Self::flush_clocks`].
    pub fn stage_clock(&self, clock: ClockEntity) {
        self.clocks.stage([clock]);
    }

    /// Delete a clock record. Returns whether it existed.
    pub async fn delete_clock(&self, event_id: Uuid) -> bool {
        let existed = self.get_clock(event_id).await.is_some();
        self.clocks.stage_removal(event_id);
        self.flush_clocks().await;
        existed
    }

    /// Push staged clock changes to the durable store, logging failures.
    pub async fn flush_clocks(&self) {
        if let Err(err) = self.clocks.flush(self.store().await).await {
            warn!(
                collection = ClockEntity::COLLECTION,
                error = %err,
                "durable write failed; keeping cache-only copy"
            );
        }
    }

    async fn flush_events(&self) {
        if let Err(err) = self.events.flush(self.store().await).await {
            warn!(
                collection = EventEntity::COLLECTION,
                error = %err,
                "durable write failed; keeping cache-only copy"
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{
        Mutex as StdMutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    use time::OffsetDateTime;

    use super::*;
    use crate::state::clock::ClockStatus;

    #[derive(Debug, thiserror::Error)]
    #[error("simulated outage")]
    struct Outage;

    /// In-memory durable store whose reads and writes can be switched off.
    #[derive(Default)]
    pub(crate) struct FlakyStore {
        events: StdMutex<Vec<EventEntity>>,
        clocks: StdMutex<Vec<ClockEntity>>,
        failing: AtomicBool,
        loads: AtomicUsize,
        load_delay: StdMutex<Duration>,
    }

    impl FlakyStore {
        pub(crate) fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub(crate) fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }

        pub(crate) fn clocks(&self) -> Vec<ClockEntity> {
            self.clocks.lock().unwrap().clone()
        }

        pub(crate) fn events(&self) -> Vec<EventEntity> {
            self.events.lock().unwrap().clone()
        }

        /// Delay every later load by `delay`; the returned data is read before the wait.
        pub(crate) fn set_load_delay(&self, delay: Duration) {
            *self.load_delay.lock().unwrap() = delay;
        }

        async fn settle_load(&self) {
            let delay = *self.load_delay.lock().unwrap();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }

        pub(crate) fn put_clocks(&self, clocks: Vec<ClockEntity>) {
            *self.clocks.lock().unwrap() = clocks;
        }

        fn check(&self) -> StorageResult<()> {
            if self.failing.load(Ordering::SeqCst) {
                Err(StorageError::unavailable("flaky store".into(), Outage))
            } else {
                Ok(())
            }
        }
    }

    impl ClockStore for Arc<FlakyStore> {
        fn load_events(&self) -> BoxFuture<'static, StorageResult<Vec<EventEntity>>> {
            let store = self.clone();
            Box::pin(async move {
                store.loads.fetch_add(1, Ordering::SeqCst);
                store.check()?;
                let events = store.events();
                store.settle_load().await;
                Ok(events)
            })
        }

        fn store_events(&self, events: Vec<EventEntity>) -> BoxFuture<'static, StorageResult<()>> {
            let store = self.clone();
            Box::pin(async move {
                store.check()?;
                *store.events.lock().unwrap() = events;
                Ok(())
            })
        }

        fn load_clocks(&self) -> BoxFuture<'static, StorageResult<Vec<ClockEntity>>> {
            let store = self.clone();
            Box::pin(async move {
                store.loads.fetch_add(1, Ordering::SeqCst);
                store.check()?;
                let clocks = store.clocks();
                store.settle_load().await;
                Ok(clocks)
            })
        }

        fn store_clocks(&self, clocks: Vec<ClockEntity>) -> BoxFuture<'static, StorageResult<()>> {
            let store = self.clone();
            Box::pin(async move {
                store.check()?;
                store.put_clocks(clocks);
                Ok(())
            })
        }

        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            let store = self.clone();
            Box::pin(async move { store.check() })
        }
    }

    pub(crate) fn clock_record(event_id: Uuid, quarter: u32) -> ClockEntity {
        let now = OffsetDateTime::now_utc();
        ClockEntity {
            event_id,
            is_running: false,
            started_at: None,
            accumulated_run_time_seconds: 0.0,
            current_quarter: quarter,
            quarter_length_seconds: 600.0,
            status: ClockStatus::Scheduled,
            created_at: now,
            updated_at: now,
        }
    }

    fn layer() -> (PersistenceLayer, Arc<FlakyStore>) {
        let store = Arc::new(FlakyStore::default());
        let layer = PersistenceLayer::with_store(Arc::new(store.clone()), DEFAULT_CACHE_TIMEOUT);
        (layer, store)
    }

    #[tokio::test(start_paused = true)]
    async fn fresh_cache_answers_without_durable_read() {
        let (layer, store) = layer();
        let id = Uuid::new_v4();
        layer.save_clock(clock_record(id, 1)).await;
        let loads_after_write = store.loads();

        assert_eq!(layer.get_clock(id).await.unwrap().current_quarter, 1);
        assert_eq!(store.loads(), loads_after_write);
        assert_eq!(store.clocks().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_cache_picks_up_foreign_writes() {
        let (layer, store) = layer();
        let id = Uuid::new_v4();
        layer.save_clock(clock_record(id, 1)).await;

        store.put_clocks(vec![clock_record(id, 3)]);
        assert_eq!(layer.get_clock(id).await.unwrap().current_quarter, 1);

        tokio::time::advance(DEFAULT_CACHE_TIMEOUT + Duration::from_millis(1)).await;
        assert_eq!(layer.get_clock(id).await.unwrap().current_quarter, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn durable_write_failure_keeps_cache_authoritative() {
        let (layer, store) = layer();
        store.set_failing(true);
        let id = Uuid::new_v4();

        layer.save_clock(clock_record(id, 2)).await;
        assert_eq!(layer.get_clock(id).await.unwrap().current_quarter, 2);
        assert!(store.clocks().is_empty());
        assert_eq!(layer.pending_writes(), 1);

        store.set_failing(false);
        layer.flush_clocks().await;
        assert_eq!(store.clocks().len(), 1);
        assert_eq!(layer.pending_writes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_cache_is_the_last_resort() {
        let (layer, store) = layer();
        let id = Uuid::new_v4();
        layer.save_clock(clock_record(id, 2)).await;

        store.set_failing(true);
        tokio::time::advance(DEFAULT_CACHE_TIMEOUT * 2).await;
        assert_eq!(layer.get_clock(id).await.unwrap().current_quarter, 2);
        assert!(layer.get_clock(Uuid::new_v4()).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unflushed_changes_survive_repopulation() {
        let (layer, store) = layer();
        let id = Uuid::new_v4();
        layer.save_clock(clock_record(id, 1)).await;

        store.set_failing(true);
        layer.save_clock(clock_record(id, 4)).await;
        store.set_failing(false);

        tokio::time::advance(DEFAULT_CACHE_TIMEOUT * 2).await;
        assert_eq!(layer.get_clock(id).await.unwrap().current_quarter, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_refresh_does_not_roll_back_a_confirmed_write() {
        let (layer, store) = layer();
        let layer = Arc::new(layer);
        let id = Uuid::new_v4();
        store.put_clocks(vec![clock_record(id, 1)]);

        store.set_load_delay(Duration::from_millis(100));
        let slow_read = tokio::spawn({
            let layer = layer.clone();
            async move { layer.get_clock(Uuid::new_v4()).await }
        });
        tokio::time::sleep(Duration::from_millis(1)).await;
        store.set_load_delay(Duration::ZERO);

        layer.save_clock(clock_record(id, 3)).await;
        assert_eq!(layer.get_clock(id).await.unwrap().current_quarter, 3);

        assert!(slow_read.await.unwrap().is_none());
        assert_eq!(layer.get_clock(id).await.unwrap().current_quarter, 3);
        assert_eq!(store.clocks()[0].current_quarter, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn deleting_an_event_removes_its_clock() {
        let (layer, store) = layer();
        let id = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        layer
            .save_event(EventEntity::with_defaults(id, 600.0, 4, now))
            .await;
        layer.save_clock(clock_record(id, 1)).await;

        assert!(layer.delete_event(id).await);
        assert!(layer.get_event(id).await.is_none());
        assert!(layer.get_clock(id).await.is_none());
        assert!(store.events().is_empty());
        assert!(store.clocks().is_empty());
        assert!(!layer.delete_event(id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn detached_layer_serves_from_cache() {
        let layer = PersistenceLayer::new(DEFAULT_CACHE_TIMEOUT);
        assert!(layer.is_degraded());
        let id = Uuid::new_v4();

        layer.save_clock(clock_record(id, 2)).await;
        assert_eq!(layer.get_clock(id).await.unwrap().current_quarter, 2);
        assert_eq!(layer.list_clocks().await.len(), 1);
        assert!(matches!(
            layer.health_check().await,
            Err(StorageError::Detached)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn installing_a_store_leaves_degraded_mode() {
        let layer = PersistenceLayer::new(DEFAULT_CACHE_TIMEOUT);
        let mut watcher = layer.degraded_watcher();
        layer
            .install_store(Arc::new(Arc::new(FlakyStore::default())))
            .await;

        assert!(!layer.is_degraded());
        assert!(watcher.has_changed().unwrap());
        assert!(!*watcher.borrow_and_update());
    }

    #[tokio::test(start_paused = true)]
    async fn batch_save_writes_every_record() {
        let (layer, store) = layer();
        let records: Vec<_> = (0..5).map(|_| clock_record(Uuid::new_v4(), 1)).collect();
        layer.save_clocks(records).await;
        assert_eq!(store.clocks().len(), 5);
        assert_eq!(layer.list_clocks().await.len(), 5);
    }
}
