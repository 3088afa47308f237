//! Process-wide registry owning at most one live [`GameClock`] per event.
//!
//! Instances are restored from the persistence layer on first use, written through on
//! every mutation, flushed again by a periodic auto-save, and dropped by a periodic
//! eviction sweep once idle or when the registry grows past its cap.

use std::{
    sync::{
        Arc, Mutex as StdMutex, PoisonError, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, DashSet, mapref::entry::Entry};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::{
    runtime::Handle,
    sync::watch,
    task::JoinHandle,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::{
    config::RegistryConfig,
    dao::{
        models::{ClockEntity, DEFAULT_TOTAL_QUARTERS},
        persistence::PersistenceLayer,
    },
    state::{
        clock::{
            ClockConfig, ClockEventKind, ClockEventSource, ClockPatch, ClockStatus, ClockView,
            EventId, GameClock, Listener, listener,
        },
        time_source::SharedTimeSource,
    },
};

/// Side effects owed to the event-metadata collaborator.
///
/// Invoked synchronously from the clock notification path; implementations must not
/// block.
pub trait ClockCallbacks: Send + Sync {
    /// The event moved on to `new_quarter`.
    fn on_quarter_advance(&self, event_id: EventId, new_quarter: u32);

    /// The final quarter of the event closed.
    fn on_event_finished(&self, event_id: EventId);
}

/// Cloneable handle to a live clock.
#[derive(Clone)]
pub struct ClockHandle {
    inner: Arc<StdMutex<GameClock>>,
    detached: Arc<AtomicBool>,
}

impl ClockHandle {
    fn new(clock: GameClock, detached: Arc<AtomicBool>) -> Self {
        Self {
            inner: Arc::new(StdMutex::new(clock)),
            detached,
        }
    }

    /// True once the event was deleted; mutations then reach no listener.
    pub fn is_detached(&self) -> bool {
        self.detached.load(Ordering::SeqCst)
    }

    fn detach(&self) {
        self.detached.store(true, Ordering::SeqCst);
    }

    /// Run `f` with exclusive access to the clock.
    pub fn with<R>(&self, f: impl FnOnce(&mut GameClock) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Stop the clock if its quarter ran out, then derive the read model.
    pub fn read(&self) -> ClockView {
        self.with(|clock| {
            clock.enforce_expiry();
            clock.view()
        })
    }
}

struct RegistryEntry {
    handle: ClockHandle,
    created_at: OffsetDateTime,
    last_accessed_at: OffsetDateTime,
}

/// Coarse occupancy indicator derived from the instance count against the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MemoryPressure {
    /// Below half of the cap.
    Low,
    /// Between half and 80% of the cap.
    Medium,
    /// At or above 80% of the cap.
    High,
}

impl MemoryPressure {
    fn from_occupancy(count: usize, cap: usize) -> Self {
        let ratio = count as f64 / cap.max(1) as f64;
        if ratio >= 0.8 {
            MemoryPressure::High
        } else if ratio >= 0.5 {
            MemoryPressure::Medium
        } else {
            MemoryPressure::Low
        }
    }
}

/// Operational snapshot of the registry.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    /// Live instances.
    pub instance_count: usize,
    /// Configured cap.
    pub max_instances: usize,
    /// Least recent access among live instances.
    #[serde(with = "time::serde::rfc3339::option")]
    pub oldest_access: Option<OffsetDateTime>,
    /// Most recent access among live instances.
    #[serde(with = "time::serde::rfc3339::option")]
    pub newest_access: Option<OffsetDateTime>,
    /// Occupancy level.
    pub pressure: MemoryPressure,
}

/// Result of one eviction sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries idle for longer than the TTL.
    pub expired: usize,
    /// Entries dropped to get back under the cap.
    pub over_capacity: usize,
}

struct BackgroundJobs {
    stop: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

/// Owner of every live clock in the process.
pub struct ClockRegistry {
    entries: DashMap<EventId, RegistryEntry>,
    persistence: Arc<PersistenceLayer>,
    time: SharedTimeSource,
    config: RegistryConfig,
    callbacks: Option<Arc<dyn ClockCallbacks>>,
    listeners: Vec<Listener>,
    /// Events whose deletion is still being flushed.
    deleting: DashSet<EventId>,
    runtime: Option<Handle>,
    jobs: StdMutex<Option<BackgroundJobs>>,
    shut_down: AtomicBool,
}

impl ClockRegistry {
    /// Create an empty registry. Background jobs are started separately.
    pub fn new(
        persistence: Arc<PersistenceLayer>,
        time: SharedTimeSource,
        config: RegistryConfig,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            persistence,
            time,
            config,
            callbacks: None,
            listeners: Vec::new(),
            deleting: DashSet::new(),
            runtime: Handle::try_current().ok(),
            jobs: StdMutex::new(None),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Install the side-effect callbacks attached to every clock.
    pub fn with_callbacks(mut self, callbacks: Arc<dyn ClockCallbacks>) -> Self {
        self.callbacks = Some(callbacks);
        self
    }

    /// Attach `listener` to every clock the registry creates or restores.
    pub fn with_listener(mut self, listener: Listener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Registry limits and cadences.
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Persistence layer backing the registry.
    pub fn persistence(&self) -> &Arc<PersistenceLayer> {
        &self.persistence
    }

    /// Shared time source.
    pub fn time(&self) -> &SharedTimeSource {
        &self.time
    }

    /// Number of live instances.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no instance is live.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether a live instance exists for `event_id`, without touching it.
    pub fn contains(&self, event_id: EventId) -> bool {
        self.entries.contains_key(&event_id)
    }

    /// Return the live clock for `event_id`, restoring or creating it with `config`.
    pub async fn get_or_create(&self, event_id: EventId, config: ClockConfig) -> ClockHandle {
        if let Some(handle) = self.touch(event_id) {
            return handle;
        }

        let now = self.time.now();
        let record = self.persistence.get_clock(event_id).await;
        let mut clock = GameClock::new(event_id, config, self.time.clone());
        let created_at = match &record {
            Some(record) => {
                let _ = clock.sync(ClockPatch::from(record), ClockEventSource::Registry);
                record.created_at
            }
            None => now,
        };
        let detached = Arc::new(AtomicBool::new(false));
        self.attach_listeners(&mut clock, created_at, &detached);
        let initial = ClockEntity::from_state(clock.state(), created_at, now);

        let (handle, inserted) = match self.entries.entry(event_id) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().last_accessed_at = now;
                (occupied.get().handle.clone(), false)
            }
            Entry::Vacant(vacant) => {
                let handle = ClockHandle::new(clock, detached);
                vacant.insert(RegistryEntry {
                    handle: handle.clone(),
                    created_at,
                    last_accessed_at: now,
                });
                (handle, true)
            }
        };

        if inserted {
            if record.is_some() {
                debug!(%event_id, "clock restored from persistence");
            } else {
                debug!(%event_id, "fresh clock created");
                self.persistence.save_clock(initial).await;
            }
        }
        handle
    }

    /// Return the live clock for `event_id`, deriving its configuration from persisted
    /// records. `None` when nothing is known about the event.
    pub async fn get_or_restore(&self, event_id: EventId) -> Option<ClockHandle> {
        if let Some(handle) = self.touch(event_id) {
            return Some(handle);
        }
        if self.deleting.contains(&event_id) {
            return None;
        }

        let config = match self.persistence.get_event(event_id).await {
            Some(event) => ClockConfig::new(
                event.settings.quarter_length_seconds(),
                event.settings.total_quarters,
            ),
            None => {
                let record = self.persistence.get_clock(event_id).await?;
                ClockConfig::new(record.quarter_length_seconds, DEFAULT_TOTAL_QUARTERS)
            }
        };
        Some(self.get_or_create(event_id, config).await)
    }

    /// Read path: enforce expiry and return the current view. `None` for unknown events.
    pub async fn read(&self, event_id: EventId) -> Option<ClockView> {
        self.get_or_restore(event_id)
            .await
            .map(|handle| handle.read())
    }

    /// Drop the live instance and every persisted record of the event.
    ///
    /// Returns whether anything was known about the event.
    ///
    /// Handles still held by in-flight commands are detached, so their later mutations
    /// are neither persisted nor announced.
    pub async fn delete(&self, event_id: EventId) -> bool {
        self.deleting.insert(event_id);
        let was_live = match self.entries.remove(&event_id) {
            Some((_, entry)) => {
                entry.handle.detach();
                true
            }
            None => false,
        };
        let had_clock = self.persistence.get_clock(event_id).await.is_some();
        let had_event = self.persistence.delete_event(event_id).await;
        self.deleting.remove(&event_id);
        if was_live || had_clock || had_event {
            info!(%event_id, "event deleted");
            true
        } else {
            false
        }
    }

    /// Drop idle instances, then the least recently used ones down to the cap.
    ///
    /// Evicted clocks are flushed before they are dropped.
    pub async fn sweep(&self) -> SweepReport {
        let now = self.time.now();
        let ttl = time::Duration::try_from(self.config.eviction_ttl).unwrap_or(time::Duration::MAX);

        let mut evicted: Vec<RegistryEntry> = Vec::new();
        let idle: Vec<EventId> = self
            .entries
            .iter()
            .filter(|entry| now - entry.last_accessed_at > ttl)
            .map(|entry| *entry.key())
            .collect();
        for event_id in idle {
            if let Some((_, entry)) = self
                .entries
                .remove_if(&event_id, |_, entry| now - entry.last_accessed_at > ttl)
            {
                evicted.push(entry);
            }
        }
        let expired = evicted.len();

        let excess = self.entries.len().saturating_sub(self.config.max_instances);
        if excess > 0 {
            let mut by_access: Vec<(EventId, OffsetDateTime)> = self
                .entries
                .iter()
                .map(|entry| (*entry.key(), entry.last_accessed_at))
                .collect();
            by_access.sort_by_key(|(_, accessed)| *accessed);
            for (event_id, _) in by_access.into_iter().take(excess) {
                if let Some((_, entry)) = self.entries.remove(&event_id) {
                    evicted.push(entry);
                }
            }
        }

        let report = SweepReport {
            expired,
            over_capacity: evicted.len() - expired,
        };
        if !evicted.is_empty() {
            let records = evicted
                .iter()
                .map(|entry| snapshot(entry, now))
                .collect();
            self.persistence.save_clocks(records).await;
            info!(
                expired = report.expired,
                over_capacity = report.over_capacity,
                remaining = self.entries.len(),
                "evicted idle clocks"
            );
        }
        report
    }

    /// Flush every live instance to the persistence layer. Returns how many were written.
    pub async fn save_all(&self) -> usize {
        let now = self.time.now();
        let records: Vec<ClockEntity> = self
            .entries
            .iter()
            .map(|entry| snapshot(&entry, now))
            .collect();
        let count = records.len();
        self.persistence.save_clocks(records).await;
        count
    }

    /// Occupancy snapshot for operational visibility.
    pub fn memory_stats(&self) -> MemoryStats {
        let mut oldest: Option<OffsetDateTime> = None;
        let mut newest: Option<OffsetDateTime> = None;
        let mut count = 0;
        for entry in self.entries.iter() {
            count += 1;
            let accessed = entry.last_accessed_at;
            oldest = Some(oldest.map_or(accessed, |current| current.min(accessed)));
            newest = Some(newest.map_or(accessed, |current| current.max(accessed)));
        }

        MemoryStats {
            instance_count: count,
            max_instances: self.config.max_instances,
            oldest_access: oldest,
            newest_access: newest,
            pressure: MemoryPressure::from_occupancy(count, self.config.max_instances),
        }
    }

    /// Spawn the eviction sweep and auto-save jobs. Calling it again is a no-op.
    pub fn start_background_jobs(self: &Arc<Self>) {
        let mut jobs = self.jobs.lock().unwrap_or_else(PoisonError::into_inner);
        if jobs.is_some() || self.shut_down.load(Ordering::SeqCst) {
            return;
        }

        let (stop, stop_rx) = watch::channel(false);
        let sweep = spawn_periodic(
            Arc::downgrade(self),
            self.config.sweep_interval,
            stop_rx.clone(),
            |registry| async move {
                registry.sweep().await;
            },
        );
        let auto_save = spawn_periodic(
            Arc::downgrade(self),
            self.config.auto_save_interval,
            stop_rx,
            |registry| async move {
                let saved = registry.save_all().await;
                debug!(saved, "auto-save completed");
            },
        );

        info!(
            sweep_interval = ?self.config.sweep_interval,
            auto_save_interval = ?self.config.auto_save_interval,
            "registry background jobs started"
        );
        *jobs = Some(BackgroundJobs {
            stop,
            handles: vec![sweep, auto_save],
        });
    }

    /// Stop the background jobs, flush every instance and clear the registry.
    ///
    /// Only the first call does anything.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let jobs = self
            .jobs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(jobs) = jobs {
            let _ = jobs.stop.send(true);
            for handle in jobs.handles {
                if let Err(err) = handle.await {
                    warn!(error = %err, "registry job ended abnormally");
                }
            }
        }

        let saved = self.save_all().await;
        self.entries.clear();
        info!(saved, "registry shut down");
    }

    fn touch(&self, event_id: EventId) -> Option<ClockHandle> {
        let mut entry = self.entries.get_mut(&event_id)?;
        entry.last_accessed_at = self.time.now();
        Some(entry.handle.clone())
    }

    fn attach_listeners(
        &self,
        clock: &mut GameClock,
        created_at: OffsetDateTime,
        detached: &Arc<AtomicBool>,
    ) {
        let persistence = self.persistence.clone();
        let runtime = self.runtime.clone();
        let gate = detached.clone();
        clock.subscribe(listener(move |event| {
            if gate.load(Ordering::SeqCst) {
                return Ok(());
            }
            let record =
                ClockEntity::from_state(&event.resulting_state, created_at, event.timestamp);
            persistence.stage_clock(record);
            if let Some(runtime) = &runtime {
                let persistence = persistence.clone();
                runtime.spawn(async move { persistence.flush_clocks().await });
            }
            Ok(())
        }));

        if let Some(callbacks) = self.callbacks.clone() {
            let gate = detached.clone();
            clock.subscribe(listener(move |event| {
                if event.kind != ClockEventKind::NextQuarter || gate.load(Ordering::SeqCst) {
                    return Ok(());
                }
                let state = &event.resulting_state;
                if state.status == ClockStatus::Finished {
                    callbacks.on_event_finished(event.event_id);
                } else {
                    callbacks.on_quarter_advance(event.event_id, state.current_quarter);
                }
                Ok(())
            }));
        }

        for extra in &self.listeners {
            let extra = extra.clone();
            let gate = detached.clone();
            clock.subscribe(listener(move |event| {
                if gate.load(Ordering::SeqCst) {
                    Ok(())
                } else {
                    extra(event)
                }
            }));
        }
    }
}

fn snapshot(entry: &RegistryEntry, now: OffsetDateTime) -> ClockEntity {
    entry
        .handle
        .with(|clock| ClockEntity::from_state(clock.state(), entry.created_at, now))
}

fn spawn_periodic<F, Fut>(
    registry: Weak<ClockRegistry>,
    period: Duration,
    mut stop: watch::Receiver<bool>,
    job: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<ClockRegistry>) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                    continue;
                }
            }

            let Some(registry) = registry.upgrade() else {
                break;
            };
            job(registry).await;
        }
    })
}
