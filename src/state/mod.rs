pub mod clock;
pub mod registry;
mod sse;
pub mod time_source;

use std::sync::Arc;

use tokio::sync::watch;

use crate::{
    config::AppConfig,
    dao::{clock_store::ClockStore, persistence::PersistenceLayer},
    services::{callbacks::EventRecordCallbacks, sse_events},
};

pub use self::sse::SseHub;
use self::{
    registry::ClockRegistry,
    time_source::{SharedTimeSource, SystemTimeSource},
};

pub type SharedState = Arc<AppState>;

/// Capacity of the clock SSE broadcast channel.
const CLOCK_SSE_CAPACITY: usize = 64;

/// Central application state: configuration, persistence, the clock registry and the
/// SSE hub fed by clock mutations.
pub struct AppState {
    config: AppConfig,
    persistence: Arc<PersistenceLayer>,
    registry: Arc<ClockRegistry>,
    clock_sse: Arc<SseHub>,
    time: SharedTimeSource,
}

impl AppState {
    /// Construct the state on the system clock, in degraded mode until a store is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_time_source(config, Arc::new(SystemTimeSource))
    }

    /// Construct the state on an arbitrary time source.
    pub fn with_time_source(config: AppConfig, time: SharedTimeSource) -> SharedState {
        let persistence = Arc::new(PersistenceLayer::new(config.persistence.cache_timeout));
        let clock_sse = Arc::new(SseHub::new(CLOCK_SSE_CAPACITY));
        let callbacks = Arc::new(EventRecordCallbacks::new(
            persistence.clone(),
            time.clone(),
        ));

        let registry = ClockRegistry::new(persistence.clone(), time.clone(), config.registry.clone())
            .with_callbacks(callbacks)
            .with_listener(sse_events::clock_listener(clock_sse.clone()));

        Arc::new(Self {
            config,
            persistence,
            registry: Arc::new(registry),
            clock_sse,
            time,
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Registry owning every live clock.
    pub fn registry(&self) -> &Arc<ClockRegistry> {
        &self.registry
    }

    /// Tiered persistence layer.
    pub fn persistence(&self) -> &Arc<PersistenceLayer> {
        &self.persistence
    }

    /// Shared time source.
    pub fn time(&self) -> &SharedTimeSource {
        &self.time
    }

    /// Broadcast hub used for the clock SSE stream.
    pub fn clock_sse(&self) -> &SseHub {
        &self.clock_sse
    }

    /// Install a new durable store and leave degraded mode.
    pub async fn install_store(&self, store: Arc<dyn ClockStore>) {
        self.persistence.install_store(store).await;
    }

    /// Remove the durable store and enter degraded mode.
    pub async fn clear_store(&self) {
        self.persistence.clear_store().await;
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        self.persistence.is_degraded()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.persistence.degraded_watcher()
    }

    /// Flip the degraded flag without touching the installed store.
    pub fn update_degraded(&self, value: bool) {
        self.persistence.update_degraded(value);
    }
}
