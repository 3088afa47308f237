use std::{sync::Arc, time::Duration};

use quarter_clock_back::{
    config::RegistryConfig,
    dao::{
        clock_store::{
            ClockStore,
            file::{FileClockStore, FileConfig},
        },
        models::ClockEntity,
        persistence::{DEFAULT_CACHE_TIMEOUT, PersistenceLayer},
    },
    state::{
        clock::{ClockConfig, ClockStatus},
        registry::ClockRegistry,
        time_source::{ManualTimeSource, TimeSource},
    },
};
use uuid::Uuid;

fn degraded_registry(time: &ManualTimeSource, config: RegistryConfig) -> ClockRegistry {
    ClockRegistry::new(
        Arc::new(PersistenceLayer::new(DEFAULT_CACHE_TIMEOUT)),
        Arc::new(time.clone()),
        config,
    )
}

async fn file_store(dir: &tempfile::TempDir) -> Arc<dyn ClockStore> {
    let store = FileClockStore::connect(FileConfig::new(dir.path()))
        .await
        .unwrap();
    Arc::new(store)
}

fn stored_registry(time: &ManualTimeSource, store: Arc<dyn ClockStore>) -> ClockRegistry {
    ClockRegistry::new(
        Arc::new(PersistenceLayer::with_store(store, DEFAULT_CACHE_TIMEOUT)),
        Arc::new(time.clone()),
        RegistryConfig::default(),
    )
}

#[tokio::test]
async fn pause_and_resume_accumulate_running_time() {
    let time = ManualTimeSource::default();
    let registry = degraded_registry(&time, RegistryConfig::default());
    let handle = registry
        .get_or_create(Uuid::new_v4(), ClockConfig::new(60.0, 4))
        .await;

    let _ = handle.with(|clock| clock.start());
    time.advance_secs(10.0);
    let _ = handle.with(|clock| clock.pause());
    assert_eq!(handle.read().time_remaining, 50.0);

    let _ = handle.with(|clock| clock.start());
    time.advance_secs(5.0);
    let _ = handle.with(|clock| clock.pause());
    assert_eq!(handle.read().time_remaining, 45.0);
}

#[tokio::test]
async fn expired_quarter_stops_on_read() {
    let time = ManualTimeSource::default();
    let registry = degraded_registry(&time, RegistryConfig::default());
    let id = Uuid::new_v4();
    let handle = registry.get_or_create(id, ClockConfig::new(5.0, 4)).await;

    let _ = handle.with(|clock| clock.start());
    time.advance_secs(6.0);

    let view = registry.read(id).await.unwrap();
    assert!(view.is_expired);
    assert_eq!(view.time_remaining, 0.0);
    assert!(!view.is_running);
    assert_eq!(view.status, ClockStatus::Scheduled);
}

#[tokio::test]
async fn quarters_stop_at_the_configured_total() {
    let time = ManualTimeSource::default();
    let registry = degraded_registry(&time, RegistryConfig::default());
    let handle = registry
        .get_or_create(Uuid::new_v4(), ClockConfig::new(600.0, 4))
        .await;

    for _ in 0..4 {
        let _ = handle.with(|clock| clock.next_quarter());
    }
    let view = handle.read();
    assert_eq!(view.status, ClockStatus::Finished);
    assert_eq!(view.current_quarter, 4);
    assert!(view.is_game_finished);

    for _ in 0..3 {
        let outcome = handle.with(|clock| clock.next_quarter());
        assert!(!outcome.is_applied());
    }
    let view = handle.read();
    assert_eq!(view.status, ClockStatus::Finished);
    assert_eq!(view.current_quarter, 4);
}

#[tokio::test]
async fn repeated_commands_are_idempotent() {
    let time = ManualTimeSource::default();
    let registry = degraded_registry(&time, RegistryConfig::default());
    let handle = registry
        .get_or_create(Uuid::new_v4(), ClockConfig::new(60.0, 4))
        .await;

    let _ = handle.with(|clock| clock.start());
    let once = handle.with(|clock| clock.state().clone());
    time.advance_secs(2.0);
    assert!(!handle.with(|clock| clock.start()).is_applied());
    assert_eq!(handle.with(|clock| clock.state().clone()), once);

    let _ = handle.with(|clock| clock.pause());
    let paused = handle.with(|clock| clock.state().clone());
    assert!(!handle.with(|clock| clock.pause()).is_applied());
    assert_eq!(handle.with(|clock| clock.state().clone()), paused);

    let _ = handle.with(|clock| clock.reset());
    let reset = handle.with(|clock| clock.state().clone());
    let _ = handle.with(|clock| clock.reset());
    assert_eq!(handle.with(|clock| clock.state().clone()), reset);
}

#[tokio::test]
async fn paused_clock_ignores_wall_time() {
    let time = ManualTimeSource::default();
    let registry = degraded_registry(&time, RegistryConfig::default());
    let handle = registry
        .get_or_create(Uuid::new_v4(), ClockConfig::new(90.0, 4))
        .await;

    let _ = handle.with(|clock| clock.start());
    time.advance_secs(12.5);
    let _ = handle.with(|clock| clock.pause());
    let frozen = handle.with(|clock| clock.current_time());

    for _ in 0..5 {
        time.advance_secs(3_600.0);
        assert_eq!(handle.with(|clock| clock.current_time()), frozen);
    }
}

#[tokio::test]
async fn sweep_keeps_the_registry_under_its_cap() {
    let time = ManualTimeSource::default();
    let config = RegistryConfig {
        max_instances: 100,
        ..RegistryConfig::default()
    };
    let registry = degraded_registry(&time, config);

    let mut ids = Vec::new();
    for _ in 0..150 {
        let id = Uuid::new_v4();
        registry.get_or_create(id, ClockConfig::new(600.0, 4)).await;
        ids.push(id);
        time.advance_secs(1.0);
    }
    assert_eq!(registry.len(), 150);

    let report = registry.sweep().await;
    assert!(registry.len() <= 100);
    assert_eq!(report.over_capacity, 50);
    assert!(!registry.contains(ids[0]));
    assert!(registry.contains(ids[149]));
}

#[tokio::test]
async fn idle_instances_are_evicted_after_the_ttl() {
    let time = ManualTimeSource::default();
    let config = RegistryConfig {
        eviction_ttl: Duration::from_secs(60),
        ..RegistryConfig::default()
    };
    let registry = degraded_registry(&time, config);
    let idle = Uuid::new_v4();
    let busy = Uuid::new_v4();
    registry.get_or_create(idle, ClockConfig::new(600.0, 4)).await;
    registry.get_or_create(busy, ClockConfig::new(600.0, 4)).await;

    time.advance_secs(45.0);
    registry.read(busy).await.unwrap();
    time.advance_secs(30.0);

    let report = registry.sweep().await;
    assert_eq!(report.expired, 1);
    assert!(!registry.contains(idle));
    assert!(registry.contains(busy));
}

#[tokio::test]
async fn running_record_restores_with_elapsed_time_applied() {
    let dir = tempfile::tempdir().unwrap();
    let store = file_store(&dir).await;
    let manual = ManualTimeSource::default();
    let now = manual.now();
    let id = Uuid::new_v4();
    let record = ClockEntity {
        event_id: id,
        is_running: true,
        started_at: Some(now - time::Duration::seconds(300)),
        accumulated_run_time_seconds: 0.0,
        current_quarter: 2,
        quarter_length_seconds: 900.0,
        status: ClockStatus::Live,
        created_at: now - time::Duration::hours(1),
        updated_at: now - time::Duration::seconds(300),
    };
    store.store_clocks(vec![record]).await.unwrap();

    let registry = stored_registry(&manual, store);
    let view = registry.read(id).await.unwrap();
    assert!((view.time_remaining - 600.0).abs() <= 0.1);
    assert!(view.is_running);
    assert_eq!(view.current_quarter, 2);
    assert_eq!(view.status, ClockStatus::Live);
}

#[tokio::test]
async fn clocks_survive_a_restart_through_the_file_store() {
    let dir = tempfile::tempdir().unwrap();
    let time = ManualTimeSource::default();
    let id = Uuid::new_v4();

    let first = stored_registry(&time, file_store(&dir).await);
    let handle = first.get_or_create(id, ClockConfig::new(600.0, 4)).await;
    let _ = handle.with(|clock| clock.start());
    time.advance_secs(30.0);
    let _ = handle.with(|clock| clock.pause());
    let _ = handle.with(|clock| clock.next_quarter());
    first.shutdown().await;
    assert!(first.is_empty());

    let second = stored_registry(&time, file_store(&dir).await);
    let view = second.read(id).await.unwrap();
    assert_eq!(view.current_quarter, 2);
    assert_eq!(view.time_remaining, 600.0);
    assert!(!view.is_running);
    assert_eq!(view.status, ClockStatus::Scheduled);
}

#[tokio::test]
async fn unknown_events_are_not_materialised() {
    let time = ManualTimeSource::default();
    let registry = degraded_registry(&time, RegistryConfig::default());
    let id = Uuid::new_v4();

    assert!(registry.read(id).await.is_none());
    assert!(!registry.contains(id));
    assert!(!registry.delete(id).await);
}
