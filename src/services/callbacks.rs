use std::sync::Arc;

use tokio::{runtime::Handle, sync::mpsc};
use tracing::{debug, warn};

use crate::{
    dao::{models::EventEntity, persistence::PersistenceLayer},
    state::{
        clock::{ClockStatus, EventId},
        registry::ClockCallbacks,
        time_source::SharedTimeSource,
    },
};

type ApplyChange = Box<dyn FnOnce(&mut EventEntity) + Send>;

/// One queued read-modify-save of an event record.
struct EventUpdate {
    event_id: EventId,
    change: &'static str,
    apply: ApplyChange,
}

/// Mirrors quarter progression onto the owning event record.
///
/// Updates are applied one at a time, in the order the clock emitted them, by a single
/// writer task.
pub struct EventRecordCallbacks {
    updates: Option<mpsc::UnboundedSender<EventUpdate>>,
}

impl EventRecordCallbacks {
    /// Build callbacks writing through `persistence`, spawning the writer task on the
    /// current Tokio runtime.
    pub fn new(persistence: Arc<PersistenceLayer>, time: SharedTimeSource) -> Self {
        let updates = Handle::try_current().ok().map(|runtime| {
            let (tx, rx) = mpsc::unbounded_channel();
            runtime.spawn(write_updates(persistence, time, rx));
            tx
        });
        Self { updates }
    }

    fn update_event<F>(&self, event_id: EventId, change: &'static str, apply: F)
    where
        F: FnOnce(&mut EventEntity) + Send + 'static,
    {
        let Some(updates) = &self.updates else {
            warn!(%event_id, change, "no runtime available; event record not updated");
            return;
        };

        let update = EventUpdate {
            event_id,
            change,
            apply: Box::new(apply),
        };
        if updates.send(update).is_err() {
            warn!(%event_id, change, "event record writer stopped; update dropped");
        }
    }
}

/// Drain queued updates until every sender is gone.
async fn write_updates(
    persistence: Arc<PersistenceLayer>,
    time: SharedTimeSource,
    mut rx: mpsc::UnboundedReceiver<EventUpdate>,
) {
    while let Some(EventUpdate {
        event_id,
        change,
        apply,
    }) = rx.recv().await
    {
        let Some(mut event) = persistence.get_event(event_id).await else {
            debug!(%event_id, change, "no event record to update");
            continue;
        };
        apply(&mut event);
        event.updated_at = time.now();
        persistence.save_event(event).await;
        debug!(%event_id, change, "event record updated");
    }
}

impl ClockCallbacks for EventRecordCallbacks {
    fn on_quarter_advance(&self, event_id: EventId, new_quarter: u32) {
        self.update_event(event_id, "quarter_advance", move |event| {
            event.current_quarter = new_quarter;
            if event.status != ClockStatus::Finished {
                event.status = ClockStatus::Scheduled;
            }
        });
    }

    fn on_event_finished(&self, event_id: EventId) {
        self.update_event(event_id, "finished", |event| {
            event.status = ClockStatus::Finished;
        });
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use uuid::Uuid;

    use super::*;
    use crate::{
        dao::persistence::{DEFAULT_CACHE_TIMEOUT, tests::FlakyStore},
        state::time_source::{ManualTimeSource, TimeSource},
    };

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn quarter_advance_and_finish_update_the_event_record() {
        let persistence = Arc::new(PersistenceLayer::new(DEFAULT_CACHE_TIMEOUT));
        let time = ManualTimeSource::default();
        let id = Uuid::new_v4();
        persistence
            .save_event(EventEntity::with_defaults(id, 600.0, 4, time.now()))
            .await;
        let callbacks = EventRecordCallbacks::new(persistence.clone(), Arc::new(time.clone()));

        time.advance_secs(30.0);
        callbacks.on_quarter_advance(id, 2);
        settle().await;
        let event = persistence.get_event(id).await.unwrap();
        assert_eq!(event.current_quarter, 2);
        assert_eq!(event.updated_at, time.now());

        callbacks.on_event_finished(id);
        settle().await;
        assert_eq!(
            persistence.get_event(id).await.unwrap().status,
            ClockStatus::Finished
        );

        callbacks.on_quarter_advance(id, 4);
        settle().await;
        let event = persistence.get_event(id).await.unwrap();
        assert_eq!(event.status, ClockStatus::Finished);
        assert_eq!(event.current_quarter, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn back_to_back_updates_apply_in_order_on_a_slow_store() {
        let store = Arc::new(FlakyStore::default());
        let persistence = Arc::new(PersistenceLayer::with_store(
            Arc::new(store.clone()),
            DEFAULT_CACHE_TIMEOUT,
        ));
        let time = ManualTimeSource::default();
        let id = Uuid::new_v4();
        persistence
            .save_event(EventEntity::with_defaults(id, 600.0, 4, time.now()))
            .await;
        let callbacks = EventRecordCallbacks::new(persistence.clone(), Arc::new(time.clone()));

        tokio::time::advance(DEFAULT_CACHE_TIMEOUT * 2).await;
        store.set_load_delay(Duration::from_millis(100));
        callbacks.on_quarter_advance(id, 4);
        callbacks.on_event_finished(id);
        tokio::time::sleep(Duration::from_secs(1)).await;

        let stored = store.events();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].current_quarter, 4);
        assert_eq!(stored[0].status, ClockStatus::Finished);
    }

    #[tokio::test]
    async fn missing_event_record_is_tolerated() {
        let persistence = Arc::new(PersistenceLayer::new(DEFAULT_CACHE_TIMEOUT));
        let callbacks = EventRecordCallbacks::new(
            persistence.clone(),
            Arc::new(ManualTimeSource::default()),
        );
        callbacks.on_event_finished(Uuid::new_v4());
        settle().await;
        assert!(persistence.list_events().await.is_empty());
    }
}
