use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use futures::future::BoxFuture;
use tokio::{
    sync::watch,
    time::{MissedTickBehavior, interval},
};
use tracing::{debug, info};

use crate::{
    config::SyncConfig,
    state::{
        clock::{ClockView, EventId},
        registry::ClockRegistry,
    },
    sync::{
        controller::{ControlCommand, Controller},
        observer::Observer,
    },
};

/// Where clients fetch authoritative clock state and send commands.
pub trait AuthoritativeSource: Send + Sync {
    /// Authoritative read path; `None` for unknown events.
    fn fetch(&self, event_id: EventId) -> BoxFuture<'static, Option<ClockView>>;

    /// Apply `command` authoritatively and return the resulting state.
    fn command(
        &self,
        event_id: EventId,
        command: ControlCommand,
    ) -> BoxFuture<'static, Option<ClockView>>;
}

impl AuthoritativeSource for Arc<ClockRegistry> {
    fn fetch(&self, event_id: EventId) -> BoxFuture<'static, Option<ClockView>> {
        let registry = self.clone();
        Box::pin(async move { registry.read(event_id).await })
    }

    fn command(
        &self,
        event_id: EventId,
        command: ControlCommand,
    ) -> BoxFuture<'static, Option<ClockView>> {
        let registry = self.clone();
        Box::pin(async move {
            let handle = registry.get_or_restore(event_id).await?;
            Some(handle.with(|clock| {
                clock.enforce_expiry();
                let _ = command.apply(clock);
                clock.view()
            }))
        })
    }
}

/// Issue `command` on the controller mirror, then authoritatively.
///
/// The authoritative reply is reconciled into the mirror. Returns it, or `None` when
/// the source does not know the event.
pub async fn issue_command(
    source: &dyn AuthoritativeSource,
    controller: &Mutex<Controller>,
    command: ControlCommand,
) -> Option<ClockView> {
    let event_id = {
        let mut controller = controller.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = controller.issue(command);
        controller.event_id()
    };
    let reply = source.command(event_id, command).await?;
    controller
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .reconcile(&reply);
    Some(reply)
}

/// Poll `source` every `observer_poll_interval`, overwriting the observer display with
/// each result.
///
/// Runs until `stop` turns true or its sender is dropped.
pub async fn run_observer(
    source: Arc<dyn AuthoritativeSource>,
    event_id: EventId,
    config: SyncConfig,
    observer: Arc<Mutex<Observer>>,
    stop: watch::Receiver<bool>,
) {
    let period = config.observer_poll_interval;
    poll_loop(source, event_id, period, stop, move |view| {
        observer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .apply(view);
    })
    .await;
}

/// Re-fetch authoritative state every `controller_poll_interval`, adopting it when the
/// controller mirror disagrees on `status` or `is_running`.
pub async fn run_controller(
    source: Arc<dyn AuthoritativeSource>,
    config: SyncConfig,
    controller: Arc<Mutex<Controller>>,
    stop: watch::Receiver<bool>,
) {
    let period = config.controller_poll_interval;
    let event_id = controller
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .event_id();
    poll_loop(source, event_id, period, stop, move |view| {
        let adopted = controller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reconcile(&view);
        if adopted {
            info!(%event_id, "controller mirror realigned with authoritative state");
        }
    })
    .await;
}

async fn poll_loop<F>(
    source: Arc<dyn AuthoritativeSource>,
    event_id: EventId,
    period: Duration,
    mut stop: watch::Receiver<bool>,
    mut on_snapshot: F,
) where
    F: FnMut(ClockView) + Send,
{
    debug!(%event_id, ?period, "polling authoritative clock");
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

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

        match source.fetch(event_id).await {
            Some(view) => on_snapshot(view),
            None => debug!(%event_id, "authoritative source does not know the event"),
        }
    }
}
