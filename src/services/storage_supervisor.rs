use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{clock_store::ClockStore, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_HEALTH_RETRIES: u32 = 3;

/// Connect to the durable store and keep the shared state in degraded mode while it is
/// unreachable.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn ClockStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                state.install_store(store.clone()).await;
                info!("storage connection established; leaving degraded mode");
                delay = INITIAL_DELAY;

                monitor(&state, store.as_ref()).await;

                warn!("storage health retries exhausted; reconnecting");
                state.clear_store().await;
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Poll the store health until it stays unreachable for [`MAX_HEALTH_RETRIES`] attempts.
async fn monitor(state: &SharedState, store: &dyn ClockStore) {
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("storage healthy again; leaving degraded mode");
                    state.update_degraded(false);
                }
                sleep(HEALTH_POLL_INTERVAL).await;
            }
            Err(err) => {
                warn!(error = %err, "storage health check failed; entering degraded mode");
                state.update_degraded(true);

                let mut retry_delay = INITIAL_DELAY;
                let mut recovered = false;
                for attempt in 1..=MAX_HEALTH_RETRIES {
                    sleep(retry_delay).await;
                    match store.health_check().await {
                        Ok(()) => {
                            info!(attempt, "storage health recovered");
                            recovered = true;
                            break;
                        }
                        Err(err) => {
                            warn!(attempt, error = %err, "storage health retry failed");
                            retry_delay = (retry_delay * 2).min(MAX_DELAY);
                        }
                    }
                }

                if !recovered {
                    return;
                }
                state.update_degraded(false);
                sleep(HEALTH_POLL_INTERVAL).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::AppConfig,
        dao::persistence::tests::FlakyStore,
        state::AppState,
    };

    #[tokio::test(start_paused = true)]
    async fn installs_the_store_and_tracks_its_health() {
        let state = AppState::new(AppConfig::default());
        assert!(state.is_degraded());
        let flaky = Arc::new(FlakyStore::default());

        let store = flaky.clone();
        let supervisor = tokio::spawn(run(state.clone(), move || {
            let store = store.clone();
            async move { Ok(Arc::new(store) as Arc<dyn ClockStore>) }
        }));

        sleep(Duration::from_millis(10)).await;
        assert!(!state.is_degraded());

        flaky.set_failing(true);
        sleep(HEALTH_POLL_INTERVAL + Duration::from_millis(10)).await;
        assert!(state.is_degraded());

        flaky.set_failing(false);
        sleep(INITIAL_DELAY * 4).await;
        assert!(!state.is_degraded());

        supervisor.abort();
    }
}
