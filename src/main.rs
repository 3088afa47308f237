//! Quarter clock binary entrypoint wiring the clock registry, persistence, REST and SSE layers.

use std::{env, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "couch-store")]
use quarter_clock_back::dao::clock_store::couchdb::{CouchClockStore, CouchConfig};
use quarter_clock_back::{
    config::AppConfig,
    dao::{
        clock_store::{
            ClockStore,
            file::{FileClockStore, FileConfig},
        },
        storage::StorageError,
    },
    routes,
    services::{sse_service, storage_supervisor},
    state::{AppState, SharedState},
};

/// Durable backend selected at startup.
#[derive(Clone)]
enum Backend {
    File(FileConfig),
    #[cfg(feature = "couch-store")]
    Couch(CouchConfig),
}

impl Backend {
    /// Prefer CouchDB when its environment is present, the data directory otherwise.
    fn select(data_dir: PathBuf) -> anyhow::Result<Self> {
        #[cfg(feature = "couch-store")]
        if let Some(config) = CouchConfig::from_env().context("reading CouchDB configuration")? {
            info!(base_url = %config.base_url, database = %config.database, "using CouchDB store");
            return Ok(Backend::Couch(config));
        }

        let config = FileConfig::from_env_or(data_dir);
        info!(directory = %config.directory.display(), "using file store");
        Ok(Backend::File(config))
    }

    async fn connect(self) -> Result<Arc<dyn ClockStore>, StorageError> {
        match self {
            Backend::File(config) => {
                let store = FileClockStore::connect(config).await?;
                Ok(Arc::new(store))
            }
            #[cfg(feature = "couch-store")]
            Backend::Couch(config) => {
                let store = CouchClockStore::connect(config).await?;
                Ok(Arc::new(store))
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load();
    let backend = Backend::select(config.persistence.data_dir.clone())?;
    let app_state = AppState::new(config);
    app_state.registry().start_background_jobs();

    tokio::spawn(storage_supervisor::run(app_state.clone(), move || {
        backend.clone().connect()
    }));
    tokio::spawn(sse_service::forward_degraded_changes(app_state.clone()));

    let app = build_router(app_state.clone());

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    app_state.registry().shutdown().await;
    Ok(())
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler; waiting for Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("shutdown signal received");
}
