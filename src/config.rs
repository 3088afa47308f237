//! Application-level configuration loading: registry limits, persistence cache, and
//! client polling cadences.

use std::{
    env, fs,
    io::ErrorKind,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "QUARTER_CLOCK_CONFIG_PATH";
/// Shortest interval accepted for any periodic job.
const MIN_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Instance registry limits and maintenance cadence.
    pub registry: RegistryConfig,
    /// Persistence layer settings.
    pub persistence: PersistenceConfig,
    /// Client reconciliation cadences.
    pub sync: SyncConfig,
}

/// Limits and schedules of the clock instance registry.
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryConfig {
    /// Idle time after which an instance is evicted.
    pub eviction_ttl: Duration,
    /// How often the eviction sweep runs.
    pub sweep_interval: Duration,
    /// How often every live instance is flushed to storage.
    pub auto_save_interval: Duration,
    /// Hard cap on live instances after a sweep.
    pub max_instances: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            eviction_ttl: Duration::from_secs(2 * 60 * 60),
            sweep_interval: Duration::from_secs(30 * 60),
            auto_save_interval: Duration::from_secs(30),
            max_instances: 100,
        }
    }
}

/// Persistence layer settings.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistenceConfig {
    /// Age after which the process-local cache is stale.
    pub cache_timeout: Duration,
    /// Directory of the file backend.
    pub data_dir: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            cache_timeout: Duration::from_secs(5),
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Polling cadences of the controller and observer roles.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SyncConfig {
    /// Coarse re-fetch interval of the controller.
    pub controller_poll_interval: Duration,
    /// Poll interval of observers.
    pub observer_poll_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            controller_poll_interval: Duration::from_secs(10),
            observer_poll_interval: Duration::from_secs(3),
        }
    }
}

impl AppConfig {
    /// Load the configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        Self::load_from(&resolve_config_path())
    }

    /// Load the configuration from `path`, falling back to built-in defaults.
    pub fn load_from(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        max_instances = config.registry.max_instances,
                        "loaded configuration"
                    );
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    registry: RawRegistry,
    persistence: RawPersistence,
    sync: RawSync,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawRegistry {
    eviction_ttl_secs: Option<f64>,
    sweep_interval_secs: Option<f64>,
    auto_save_interval_secs: Option<f64>,
    max_instances: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawPersistence {
    cache_timeout_secs: Option<f64>,
    data_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSync {
    controller_poll_interval_secs: Option<f64>,
    observer_poll_interval_secs: Option<f64>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let registry_defaults = RegistryConfig::default();
        let persistence_defaults = PersistenceConfig::default();
        let sync_defaults = SyncConfig::default();

        Self {
            registry: RegistryConfig {
                eviction_ttl: seconds(value.registry.eviction_ttl_secs)
                    .unwrap_or(registry_defaults.eviction_ttl),
                sweep_interval: interval(value.registry.sweep_interval_secs)
                    .unwrap_or(registry_defaults.sweep_interval),
                auto_save_interval: interval(value.registry.auto_save_interval_secs)
                    .unwrap_or(registry_defaults.auto_save_interval),
                max_instances: value
                    .registry
                    .max_instances
                    .map(|max| max.max(1))
                    .unwrap_or(registry_defaults.max_instances),
            },
            persistence: PersistenceConfig {
                cache_timeout: seconds(value.persistence.cache_timeout_secs)
                    .unwrap_or(persistence_defaults.cache_timeout),
                data_dir: value
                    .persistence
                    .data_dir
                    .unwrap_or(persistence_defaults.data_dir),
            },
            sync: SyncConfig {
                controller_poll_interval: interval(value.sync.controller_poll_interval_secs)
                    .unwrap_or(sync_defaults.controller_poll_interval),
                observer_poll_interval: interval(value.sync.observer_poll_interval_secs)
                    .unwrap_or(sync_defaults.observer_poll_interval),
            },
        }
    }
}

/// Non-negative, finite seconds.
fn seconds(raw: Option<f64>) -> Option<Duration> {
    raw.filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

/// Seconds usable as a timer period.
fn interval(raw: Option<f64>) -> Option<Duration> {
    seconds(raw).map(|period| period.max(MIN_INTERVAL))
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}
