//! Configuration for a Paddock worker.
//!
//! Values come from built-in defaults, an optional TOML file and
//! `PADDOCK__`-prefixed environment variables, in increasing priority, e.g.
//! `PADDOCK__ENGINE__MONITOR_INTERVAL_SECS=30`.

use crate::engine::{EngineConfig, RetryPolicy};
use crate::error::WorkflowResult;
use crate::phases::DispatcherConfig;
use crate::services::LocalArtifactStore;
use config::{Config, Environment, File, FileFormat};
use paddock_core::{ArtifactLayout, CoreResult, InMemoryRecordStore, RecordStore, SqliteRecordStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

pub const ENV_PREFIX: &str = "PADDOCK";

/// Engine step timeouts and retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    #[serde(default = "default_initialize_timeout_secs")]
    pub initialize_timeout_secs: u64,
    #[serde(default = "default_monitor_timeout_secs")]
    pub monitor_timeout_secs: u64,
    #[serde(default = "default_finalize_timeout_secs")]
    pub finalize_timeout_secs: u64,
    #[serde(default = "default_monitor_interval_secs")]
    pub monitor_interval_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_millis")]
    pub initial_backoff_millis: u64,
    #[serde(default = "default_backoff_rate")]
    pub backoff_rate: f64,
    /// Seconds a finished execution is kept for status queries.
    #[serde(default = "default_execution_retention_secs")]
    pub execution_retention_secs: u64,
}

fn default_initialize_timeout_secs() -> u64 {
    300
}

fn default_monitor_timeout_secs() -> u64 {
    60
}

fn default_finalize_timeout_secs() -> u64 {
    900
}

fn default_monitor_interval_secs() -> u64 {
    60
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_millis() -> u64 {
    5_000
}

fn default_backoff_rate() -> f64 {
    2.0
}

fn default_execution_retention_secs() -> u64 {
    86_400
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            initialize_timeout_secs: default_initialize_timeout_secs(),
            monitor_timeout_secs: default_monitor_timeout_secs(),
            finalize_timeout_secs: default_finalize_timeout_secs(),
            monitor_interval_secs: default_monitor_interval_secs(),
            max_attempts: default_max_attempts(),
            initial_backoff_millis: default_initial_backoff_millis(),
            backoff_rate: default_backoff_rate(),
            execution_retention_secs: default_execution_retention_secs(),
        }
    }
}

impl From<&EngineSettings> for EngineConfig {
    fn from(settings: &EngineSettings) -> Self {
        Self {
            initialize_timeout: Duration::from_secs(settings.initialize_timeout_secs),
            monitor_timeout: Duration::from_secs(settings.monitor_timeout_secs),
            finalize_timeout: Duration::from_secs(settings.finalize_timeout_secs),
            monitor_interval: Duration::from_secs(settings.monitor_interval_secs),
            retry: RetryPolicy {
                max_attempts: settings.max_attempts.max(1),
                initial_backoff: Duration::from_millis(settings.initial_backoff_millis),
                backoff_rate: settings.backoff_rate,
            },
            execution_retention: Duration::from_secs(settings.execution_retention_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatcherSettings {
    #[serde(default = "default_dispatch_delay_millis")]
    pub dispatch_delay_millis: u64,
    #[serde(default = "default_poll_interval_millis")]
    pub poll_interval_millis: u64,
    /// Seconds a received message stays hidden before redelivery.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    #[serde(default = "default_max_receive_count")]
    pub max_receive_count: u32,
}

fn default_dispatch_delay_millis() -> u64 {
    4_000
}

fn default_poll_interval_millis() -> u64 {
    1_000
}

fn default_visibility_timeout_secs() -> u64 {
    60
}

fn default_max_receive_count() -> u32 {
    5
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            dispatch_delay_millis: default_dispatch_delay_millis(),
            poll_interval_millis: default_poll_interval_millis(),
            visibility_timeout_secs: default_visibility_timeout_secs(),
            max_receive_count: default_max_receive_count(),
        }
    }
}

impl DispatcherSettings {
    #[must_use]
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

impl From<&DispatcherSettings> for DispatcherConfig {
    fn from(settings: &DispatcherSettings) -> Self {
        Self {
            dispatch_delay: Duration::from_millis(settings.dispatch_delay_millis),
            poll_interval: Duration::from_millis(settings.poll_interval_millis),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite database file. Records are kept in memory when unset.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_artifact_root")]
    pub artifact_root: PathBuf,
    #[serde(default = "default_bucket")]
    pub bucket: String,
}

fn default_artifact_root() -> PathBuf {
    PathBuf::from("./paddock-artifacts")
}

fn default_bucket() -> String {
    "paddock-models".to_string()
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self { database_path: None, artifact_root: default_artifact_root(), bucket: default_bucket() }
    }
}

impl StorageSettings {
    pub fn record_store(&self) -> CoreResult<Arc<dyn RecordStore>> {
        Ok(match &self.database_path {
            Some(path) => Arc::new(SqliteRecordStore::open(path)?),
            None => Arc::new(InMemoryRecordStore::new()),
        })
    }

    #[must_use]
    pub fn artifact_store(&self) -> LocalArtifactStore {
        LocalArtifactStore::new(&self.artifact_root)
    }

    #[must_use]
    pub fn layout(&self) -> ArtifactLayout {
        ArtifactLayout::new(&self.bucket)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directives, used when `RUST_LOG` is unset.
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default)]
    pub json: bool,
}

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaddockConfig {
    #[serde(default)]
    pub engine: EngineSettings,
    #[serde(default)]
    pub dispatcher: DispatcherSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl PaddockConfig {
    /// Loads configuration from `path` (if given) and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or malformed, or a value has the
    /// wrong type.
    pub fn load(path: Option<&Path>) -> WorkflowResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        }
        let config = builder
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__").try_parsing(true))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Writes the configuration as TOML, creating parent directories.
    pub fn write_toml(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let body = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        std::fs::write(path, body)
    }

    #[must_use]
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig::from(&self.engine)
    }

    #[must_use]
    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig::from(&self.dispatcher)
    }
}
