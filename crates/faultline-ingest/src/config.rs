//! Configuration types for the ingestion pipeline.

use std::time::Duration;

use faultline_queue::QueueBackendConfig;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;

use crate::FaultlineError;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "faultline.toml";

/// Default queue name.
pub const DEFAULT_QUEUE_NAME: &str = "events";

/// Default zlib level for queued events.
pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

/// Default delivery attempts before a message is dead-lettered.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default time a received message stays hidden from other workers.
pub const DEFAULT_VISIBILITY_TIMEOUT_SECS: u64 = 30;

/// Default number of workers.
pub const DEFAULT_WORKER_COUNT: usize = 4;

/// Default idle poll interval in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default time workers get to finish in-flight work on shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_SECS: u64 = 10;

/// Default PostgreSQL pool size for the event store.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Pipeline configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FaultlineConfig {
    pub queue: QueueConfig,
    pub worker: WorkerConfig,
    pub store: StoreConfig,
}

impl FaultlineConfig {
    /// Load configuration from files and environment.
    ///
    /// Configuration is loaded in order (later sources override earlier):
    /// 1. Default values
    /// 2. `faultline.toml` in current directory
    /// 3. Environment variables prefixed with `FAULTLINE_`, nested with `__`
    pub fn load() -> Result<Self, FaultlineError> {
        Self::load_from(DEFAULT_CONFIG_FILE)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &str) -> Result<Self, FaultlineError> {
        let config: Self = Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("FAULTLINE_").split("__"))
            .extract()
            .map_err(|e| FaultlineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), FaultlineError> {
        if self.queue.compression_level > 9 {
            return Err(FaultlineError::Config(format!(
                "queue.compression_level must be between 0 and 9, got {}",
                self.queue.compression_level
            )));
        }
        if self.queue.max_attempts == 0 {
            return Err(FaultlineError::Config(
                "queue.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.worker.count == 0 {
            return Err(FaultlineError::Config(
                "worker.count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Queue transport configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Name of the queue events are published to.
    pub name: String,
    /// Backend connection.
    pub connection: QueueBackendConfig,
    /// zlib level, 0 (store) to 9 (best).
    pub compression_level: u32,
    /// Deliveries allowed before a message is dead-lettered.
    pub max_attempts: u32,
    /// Seconds a received message stays hidden before redelivery.
    pub visibility_timeout_secs: u64,
}

impl QueueConfig {
    /// Name of the queue poison messages are moved to.
    #[must_use]
    pub fn dead_letter_name(&self) -> String {
        format!("{}.dead", self.name)
    }

    #[must_use]
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_secs)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_QUEUE_NAME.to_string(),
            connection: QueueBackendConfig::default(),
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            visibility_timeout_secs: DEFAULT_VISIBILITY_TIMEOUT_SECS,
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Number of concurrent workers.
    pub count: usize,
    /// Sleep between polls of an empty queue, in milliseconds.
    pub poll_interval_ms: u64,
    /// Seconds to wait for workers on shutdown before aborting them.
    pub shutdown_grace_secs: u64,
}

impl WorkerConfig {
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            count: DEFAULT_WORKER_COUNT,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE_SECS,
        }
    }
}

/// Event store backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StoreConfig {
    /// In-memory store (for testing).
    #[default]
    Memory,
    /// PostgreSQL.
    Postgres {
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_max_connections() -> u32 {
    DEFAULT_MAX_CONNECTIONS
}
