use std::sync::Arc;

use serde::Deserialize;

use crate::error::QueueError;
use crate::traits::QueueBackend;

#[derive(Debug, Clone, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum QueueBackendConfig {
    #[default]
    Memory,
    Postgres {
        url: String,
        #[serde(default = "default_queue_table")]
        table: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
    },
}

fn default_queue_table() -> String {
    "faultline_queue".to_string()
}

fn default_max_connections() -> u32 {
    10
}

/// Build the queue backend described by `config`.
pub async fn connect(config: &QueueBackendConfig) -> Result<Arc<dyn QueueBackend>, QueueError> {
    match config {
        #[cfg(feature = "memory")]
        QueueBackendConfig::Memory => Ok(Arc::new(crate::memory::MemoryQueue::new())),
        #[cfg(not(feature = "memory"))]
        QueueBackendConfig::Memory => Err(QueueError::BackendDisabled("memory")),
        #[cfg(feature = "postgres")]
        QueueBackendConfig::Postgres {
            url,
            table,
            max_connections,
        } => {
            let queue =
                crate::postgres::PostgresQueue::new(url, table.clone(), *max_connections).await?;
            Ok(Arc::new(queue))
        }
        #[cfg(not(feature = "postgres"))]
        QueueBackendConfig::Postgres { .. } => Err(QueueError::BackendDisabled("postgres")),
    }
}
