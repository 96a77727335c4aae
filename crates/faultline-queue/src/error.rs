use thiserror::Error;

use crate::types::MessageId;

#[derive(Debug, Error)]
pub enum QueueError {
    /// The message is not held by the named queue. It may have been acked
    /// already, or moved elsewhere.
    #[error("message {id} not found in queue '{queue}'")]
    UnknownMessage { queue: String, id: MessageId },

    #[error("queue backend '{0}' is not compiled in")]
    BackendDisabled(&'static str),

    #[error("invalid queue table name: {0}")]
    InvalidTable(String),

    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl QueueError {
    pub(crate) fn unknown(queue: &str, id: MessageId) -> Self {
        Self::UnknownMessage {
            queue: queue.to_owned(),
            id,
        }
    }
}
