//! Error types for the ingestion pipeline.

use faultline_queue::QueueError;

use crate::types::ProjectId;

/// Result type alias using [`ProtocolError`].
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Result type alias using [`StoreError`].
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised while decoding a submission.
///
/// Every variant is a synchronous rejection: nothing that fails here reaches
/// the queue.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// No parser is registered for the requested protocol version.
    #[error("protocol version not found: {0}")]
    NotFound(String),

    /// A parser for this protocol version already exists.
    #[error("protocol version already registered: {0}")]
    AlreadyRegistered(String),

    /// The body is not a JSON object.
    #[error("malformed JSON body: {source}")]
    MalformedJson { source: serde_json::Error },

    /// A known top-level field failed to decode.
    #[error("invalid value for field '{field}': {value}")]
    InvalidField {
        /// Wire name of the field.
        field: &'static str,
        /// The raw JSON text that was rejected.
        value: String,
    },

    /// The transport encoding (base64/zlib) could not be undone.
    #[error("invalid transport encoding: {0}")]
    Encoding(String),

    /// The body names a different project than the authenticated one.
    #[error("project mismatch: request authenticated for {expected}, body names {actual}")]
    ProjectMismatch {
        /// Project resolved by the ingress layer.
        expected: ProjectId,
        /// Project found in the body.
        actual: ProjectId,
    },
}

impl ProtocolError {
    pub(crate) fn invalid_field(field: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            value: value.into(),
        }
    }
}

/// Errors crossing the queue boundary.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The queue backend failed.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Compressing or decompressing a payload failed.
    #[error("compression error: {0}")]
    Compression(#[from] std::io::Error),

    /// Encoding or decoding the JSON payload failed.
    #[error("serialisation error: {0}")]
    Serialisation(#[from] serde_json::Error),
}

/// Errors from the event store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Database error.
    #[cfg(feature = "postgres")]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The referenced group does not exist.
    #[error("event group not found: {0}")]
    GroupNotFound(i64),

    /// A stored value could not be decoded.
    #[error("serialisation error: {0}")]
    Serialisation(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Failure while processing a single queued event.
///
/// Any of these leaves the message unacknowledged so it is redelivered.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Top-level error for startup and configuration.
#[derive(Debug, thiserror::Error)]
pub enum FaultlineError {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}
