//! Durable queue backends for faultline.
//!
//! Every backend implements [`QueueBackend`], which offers at-least-once
//! delivery: a received message stays invisible for a visibility timeout and
//! comes back unless it is acknowledged. Messages that cannot be processed
//! are moved, not copied, to a dead-letter queue with
//! [`QueueBackend::dead_letter`].

mod config;
mod error;
mod traits;
mod types;

#[cfg(feature = "memory")]
mod memory;

#[cfg(feature = "postgres")]
mod postgres;

pub use config::{connect, QueueBackendConfig};
pub use error::QueueError;
pub use traits::QueueBackend;
pub use types::{Message, MessageId};

#[cfg(feature = "memory")]
pub use memory::MemoryQueue;

#[cfg(feature = "postgres")]
pub use postgres::PostgresQueue;
