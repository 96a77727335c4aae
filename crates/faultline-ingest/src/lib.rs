//! Faultline - error event ingestion and grouping.
//!
//! This crate turns raw error submissions into grouped, counted events:
//! - Parses versioned submissions into normalised [`RawEvent`]s
//! - Fingerprints each event from its highest-priority interface
//! - Queues events as compressed JSON with at-least-once delivery
//! - Drains the queue with a worker pool that groups and counts events
//!
//! ## Architecture
//!
//! ```text
//! IngestRequest → ProtocolRegistry → RawEvent → EventQueue
//!                        ↓                          ↓
//!               InterfaceRegistry           WorkerPool (N workers)
//!               (checksum)                          ↓
//!                                   EventGroup get-or-create → Event insert
//!                                                   ↓
//!                                   times_seen += 1 → callbacks → ack
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod ingest;
pub mod interfaces;
pub mod protocol;
pub mod store;
pub mod transport;
pub mod types;
pub mod worker;

pub use config::FaultlineConfig;
pub use error::{FaultlineError, ProtocolError, StoreError, TransportError, WorkerError};
pub use event::RawEvent;
pub use ingest::Ingestor;
pub use types::{GroupStatus, Level, ProjectId};
