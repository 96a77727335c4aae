//! Background workers that drain the event queue into the store.
//!
//! Each worker polls the queue on a fixed interval. Once a message shows up
//! it drains the queue in a tight loop until the queue reports empty, then
//! goes back to idle polling:
//!
//! ```text
//! Idle ──tick──> Polling ──message──> Processing ──ok──> ack ──┐
//!  ^                │                      │                    │
//!  └────empty───────┘                      └──error──> (unacked)┤
//!                                                               v
//!                                                            Polling
//! ```

mod callbacks;
mod processor;

pub use callbacks::{Callbacks, EventHook, ProcessedEvent};
pub use processor::{EventProcessor, ProcessOutcome};

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use crate::transport::EventQueue;

/// A single queue consumer.
#[derive(Debug, Clone)]
pub struct Worker {
    id: usize,
    queue: EventQueue,
    processor: EventProcessor,
    poll_interval: Duration,
}

impl Worker {
    #[must_use]
    pub fn new(
        id: usize,
        queue: EventQueue,
        processor: EventProcessor,
        poll_interval: Duration,
    ) -> Self {
        Self {
            id,
            queue,
            processor,
            poll_interval,
        }
    }

    /// Run the worker loop until the cancellation token is triggered.
    ///
    /// A message already being processed is finished before the loop exits.
    pub async fn run(&self, cancel: CancellationToken) {
        info!(worker_id = self.id, "Event worker started");

        loop {
            self.drain(&cancel).await;

            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    info!(worker_id = self.id, "Event worker shutting down");
                    break;
                }

                () = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        info!(worker_id = self.id, "Event worker stopped");
    }

    /// Process messages until the queue is empty or shutdown is requested.
    async fn drain(&self, cancel: &CancellationToken) {
        while !cancel.is_cancelled() {
            match self.run_once().await {
                Ok(Some(_)) => {}
                Ok(None) => return,
                Err(WorkerError::Store(e)) => {
                    error!(
                        worker_id = self.id,
                        error = %e,
                        "Failed to store event, leaving for redelivery"
                    );
                }
                Err(WorkerError::Transport(e)) => {
                    warn!(worker_id = self.id, error = %e, "Queue unavailable, backing off");
                    return;
                }
            }
        }
    }

    /// Pop and process at most one event.
    ///
    /// Returns `Ok(None)` when the queue is empty. The message is acked only
    /// when processing succeeded.
    pub async fn run_once(&self) -> Result<Option<ProcessOutcome>, WorkerError> {
        let Some(delivery) = self.queue.pop_raw_event().await? else {
            return Ok(None);
        };

        debug!(
            worker_id = self.id,
            event_id = %delivery.event().event_id,
            checksum = %delivery.event().checksum,
            attempt = delivery.attempt(),
            "Processing event"
        );

        let outcome = self.processor.process(delivery.event()).await?;
        delivery.ack().await?;
        Ok(Some(outcome))
    }
}

/// A fixed set of workers sharing one queue and one store.
#[derive(Debug)]
pub struct WorkerPool {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
    shutdown_grace: Duration,
}

impl WorkerPool {
    /// Spawn `config.count` workers onto the current runtime.
    #[must_use]
    pub fn start(config: &WorkerConfig, queue: &EventQueue, processor: &EventProcessor) -> Self {
        let cancel = CancellationToken::new();
        let handles = (0..config.count)
            .map(|id| {
                let worker = Worker::new(
                    id,
                    queue.clone(),
                    processor.clone(),
                    config.poll_interval(),
                );
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    worker.run(cancel).await;
                })
            })
            .collect();

        info!(count = config.count, queue = %queue.queue_name(), "Event workers started");

        Self {
            cancel,
            handles,
            shutdown_grace: config.shutdown_grace(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Token that stops every worker when cancelled.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop the workers and wait for them.
    ///
    /// Workers get the grace period to finish the message in flight. Any
    /// still running after that are aborted; their unacked messages come back
    /// after the visibility timeout.
    pub async fn shutdown(self) {
        info!(grace = ?self.shutdown_grace, "Stopping event workers");
        self.cancel.cancel();

        let mut handles = self.handles;
        let joined = tokio::time::timeout(self.shutdown_grace, async {
            for handle in &mut handles {
                if let Err(e) = handle.await {
                    error!(error = %e, "Worker task failed");
                }
            }
        })
        .await;

        if joined.is_err() {
            let remaining = handles.iter().filter(|h| !h.is_finished()).count();
            warn!(remaining, "Shutdown grace period elapsed, aborting workers");
            for handle in &handles {
                handle.abort();
            }
        }

        info!("Event workers stopped");
    }
}
