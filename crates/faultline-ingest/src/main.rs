//! Faultline worker binary.
//!
//! Connects to the configured queue and store and runs the event worker pool
//! until Ctrl+C or SIGTERM.

use std::sync::Arc;

use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use faultline_ingest::{
    store,
    transport::EventQueue,
    worker::{Callbacks, EventProcessor, ProcessedEvent, WorkerPool},
    FaultlineConfig, FaultlineError,
};

#[tokio::main]
async fn main() -> Result<(), FaultlineError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "faultline_ingest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting faultline-ingest");

    let config = FaultlineConfig::load()?;
    info!(
        queue = %config.queue.name,
        workers = config.worker.count,
        compression_level = config.queue.compression_level,
        "Configuration loaded"
    );

    let backend = faultline_queue::connect(&config.queue.connection).await?;
    let queue = EventQueue::new(backend, &config.queue);
    info!(
        queue = %queue.queue_name(),
        dead_letter = %queue.dead_letter_name(),
        "Queue connected"
    );

    let store = store::connect(&config.store).await?;
    info!("Event store connected");

    let mut callbacks = Callbacks::new();
    callbacks.register(log_new_groups);
    let processor = EventProcessor::new(store, Arc::new(callbacks));

    let pool = WorkerPool::start(&config.worker, &queue, &processor);

    shutdown_signal().await;
    pool.shutdown().await;

    info!("faultline-ingest shutdown complete");
    Ok(())
}

fn log_new_groups(processed: &ProcessedEvent<'_>) {
    if processed.is_new_group || processed.is_regression {
        info!(
            group_id = processed.group.id,
            checksum = %processed.group.checksum,
            regression = processed.is_regression,
            message = %processed.group.message,
            "Group needs attention"
        );
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
    }
}
