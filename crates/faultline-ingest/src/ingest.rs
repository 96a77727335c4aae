//! Ingress entry point: parse a submission and queue it.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::FaultlineError;
use crate::protocol::{IngestRequest, ProtocolRegistry};
use crate::transport::EventQueue;

/// Accepts submissions on behalf of the ingress layer.
///
/// Parsing happens synchronously so bad submissions are rejected before they
/// reach the queue. Storage happens later, on a worker.
#[derive(Debug, Clone)]
pub struct Ingestor {
    protocols: Arc<ProtocolRegistry>,
    queue: EventQueue,
}

impl Ingestor {
    #[must_use]
    pub fn new(protocols: Arc<ProtocolRegistry>, queue: EventQueue) -> Self {
        Self { protocols, queue }
    }

    #[must_use]
    pub fn protocols(&self) -> &ProtocolRegistry {
        &self.protocols
    }

    /// Parse `request` with the `version` parser and queue the result.
    ///
    /// Returns the ids of the accepted events.
    pub async fn ingest(
        &self,
        request: &IngestRequest,
        version: &str,
    ) -> Result<Vec<String>, FaultlineError> {
        let events = self.protocols.parse_request(request, version)?;
        debug!(
            project = %request.project,
            version = %version,
            count = events.len(),
            "Submission parsed"
        );

        let mut accepted = Vec::with_capacity(events.len());
        for event in &events {
            self.queue.push_raw_event(event).await?;
            info!(
                event_id = %event.event_id,
                checksum = %event.checksum,
                project = %request.project,
                "Event queued"
            );
            accepted.push(event.event_id.clone());
        }

        Ok(accepted)
    }
}

#[cfg(test)]
mod tests {
    use faultline_queue::MemoryQueue;

    use super::*;
    use crate::config::QueueConfig;
    use crate::error::ProtocolError;
    use crate::interfaces::InterfaceRegistry;
    use crate::types::ProjectId;

    fn ingestor() -> (Ingestor, EventQueue) {
        let queue = EventQueue::new(Arc::new(MemoryQueue::new()), &QueueConfig::default());
        let protocols = Arc::new(ProtocolRegistry::with_defaults(Arc::new(
            InterfaceRegistry::with_defaults(),
        )));
        (Ingestor::new(protocols, queue.clone()), queue)
    }

    #[tokio::test]
    async fn accepted_event_is_queued() {
        let (ingestor, queue) = ingestor();
        let request = IngestRequest::new(ProjectId::new(4), r#"{"message":"queued"}"#);

        let ids = ingestor.ingest(&request, "2.0").await.unwrap();
        assert_eq!(ids.len(), 1);

        let delivery = queue.pop_raw_event().await.unwrap().unwrap();
        assert_eq!(delivery.event().event_id, ids[0]);
        assert_eq!(delivery.event().project, Some(ProjectId::new(4)));
    }

    #[tokio::test]
    async fn rejected_event_is_not_queued() {
        let (ingestor, queue) = ingestor();
        let request = IngestRequest::new(ProjectId::new(4), r#"{"level":"loud"}"#);

        let err = ingestor.ingest(&request, "2.0").await.unwrap_err();
        assert!(matches!(
            err,
            FaultlineError::Protocol(ProtocolError::InvalidField { field: "level", .. })
        ));
        assert!(queue.pop_raw_event().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_version_is_rejected() {
        let (ingestor, _queue) = ingestor();
        let request = IngestRequest::new(ProjectId::new(4), "{}");

        let err = ingestor.ingest(&request, "7.0").await.unwrap_err();
        assert!(matches!(err, FaultlineError::Protocol(ProtocolError::NotFound(_))));
    }
}
