//! Versioned wire-protocol parsing.
//!
//! Each protocol version has a parser that undoes the transport encoding,
//! maps the known top-level fields onto a [`RawEvent`] and hands everything
//! else to the [`InterfaceRegistry`](crate::interfaces::InterfaceRegistry).
//! Parsers are looked up by version string in a [`ProtocolRegistry`].

mod fields;
mod registry;
mod v2;

use std::fmt;
use std::sync::Arc;

use crate::error::{ProtocolError, ProtocolResult};
use crate::event::RawEvent;
use crate::types::ProjectId;

pub use registry::ProtocolRegistry;
pub use v2::{V2Parser, VERSION as V2_VERSION};

/// Builds a parser for one protocol version.
pub type ParserFactory = Arc<dyn Fn() -> Box<dyn ProtocolParser> + Send + Sync>;

/// A submission as handed over by the ingress layer.
///
/// The project has already been authenticated; the body is exactly what the
/// client sent.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    pub project: ProjectId,
    pub body: Vec<u8>,
    /// Value of the `Content-Encoding` header, if any.
    pub content_encoding: Option<String>,
}

impl IngestRequest {
    /// Create a request with no content encoding.
    #[must_use]
    pub fn new(project: ProjectId, body: impl Into<Vec<u8>>) -> Self {
        Self {
            project,
            body: body.into(),
            content_encoding: None,
        }
    }

    /// Set the `Content-Encoding` header value.
    #[must_use]
    pub fn with_content_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.content_encoding = Some(encoding.into());
        self
    }
}

/// Decoder for a single protocol version.
pub trait ProtocolParser: fmt::Debug + Send + Sync {
    /// The version string this parser handles.
    fn version(&self) -> &str;

    /// Parse an already transport-decoded JSON body.
    fn parse(&self, body: &[u8]) -> ProtocolResult<Vec<RawEvent>>;

    /// Undo the transport encoding of a request body.
    ///
    /// The default treats the body as plain JSON.
    fn decode_transport(&self, request: &IngestRequest) -> ProtocolResult<Vec<u8>> {
        Ok(request.body.clone())
    }

    /// Decode, parse and bind the events to the request's project.
    fn parse_request(&self, request: &IngestRequest) -> ProtocolResult<Vec<RawEvent>> {
        let body = self.decode_transport(request)?;
        let mut events = self.parse(&body)?;
        for event in &mut events {
            bind_project(event, request.project)?;
        }
        Ok(events)
    }
}

/// Fill in a missing project, or reject one that disagrees with the request.
fn bind_project(event: &mut RawEvent, expected: ProjectId) -> ProtocolResult<()> {
    match event.project {
        None => {
            event.project = Some(expected);
            Ok(())
        }
        Some(actual) if actual == expected => Ok(()),
        Some(actual) => Err(ProtocolError::ProjectMismatch { expected, actual }),
    }
}
