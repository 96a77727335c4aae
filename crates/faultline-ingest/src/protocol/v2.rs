//! The `2.0` submission protocol.

use std::io::Read;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use flate2::read::ZlibDecoder;
use serde_json::{Map, Value};
use tracing::debug;

use super::{fields, IngestRequest, ProtocolParser};
use crate::error::{ProtocolError, ProtocolResult};
use crate::event::RawEvent;
use crate::interfaces::{hash, InterfaceRegistry, RawPayload};
use crate::types::{generate_event_id, Level};

/// Version string handled by [`V2Parser`].
pub const VERSION: &str = "2.0";

const DEFAULT_LOGGER: &str = "root";
const DEFAULT_PLATFORM: &str = "other";

/// Parser for protocol version `2.0`.
///
/// Bodies are JSON objects. On the wire they are either plain JSON, raw zlib
/// (`Content-Encoding: deflate`) or base64-encoded zlib.
#[derive(Debug, Clone)]
pub struct V2Parser {
    interfaces: Arc<InterfaceRegistry>,
}

impl V2Parser {
    #[must_use]
    pub fn new(interfaces: Arc<InterfaceRegistry>) -> Self {
        Self { interfaces }
    }
}

impl ProtocolParser for V2Parser {
    fn version(&self) -> &str {
        VERSION
    }

    fn decode_transport(&self, request: &IngestRequest) -> ProtocolResult<Vec<u8>> {
        let body = request.body.as_slice();

        let first = body.iter().find(|b| !b.is_ascii_whitespace());
        if first == Some(&b'{') {
            return Ok(body.to_vec());
        }

        let deflate = request
            .content_encoding
            .as_deref()
            .is_some_and(|enc| enc.trim().eq_ignore_ascii_case("deflate"));

        if deflate {
            inflate(body)
        } else {
            let trimmed = body.trim_ascii();
            let compressed = STANDARD
                .decode(trimmed)
                .map_err(|e| ProtocolError::Encoding(format!("base64: {e}")))?;
            inflate(&compressed)
        }
    }

    fn parse(&self, body: &[u8]) -> ProtocolResult<Vec<RawEvent>> {
        let mut payload: RawPayload = serde_json::from_slice(body)
            .map_err(|source| ProtocolError::MalformedJson { source })?;

        let mut event = RawEvent {
            event_id: String::new(),
            message: String::new(),
            level: Level::default(),
            logger: DEFAULT_LOGGER.to_owned(),
            server_name: String::new(),
            culprit: String::new(),
            platform: DEFAULT_PLATFORM.to_owned(),
            release: String::new(),
            version: VERSION.to_owned(),
            project: None,
            datetime: Utc::now(),
            checksum: String::new(),
            time_spent: None,
            tags: Default::default(),
            extra: Map::new(),
            data: Map::new(),
        };

        if let Some(raw) = payload.remove("event_id") {
            event.event_id = fields::event_id(&raw)?;
        }
        if let Some(raw) = payload.remove("message") {
            event.message = fields::string("message", &raw)?;
        }
        if let Some(raw) = payload.remove("level") {
            event.level = fields::level(&raw)?;
        }
        if let Some(raw) = payload.remove("logger") {
            let logger = fields::string("logger", &raw)?;
            if !logger.is_empty() {
                event.logger = logger;
            }
        }
        if let Some(raw) = payload.remove("server_name") {
            event.server_name = fields::string("server_name", &raw)?;
        }
        if let Some(raw) = payload.remove("culprit") {
            event.culprit = fields::string("culprit", &raw)?;
        }
        if let Some(raw) = payload.remove("platform") {
            let platform = fields::string("platform", &raw)?;
            if !platform.is_empty() {
                event.platform = platform;
            }
        }
        if let Some(raw) = payload.remove("release") {
            event.release = fields::string("release", &raw)?;
        }
        if let Some(raw) = payload.remove("project") {
            event.project = Some(fields::project(&raw)?);
        }
        if let Some(raw) = payload.remove("tags") {
            event.tags = fields::tags(&raw)?;
        }
        if let Some(raw) = payload.remove("timestamp") {
            event.datetime = fields::timestamp(&raw)?;
        }
        if let Some(raw) = payload.remove("time_spent") {
            event.time_spent = fields::time_spent(&raw)?;
        }
        if let Some(raw) = payload.remove("extra") {
            event.extra = fields::extra(&raw)?;
        }

        if event.event_id.is_empty() {
            event.event_id = generate_event_id();
        }

        let interfaces = self.interfaces.parse(&mut payload);

        event.checksum = match interfaces.first() {
            Some(primary) => primary.hash(),
            None => hash(&event.message),
        };

        for interface in &interfaces {
            event
                .data
                .insert(interface.id().to_owned(), interface.value().to_value());
        }

        for (key, raw) in payload {
            debug!(key = %key, "Archiving unknown field");
            event.data.insert(key, Value::String(raw.get().to_owned()));
        }

        debug!(
            event_id = %event.event_id,
            checksum = %event.checksum,
            interfaces = interfaces.len(),
            "Parsed event"
        );

        Ok(vec![event])
    }
}

fn inflate(compressed: &[u8]) -> ProtocolResult<Vec<u8>> {
    let mut decoder = ZlibDecoder::new(compressed);
    let mut body = Vec::new();
    decoder
        .read_to_end(&mut body)
        .map_err(|e| ProtocolError::Encoding(format!("zlib: {e}")))?;
    Ok(body)
}
