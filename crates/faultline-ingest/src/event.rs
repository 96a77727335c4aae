//! The normalised, not-yet-persisted form of a submission.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{Level, ProjectId};

/// A parsed submission on its way through the queue.
///
/// Produced by a protocol parser, consumed exactly once by a worker. It is
/// never stored as-is: workers turn it into an `Event` row and fold it into
/// an `EventGroup`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub event_id: String,
    pub message: String,
    pub level: Level,
    pub logger: String,
    pub server_name: String,
    pub culprit: String,
    pub platform: String,
    pub release: String,
    /// Protocol version that produced this event.
    pub version: String,
    /// `None` until the ingress layer (or the body) supplies a project.
    pub project: Option<ProjectId>,
    pub datetime: DateTime<Utc>,
    pub checksum: String,
    /// Milliseconds spent in the failing operation, when reported.
    #[serde(default)]
    pub time_spent: Option<i64>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub extra: Map<String, Value>,
    /// Parsed interfaces keyed by interface id, plus archived unknown fields.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl RawEvent {
    /// Snapshot stored with each `Event` row: `data` plus tags and extra.
    #[must_use]
    pub fn snapshot(&self) -> Value {
        let mut snapshot = self.data.clone();
        if !self.tags.is_empty() {
            let tags = self
                .tags
                .iter()
                .map(|(k, v)| Value::Array(vec![Value::from(k.as_str()), Value::from(v.as_str())]))
                .collect();
            snapshot.insert("tags".to_owned(), Value::Array(tags));
        }
        if !self.extra.is_empty() {
            snapshot.insert("extra".to_owned(), Value::Object(self.extra.clone()));
        }
        Value::Object(snapshot)
    }
}
