//! Stacktrace interface and the frame-level grouping heuristic.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use super::{decode_into, hash, null_as_default, Interface};

/// Longest context line (in bytes) still trusted for grouping.
pub const MAX_CONTEXT_LINE_LEN: usize = 128;

/// Prefix of function names emitted for anonymous JavaScript callbacks.
const ANONYMOUS_FUNCTION_PREFIX: &str = "[Anonymous";

/// A single stack frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Frame {
    #[serde(deserialize_with = "null_as_default")]
    pub abs_path: String,
    #[serde(deserialize_with = "null_as_default")]
    pub filename: String,
    #[serde(deserialize_with = "null_as_default")]
    pub function: String,
    #[serde(deserialize_with = "null_as_default")]
    pub module: String,
    #[serde(deserialize_with = "null_as_default")]
    pub lineno: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub colno: i64,
    #[serde(deserialize_with = "null_as_default")]
    pub context_line: String,
    #[serde(deserialize_with = "null_as_default")]
    pub pre_context: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub post_context: Vec<String>,
    #[serde(deserialize_with = "null_as_default")]
    pub in_app: bool,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub vars: Value,
}

impl Frame {
    /// Fingerprint contribution of this frame.
    ///
    /// Module and filename anchor the frame; the context line is preferred
    /// over the function name only when no named function is present. A
    /// frame with nothing to anchor on (no module, no usable filename, no
    /// usable context) contributes an empty hash.
    #[must_use]
    pub fn hash(&self) -> String {
        let mut parts: Vec<String> = Vec::new();

        if !self.module.is_empty() {
            parts.push(self.module.clone());
        }
        if !self.filename.is_empty() && !self.filename.contains("://") {
            parts.push(self.filename.clone());
        }

        // A named function disqualifies the context line even when it would
        // otherwise be usable; grouping depends on keeping this exact rule.
        let can_use_context = !self.context_line.is_empty()
            && self.context_line.len() <= MAX_CONTEXT_LINE_LEN
            && (self.function.is_empty() || self.function.starts_with(ANONYMOUS_FUNCTION_PREFIX));

        if can_use_context {
            parts.push(self.context_line.clone());
        } else if parts.is_empty() {
            return String::new();
        } else if !self.function.is_empty() {
            parts.push(self.function.clone());
        } else if self.lineno != 0 {
            parts.push(self.lineno.to_string());
        }

        hash(&parts.join(":"))
    }
}

/// An ordered list of frames, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Stacktrace {
    #[serde(deserialize_with = "null_as_default")]
    pub frames: Vec<Frame>,
}

impl Interface for Stacktrace {
    fn hash(&self) -> String {
        let combined: String = self.frames.iter().map(Frame::hash).collect();
        hash(&combined)
    }

    fn template(&self) -> &'static str {
        "sentry/partial/interfaces/stacktrace.html"
    }

    fn decode(&mut self, raw: &RawValue) -> Result<(), serde_json::Error> {
        decode_into(self, raw)
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}
