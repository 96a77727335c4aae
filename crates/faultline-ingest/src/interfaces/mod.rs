//! Pluggable event interfaces and the registry that dispatches to them.
//!
//! An interface is a named sub-structure of a submission (request context,
//! exception, stacktrace) that knows how to contribute to the event's
//! fingerprint. Interfaces are matched by key: the registry walks its
//! descriptors in priority order and claims the first key that matches a
//! descriptor's id or one of its aliases.
//!
//! ```text
//! payload keys ──> InterfaceRegistry::parse ──> [ParsedInterface] (by score, desc)
//!                        │                              │
//!                        v                              v
//!              consumed keys removed          first.hash() = checksum
//! ```

mod exception;
mod http;
mod registry;
mod stacktrace;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Deserializer};
use serde_json::value::RawValue;
use serde_json::Value;

pub use exception::Exception;
pub use http::Http;
pub use registry::{InterfaceDescriptor, InterfaceFactory, InterfaceRegistry};
pub use stacktrace::{Frame, Stacktrace, MAX_CONTEXT_LINE_LEN};

/// Top-level submission fields that have not been claimed yet.
pub type RawPayload = HashMap<String, Box<RawValue>>;

/// Lowercase hex MD5 digest, the fingerprint primitive for every interface.
#[must_use]
pub fn hash(input: &str) -> String {
    format!("{:x}", md5::compute(input.as_bytes()))
}

/// A decoded interface value.
pub trait Interface: fmt::Debug + Send + Sync {
    /// Fingerprint contribution. May be empty.
    fn hash(&self) -> String;

    /// Name of the template used to render this interface.
    fn template(&self) -> &'static str;

    /// Replace the contents with the decoded fragment.
    ///
    /// On error the current (default) contents are left untouched.
    fn decode(&mut self, raw: &RawValue) -> Result<(), serde_json::Error>;

    /// JSON form stored in the event's data.
    fn to_value(&self) -> Value;
}

/// An interface as matched by the registry, carrying its id and score.
#[derive(Debug)]
pub struct ParsedInterface {
    id: String,
    score: i32,
    value: Box<dyn Interface>,
}

impl ParsedInterface {
    #[must_use]
    pub fn new(id: impl Into<String>, score: i32, value: Box<dyn Interface>) -> Self {
        Self {
            id: id.into(),
            score,
            value,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    #[must_use]
    pub const fn score(&self) -> i32 {
        self.score
    }

    pub fn set_score(&mut self, score: i32) {
        self.score = score;
    }

    #[must_use]
    pub fn hash(&self) -> String {
        self.value.hash()
    }

    #[must_use]
    pub fn template(&self) -> &'static str {
        self.value.template()
    }

    #[must_use]
    pub fn value(&self) -> &dyn Interface {
        self.value.as_ref()
    }
}

/// Decode `raw` into `target`, leaving `target` unchanged on failure.
pub(crate) fn decode_into<T>(target: &mut T, raw: &RawValue) -> Result<(), serde_json::Error>
where
    T: for<'de> Deserialize<'de>,
{
    *target = serde_json::from_str(raw.get())?;
    Ok(())
}

/// Treat an explicit `null` like a missing field.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Read a string map given either as an object or as `[key, value]` pairs.
///
/// Malformed pairs and `null` values are dropped; other non-string values
/// keep their JSON text.
pub(crate) fn lenient_string_map<'de, D>(
    deserializer: D,
) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Shape {
        Map(BTreeMap<String, Value>),
        Pairs(Vec<Value>),
    }

    fn text(value: Value) -> Option<String> {
        match value {
            Value::Null => None,
            Value::String(s) => Some(s),
            other => Some(other.to_string()),
        }
    }

    let entries = match Option::<Shape>::deserialize(deserializer)? {
        None => BTreeMap::new(),
        Some(Shape::Map(map)) => map
            .into_iter()
            .filter_map(|(key, value)| Some((key, text(value)?)))
            .collect(),
        Some(Shape::Pairs(pairs)) => pairs
            .into_iter()
            .filter_map(|pair| match pair {
                Value::Array(mut kv) if kv.len() == 2 => {
                    let value = text(kv.pop()?)?;
                    match kv.pop()? {
                        Value::String(key) => Some((key, value)),
                        _ => None,
                    }
                }
                _ => None,
            })
            .collect(),
    };
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_md5_hex() {
        assert_eq!(hash(""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(hash("hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn parsed_interface_accessors() {
        let mut parsed = ParsedInterface::new("a", 1, Box::new(Http::default()));
        parsed.set_id("b");
        parsed.set_score(7);

        assert_eq!(parsed.id(), "b");
        assert_eq!(parsed.score(), 7);
        assert_eq!(parsed.template(), Http::default().template());
    }
}
