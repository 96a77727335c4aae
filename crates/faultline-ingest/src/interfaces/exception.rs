//! Exception interface.

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use super::{decode_into, null_as_default, Interface, Stacktrace};

/// A raised exception, optionally carrying its own stacktrace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Exception {
    #[serde(deserialize_with = "null_as_default")]
    pub value: String,
    #[serde(rename = "type", deserialize_with = "null_as_default")]
    pub exception_type: String,
    #[serde(deserialize_with = "null_as_default")]
    pub module: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stacktrace: Option<Stacktrace>,
}

impl Interface for Exception {
    /// Groups by the nested stacktrace only; an exception without one
    /// contributes an empty hash.
    fn hash(&self) -> String {
        self.stacktrace
            .as_ref()
            .map(Interface::hash)
            .unwrap_or_default()
    }

    fn template(&self) -> &'static str {
        "sentry/partial/interfaces/exception.html"
    }

    fn decode(&mut self, raw: &RawValue) -> Result<(), serde_json::Error> {
        decode_into(self, raw)
    }

    fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::Frame;

    #[test]
    fn hash_delegates_to_stacktrace() {
        let stacktrace = Stacktrace {
            frames: vec![Frame {
                module: "app".to_owned(),
                function: "main".to_owned(),
                ..Frame::default()
            }],
        };
        let exception = Exception {
            value: "bad".to_owned(),
            exception_type: "ValueError".to_owned(),
            stacktrace: Some(stacktrace.clone()),
            ..Exception::default()
        };

        assert_eq!(exception.hash(), stacktrace.hash());
    }

    #[test]
    fn hash_is_empty_without_stacktrace() {
        let exception = Exception {
            value: "bad".to_owned(),
            exception_type: "ValueError".to_owned(),
            ..Exception::default()
        };
        assert_eq!(exception.hash(), "");
    }

    #[test]
    fn decode_reads_type_and_nested_frames() {
        let raw = RawValue::from_string(
            r#"{"type":"KeyError","value":"'x'","stacktrace":{"frames":[{"module":"m"}]}}"#
                .to_owned(),
        )
        .unwrap();
        let mut exception = Exception::default();
        exception.decode(&raw).unwrap();

        assert_eq!(exception.exception_type, "KeyError");
        assert_eq!(exception.stacktrace.unwrap().frames[0].module, "m");
    }
}
