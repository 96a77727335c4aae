//! Decoders for the known top-level submission fields.
//!
//! Each decoder takes the raw JSON text of one field and either returns the
//! typed value or an [`ProtocolError::InvalidField`] naming the field and
//! the rejected text.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::value::RawValue;
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{ProtocolError, ProtocolResult};
use crate::types::{Level, ProjectId};

/// Wire layout of `timestamp`, always read as UTC.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

fn invalid(field: &'static str, raw: &RawValue) -> ProtocolError {
    ProtocolError::invalid_field(field, raw.get())
}

/// A string field; `null` reads as empty.
pub fn string(field: &'static str, raw: &RawValue) -> ProtocolResult<String> {
    serde_json::from_str::<Option<String>>(raw.get())
        .map(Option::unwrap_or_default)
        .map_err(|_| invalid(field, raw))
}

/// `event_id`: 32 hex chars, dashes allowed and stripped.
pub fn event_id(raw: &RawValue) -> ProtocolResult<String> {
    let value = string("event_id", raw)?;
    let id: String = value
        .chars()
        .filter(|c| *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect();
    if id.len() == 32 && id.chars().all(|c| c.is_ascii_hexdigit()) {
        Ok(id)
    } else {
        Err(invalid("event_id", raw))
    }
}

/// `level`: a level name or its numeric code.
pub fn level(raw: &RawValue) -> ProtocolResult<Level> {
    match serde_json::from_str::<Value>(raw.get()) {
        Ok(Value::String(name)) => name.parse().map_err(|_| invalid("level", raw)),
        Ok(Value::Number(code)) => code
            .as_i64()
            .and_then(Level::from_code)
            .ok_or_else(|| invalid("level", raw)),
        _ => Err(invalid("level", raw)),
    }
}

/// `project`: a numeric string or a JSON integer.
pub fn project(raw: &RawValue) -> ProtocolResult<ProjectId> {
    match serde_json::from_str::<Value>(raw.get()) {
        Ok(Value::String(s)) => s.parse().map_err(|_| invalid("project", raw)),
        Ok(Value::Number(n)) => n
            .as_i64()
            .map(ProjectId::new)
            .ok_or_else(|| invalid("project", raw)),
        _ => Err(invalid("project", raw)),
    }
}

/// `tags`: either an object of strings or a list of `[key, value]` pairs.
///
/// In the list form, entries that are not two-string pairs are skipped.
pub fn tags(raw: &RawValue) -> ProtocolResult<BTreeMap<String, String>> {
    if let Ok(map) = serde_json::from_str::<BTreeMap<String, String>>(raw.get()) {
        return Ok(map);
    }

    let entries: Vec<Value> =
        serde_json::from_str(raw.get()).map_err(|_| invalid("tags", raw))?;

    let mut tags = BTreeMap::new();
    for entry in entries {
        match serde_json::from_value::<(String, String)>(entry) {
            Ok((key, value)) => {
                tags.insert(key, value);
            }
            Err(e) => debug!(error = %e, "Skipping malformed tag pair"),
        }
    }
    Ok(tags)
}

/// `timestamp` in [`TIMESTAMP_FORMAT`].
pub fn timestamp(raw: &RawValue) -> ProtocolResult<DateTime<Utc>> {
    let text = string("timestamp", raw)?;
    NaiveDateTime::parse_from_str(&text, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| invalid("timestamp", raw))
}

/// `time_spent` in milliseconds; `null` reads as absent.
pub fn time_spent(raw: &RawValue) -> ProtocolResult<Option<i64>> {
    serde_json::from_str::<Option<i64>>(raw.get()).map_err(|_| invalid("time_spent", raw))
}

/// `extra`: a free-form object; `null` reads as empty.
pub fn extra(raw: &RawValue) -> ProtocolResult<Map<String, Value>> {
    serde_json::from_str::<Option<Map<String, Value>>>(raw.get())
        .map(Option::unwrap_or_default)
        .map_err(|_| invalid("extra", raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};
    use rstest::rstest;

    fn raw(text: &str) -> Box<RawValue> {
        RawValue::from_string(text.to_owned()).unwrap()
    }

    #[rstest]
    #[case(r#"[["browser","chrome"],["os","mac"]]"#)]
    #[case(r#"{"browser":"chrome","os":"mac"}"#)]
    fn tags_accept_pairs_and_maps(#[case] text: &str) {
        let tags = tags(&raw(text)).unwrap();
        assert_eq!(tags.get("browser").map(String::as_str), Some("chrome"));
        assert_eq!(tags.get("os").map(String::as_str), Some("mac"));
    }

    #[test]
    fn malformed_tag_pairs_are_skipped() {
        let tags = tags(&raw(r#"[["a","1"],["b"],"c",["d","4","extra"],["e","5"]]"#)).unwrap();
        assert_eq!(tags.len(), 2);
        assert!(tags.contains_key("a"));
        assert!(tags.contains_key("e"));
    }

    #[rstest]
    #[case(r#""chrome""#)]
    #[case("42")]
    #[case(r#"{"nested":{"x":1}}"#)]
    fn tags_reject_other_shapes(#[case] text: &str) {
        let err = tags(&raw(text)).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidField { field: "tags", .. }));
    }

    #[test]
    fn timestamp_with_and_without_fraction() {
        let ts = timestamp(&raw(r#""2012-08-31T15:20:01""#)).unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day()), (2012, 8, 31));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (15, 20, 1));

        let ts = timestamp(&raw(r#""2012-08-31T15:20:01.250000""#)).unwrap();
        assert_eq!(ts.timestamp_subsec_millis(), 250);
    }

    #[rstest]
    #[case(r#""31/08/2012""#)]
    #[case(r#""2012-08-31 15:20:01""#)]
    #[case("1346426401")]
    fn timestamp_rejects_other_layouts(#[case] text: &str) {
        let err = timestamp(&raw(text)).unwrap_err();
        match err {
            ProtocolError::InvalidField { field, value } => {
                assert_eq!(field, "timestamp");
                assert_eq!(value, text);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[rstest]
    #[case(r#""error""#, Level::Error)]
    #[case(r#""WARNING""#, Level::Warning)]
    #[case("20", Level::Info)]
    fn level_accepts_names_and_codes(#[case] text: &str, #[case] expected: Level) {
        assert_eq!(level(&raw(text)).unwrap(), expected);
    }

    #[test]
    fn level_rejects_unknown() {
        assert!(level(&raw(r#""loud""#)).is_err());
        assert!(level(&raw("15")).is_err());
    }

    #[test]
    fn project_accepts_string_and_integer() {
        assert_eq!(project(&raw(r#""7""#)).unwrap(), ProjectId::new(7));
        assert_eq!(project(&raw("7")).unwrap(), ProjectId::new(7));
        assert!(project(&raw(r#""seven""#)).is_err());
    }

    #[test]
    fn event_id_is_normalised() {
        let id = event_id(&raw(r#""0123ABCD-0123-4567-89ab-0123456789AB""#)).unwrap();
        assert_eq!(id, "0123abcd0123456789ab0123456789ab");
        assert!(event_id(&raw(r#""not-hex""#)).is_err());
    }

    #[test]
    fn nullable_fields() {
        assert_eq!(string("message", &raw("null")).unwrap(), "");
        assert_eq!(time_spent(&raw("null")).unwrap(), None);
        assert!(extra(&raw("null")).unwrap().is_empty());
        assert!(string("message", &raw("12")).is_err());
    }
}
