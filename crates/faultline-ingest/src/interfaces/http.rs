//! Request context interface.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use serde_json::Value;

use super::{decode_into, hash, lenient_string_map, null_as_default, Interface};

/// The HTTP request being served when the error happened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Http {
    #[serde(deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub method: String,
    #[serde(deserialize_with = "null_as_default")]
    pub query_string: String,
    #[serde(deserialize_with = "lenient_string_map")]
    pub headers: BTreeMap<String, String>,
    #[serde(deserialize_with = "lenient_string_map")]
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub cookies: Value,
}

impl Interface for Http {
    fn hash(&self) -> String {
        hash(&format!("{}{}{}", self.url, self.method, self.query_string))
    }

    fn template(&self) -> &'static str {
        "sentry/partial/interfaces/http.html"
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

    fn raw(json: &str) -> Box<RawValue> {
        RawValue::from_string(json.to_owned()).unwrap()
    }

    #[test]
    fn hash_covers_url_method_and_query() {
        let http = Http {
            url: "http://example.com/a".to_owned(),
            method: "GET".to_owned(),
            query_string: "q=1".to_owned(),
            ..Http::default()
        };
        assert_eq!(http.hash(), hash("http://example.com/aGETq=1"));

        let with_headers = Http {
            headers: BTreeMap::from([("Accept".to_owned(), "*/*".to_owned())]),
            ..http.clone()
        };
        assert_eq!(http.hash(), with_headers.hash());
    }

    #[test]
    fn decode_reads_fields() {
        let mut http = Http::default();
        http.decode(&raw(
            r#"{"url":"/x","method":"POST","headers":{"Host":"a"},"data":{"k":1}}"#,
        ))
        .unwrap();

        assert_eq!(http.url, "/x");
        assert_eq!(http.method, "POST");
        assert_eq!(http.headers["Host"], "a");
        assert_eq!(http.data["k"], 1);
    }

    #[test]
    fn headers_accept_pair_lists() {
        let mut as_pairs = Http::default();
        as_pairs
            .decode(&raw(
                r#"{"url":"/x","method":"GET","headers":[["Host","a"],["Content-Length",12],["bad"]],"env":[["REMOTE_ADDR","10.0.0.1"]]}"#,
            ))
            .unwrap();

        assert_eq!(as_pairs.headers.len(), 2);
        assert_eq!(as_pairs.headers["Host"], "a");
        assert_eq!(as_pairs.headers["Content-Length"], "12");
        assert_eq!(as_pairs.env["REMOTE_ADDR"], "10.0.0.1");

        let mut as_map = Http::default();
        as_map
            .decode(&raw(r#"{"url":"/x","method":"GET","headers":{"Host":"a","Via":null}}"#))
            .unwrap();
        assert_eq!(as_map.headers.len(), 1);
        assert_eq!(as_pairs.hash(), as_map.hash());
        assert_ne!(as_pairs.hash(), Http::default().hash());
    }

    #[test]
    fn null_headers_read_as_empty() {
        let mut http = Http::default();
        http.decode(&raw(r#"{"url":"/x","headers":null,"env":null}"#)).unwrap();
        assert!(http.headers.is_empty());
        assert!(http.env.is_empty());
    }

    #[test]
    fn failed_decode_keeps_defaults() {
        let mut http = Http::default();
        assert!(http.decode(&raw(r#"{"url": 5}"#)).is_err());
        assert_eq!(http, Http::default());
    }
}
