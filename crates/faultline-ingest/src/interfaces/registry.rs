//! Priority-ordered registry of interface parsers.

use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::{Exception, Http, Interface, ParsedInterface, RawPayload, Stacktrace};

/// Produces a fresh, default-valued interface.
pub type InterfaceFactory = Arc<dyn Fn() -> Box<dyn Interface> + Send + Sync>;

/// How to recognise and build one kind of interface.
#[derive(Clone)]
pub struct InterfaceDescriptor {
    id: String,
    aliases: Vec<String>,
    score: i32,
    factory: InterfaceFactory,
}

impl InterfaceDescriptor {
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    #[must_use]
    pub const fn score(&self) -> i32 {
        self.score
    }

    /// The payload key this descriptor claims, checking the id before aliases.
    fn matching_key(&self, payload: &RawPayload) -> Option<String> {
        std::iter::once(&self.id)
            .chain(self.aliases.iter())
            .find(|key| payload.contains_key(key.as_str()))
            .cloned()
    }
}

impl fmt::Debug for InterfaceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceDescriptor")
            .field("id", &self.id)
            .field("aliases", &self.aliases)
            .field("score", &self.score)
            .finish_non_exhaustive()
    }
}

/// Registry of interface descriptors, kept sorted by descending score.
///
/// Built once at startup and shared read-only afterwards. Descriptors with
/// equal scores stay in registration order.
#[derive(Debug, Default, Clone)]
pub struct InterfaceRegistry {
    descriptors: Vec<InterfaceDescriptor>,
}

impl InterfaceRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in exception, stacktrace and
    /// HTTP interfaces.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            || Box::new(Exception::default()),
            "sentry.interfaces.Exception",
            &["exception"],
            2000,
        );
        registry.register(
            || Box::new(Stacktrace::default()),
            "sentry.interfaces.Stacktrace",
            &["stacktrace"],
            1950,
        );
        registry.register(
            || Box::new(Http::default()),
            "sentry.interfaces.Http",
            &["request"],
            1000,
        );
        registry
    }

    /// Add a descriptor and restore priority order.
    pub fn register<F>(&mut self, factory: F, id: impl Into<String>, aliases: &[&str], score: i32)
    where
        F: Fn() -> Box<dyn Interface> + Send + Sync + 'static,
    {
        let descriptor = InterfaceDescriptor {
            id: id.into(),
            aliases: aliases.iter().map(|a| (*a).to_owned()).collect(),
            score,
            factory: Arc::new(factory),
        };
        debug!(interface = %descriptor.id, score, "Interface registered");
        self.descriptors.push(descriptor);
        // Stable: equal scores keep registration order
        self.descriptors.sort_by(|a, b| b.score.cmp(&a.score));
    }

    /// Descriptors in priority order.
    #[must_use]
    pub fn descriptors(&self) -> &[InterfaceDescriptor] {
        &self.descriptors
    }

    /// Claim every interface present in `payload`.
    ///
    /// Matched keys are removed from the payload. The result is ordered by
    /// descending score, so the first entry is the highest-priority
    /// interface. A fragment that fails to decode is still returned, with
    /// default contents.
    pub fn parse(&self, payload: &mut RawPayload) -> Vec<ParsedInterface> {
        let mut parsed = Vec::new();

        for descriptor in &self.descriptors {
            let Some(key) = descriptor.matching_key(payload) else {
                continue;
            };
            let Some(raw) = payload.remove(&key) else {
                continue;
            };

            let mut value = (descriptor.factory)();
            if let Err(e) = value.decode(&raw) {
                warn!(
                    interface = %descriptor.id,
                    key = %key,
                    error = %e,
                    "Malformed interface, keeping defaults"
                );
            }

            parsed.push(ParsedInterface::new(
                descriptor.id.clone(),
                descriptor.score,
                value,
            ));
        }

        parsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::value::RawValue;

    fn payload(entries: &[(&str, &str)]) -> RawPayload {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_owned(), RawValue::from_string((*v).to_owned()).unwrap()))
            .collect()
    }

    #[test]
    fn descriptors_sorted_by_descending_score() {
        let registry = InterfaceRegistry::with_defaults();
        let scores: Vec<i32> = registry.descriptors().iter().map(|d| d.score()).collect();
        assert_eq!(scores, vec![2000, 1950, 1000]);
    }

    #[test]
    fn equal_scores_keep_registration_order() {
        let mut registry = InterfaceRegistry::new();
        registry.register(|| Box::new(Http::default()), "first", &[], 10);
        registry.register(|| Box::new(Http::default()), "second", &[], 10);
        registry.register(|| Box::new(Http::default()), "top", &[], 20);

        let ids: Vec<&str> = registry.descriptors().iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec!["top", "first", "second"]);
    }

    #[test]
    fn alias_key_is_consumed_and_reported_under_id() {
        let registry = InterfaceRegistry::with_defaults();
        let mut payload = payload(&[
            ("request", r#"{"url":"/a","method":"GET"}"#),
            ("unrelated", "1"),
        ]);

        let parsed = registry.parse(&mut payload);

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id(), "sentry.interfaces.Http");
        assert_eq!(parsed[0].score(), 1000);
        assert!(!payload.contains_key("request"));
        assert!(payload.contains_key("unrelated"));
    }

    #[test]
    fn results_follow_priority_not_key_order() {
        let registry = InterfaceRegistry::with_defaults();
        let mut payload = payload(&[
            ("sentry.interfaces.Http", r#"{"url":"/a"}"#),
            ("stacktrace", r#"{"frames":[]}"#),
            ("exception", r#"{"type":"E"}"#),
        ]);

        let parsed = registry.parse(&mut payload);
        let ids: Vec<&str> = parsed.iter().map(ParsedInterface::id).collect();

        assert_eq!(
            ids,
            vec![
                "sentry.interfaces.Exception",
                "sentry.interfaces.Stacktrace",
                "sentry.interfaces.Http",
            ]
        );
        assert!(payload.is_empty());
    }

    #[test]
    fn id_preferred_over_alias_when_both_present() {
        let registry = InterfaceRegistry::with_defaults();
        let mut payload = payload(&[
            ("sentry.interfaces.Stacktrace", r#"{"frames":[]}"#),
            ("stacktrace", r#"{"frames":[]}"#),
        ]);

        let parsed = registry.parse(&mut payload);

        assert_eq!(parsed.len(), 1);
        assert!(payload.contains_key("stacktrace"));
        assert!(!payload.contains_key("sentry.interfaces.Stacktrace"));
    }

    #[test]
    fn malformed_fragment_kept_with_defaults() {
        let registry = InterfaceRegistry::with_defaults();
        let mut payload = payload(&[("request", r#""not an object""#)]);

        let parsed = registry.parse(&mut payload);

        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].hash(), Http::default().hash());
        assert!(payload.is_empty());
    }
}
