//! Version-keyed registry of protocol parsers.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};

use super::{IngestRequest, ParserFactory, ProtocolParser, V2Parser, V2_VERSION};
use crate::error::{ProtocolError, ProtocolResult};
use crate::event::RawEvent;
use crate::interfaces::InterfaceRegistry;

/// Registry of protocol parsers keyed by version string.
///
/// Registration is write-once: a second registration for the same version
/// fails and the first one stays active.
#[derive(Default)]
pub struct ProtocolRegistry {
    parsers: DashMap<String, ParserFactory>,
}

impl ProtocolRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the `2.0` parser, backed by `interfaces`.
    #[must_use]
    pub fn with_defaults(interfaces: Arc<InterfaceRegistry>) -> Self {
        let registry = Self::new();
        let factory: ParserFactory = Arc::new(move || -> Box<dyn ProtocolParser> {
            Box::new(V2Parser::new(Arc::clone(&interfaces)))
        });
        registry.parsers.insert(V2_VERSION.to_owned(), factory);
        registry
    }

    /// Register a parser factory for `version`.
    pub fn register<F>(&self, version: &str, factory: F) -> ProtocolResult<()>
    where
        F: Fn() -> Box<dyn ProtocolParser> + Send + Sync + 'static,
    {
        match self.parsers.entry(version.to_owned()) {
            Entry::Occupied(_) => {
                debug!(version = %version, "Protocol version already registered");
                Err(ProtocolError::AlreadyRegistered(version.to_owned()))
            }
            Entry::Vacant(entry) => {
                info!(version = %version, "Protocol version registered");
                entry.insert(Arc::new(factory));
                Ok(())
            }
        }
    }

    /// Build the parser for `version`.
    pub fn get_parser(&self, version: &str) -> ProtocolResult<Box<dyn ProtocolParser>> {
        let factory = self
            .parsers
            .get(version)
            .map(|r| Arc::clone(r.value()))
            .ok_or_else(|| ProtocolError::NotFound(version.to_owned()))?;
        Ok(factory())
    }

    /// Parse a transport-decoded body with the parser for `version`.
    pub fn parse(&self, body: &[u8], version: &str) -> ProtocolResult<Vec<RawEvent>> {
        self.get_parser(version)?.parse(body)
    }

    /// Decode and parse an ingress request with the parser for `version`.
    pub fn parse_request(
        &self,
        request: &IngestRequest,
        version: &str,
    ) -> ProtocolResult<Vec<RawEvent>> {
        self.get_parser(version)?.parse_request(request)
    }

    /// Registered versions, sorted.
    #[must_use]
    pub fn versions(&self) -> Vec<String> {
        let mut versions: Vec<String> = self.parsers.iter().map(|r| r.key().clone()).collect();
        versions.sort();
        versions
    }
}

impl std::fmt::Debug for ProtocolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolRegistry")
            .field("versions", &self.versions())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct FixedParser(&'static str);

    impl ProtocolParser for FixedParser {
        fn version(&self) -> &str {
            self.0
        }

        fn parse(&self, _body: &[u8]) -> ProtocolResult<Vec<RawEvent>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn register_and_get_parser() {
        let registry = ProtocolRegistry::new();
        registry
            .register("9.9", || Box::new(FixedParser("9.9")))
            .unwrap();

        let parser = registry.get_parser("9.9").unwrap();
        assert_eq!(parser.version(), "9.9");
    }

    #[test]
    fn unknown_version_is_not_found() {
        let registry = ProtocolRegistry::new();
        let result = registry.get_parser("1.0");
        assert!(matches!(result, Err(ProtocolError::NotFound(v)) if v == "1.0"));
    }

    #[test]
    fn duplicate_registration_keeps_first() {
        let registry = ProtocolRegistry::new();
        registry
            .register("3.0", || Box::new(FixedParser("first")))
            .unwrap();

        let result = registry.register("3.0", || Box::new(FixedParser("second")));
        assert!(matches!(result, Err(ProtocolError::AlreadyRegistered(_))));
        assert_eq!(registry.get_parser("3.0").unwrap().version(), "first");
    }

    #[test]
    fn defaults_include_v2() {
        let registry = ProtocolRegistry::with_defaults(Arc::new(InterfaceRegistry::with_defaults()));
        assert_eq!(registry.versions(), vec![V2_VERSION.to_owned()]);

        let result = registry.register(V2_VERSION, || Box::new(FixedParser("other")));
        assert!(matches!(result, Err(ProtocolError::AlreadyRegistered(_))));
    }
}
