//! Explicit source registry, constructed and passed to the entry point

use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::framework::HttpClient;
use crate::sources::{BoeSource, PlacspSource, Source};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Default)]
pub struct SourceRegistry {
    sources: BTreeMap<String, Arc<dyn Source>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in source
    pub fn with_defaults(config: &IngestConfig, http: Arc<HttpClient>) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(Arc::new(PlacspSource::new(config, Arc::clone(&http))?))?;
        registry.register(Arc::new(BoeSource::new(config, http)))?;
        Ok(registry)
    }

    pub fn register(&mut self, source: Arc<dyn Source>) -> Result<()> {
        let name = source.name().to_string();
        if self.sources.contains_key(&name) {
            return Err(IngestError::DuplicateSource(name));
        }
        self.sources.insert(name, source);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Source>> {
        self.sources
            .get(name)
            .cloned()
            .ok_or_else(|| IngestError::UnknownSource(name.to_string()))
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.sources.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Resolve `names`, or every source when empty; any unknown name fails
    pub fn select(&self, names: &[String]) -> Result<Vec<Arc<dyn Source>>> {
        if names.is_empty() {
            return Ok(self.sources.values().cloned().collect());
        }
        names.iter().map(|name| self.get(name.trim())).collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn defaults() -> SourceRegistry {
        let config = IngestConfig::default();
        let http = Arc::new(HttpClient::new(config.http.clone()).unwrap());
        SourceRegistry::with_defaults(&config, http).unwrap()
    }

    #[test]
    fn test_defaults_are_sorted() {
        let registry = defaults();
        assert_eq!(registry.names(), vec!["boe", "placsp"]);
        assert_eq!(registry.get("placsp").unwrap().platform(), "PLACSP");
    }

    #[test]
    fn test_duplicate_and_unknown() {
        let mut registry = defaults();
        let config = IngestConfig::default();
        let http = Arc::new(HttpClient::new(config.http.clone()).unwrap());

        let err = registry
            .register(Arc::new(BoeSource::new(&config, http)))
            .unwrap_err();
        assert!(matches!(err, IngestError::DuplicateSource(name) if name == "boe"));

        let err = registry.get("ted").err().unwrap();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_select() {
        let registry = defaults();
        assert_eq!(registry.select(&[]).unwrap().len(), 2);
        assert_eq!(registry.select(&["boe".to_string()]).unwrap().len(), 1);
        assert!(registry.select(&["boe".to_string(), "nope".to_string()]).is_err());
    }

    #[test]
    fn test_isolated_registries() {
        let mut empty = SourceRegistry::new();
        assert!(empty.is_empty());
        let config = IngestConfig::default();
        let http = Arc::new(HttpClient::new(config.http.clone()).unwrap());
        empty.register(Arc::new(BoeSource::new(&config, http))).unwrap();

        assert_eq!(empty.len(), 1);
        assert_eq!(defaults().len(), 2);
    }
}
