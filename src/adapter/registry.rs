use crate::adapter::{AdapterError, HtmlChapterAdapter, SourceAdapter};
use crate::config::Config;
use crate::fetch::PageFetcher;
use crate::storage::SharedStorage;
use std::collections::HashMap;
use std::sync::Arc;

/// Lookup table from source name to adapter
#[derive(Default, Clone)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one HTML adapter per configured `[[source]]`
    pub fn from_config(
        config: &Config,
        fetcher: PageFetcher,
        storage: SharedStorage,
    ) -> Result<Self, AdapterError> {
        let mut registry = Self::new();
        for source in &config.sources {
            let adapter = HtmlChapterAdapter::new(source, fetcher.clone(), Arc::clone(&storage))?;
            registry.register(Arc::new(adapter));
        }
        Ok(registry)
    }

    /// Registers an adapter under its own name, replacing any previous one
    pub fn register(&mut self, adapter: Arc<dyn SourceAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, source: &str) -> Option<Arc<dyn SourceAdapter>> {
        self.adapters.get(source).cloned()
    }

    /// Looks up an adapter, failing with `UnknownSource`
    pub fn resolve(&self, source: &str) -> Result<Arc<dyn SourceAdapter>, AdapterError> {
        self.get(source)
            .ok_or_else(|| AdapterError::UnknownSource(source.to_string()))
    }

    pub fn contains(&self, source: &str) -> bool {
        self.adapters.contains_key(source)
    }

    /// Registered source names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn is_empty(&self) -> bool {
        self.adapters.is_empty()
    }
}
