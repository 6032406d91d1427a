//! Engine configuration

use serde::{Deserialize, Serialize};
use tmql_core::{Error, Result};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Base for relative item references; empty uses the store's own
    pub base_locator: String,

    /// Flatten sequence cells into two-dimensional rows
    pub auto_reduction: bool,

    /// Remove duplicate rows from every result set
    pub unify_results: bool,

    /// Compiled trees kept for reuse; 0 disables the cache
    pub cache_capacity: usize,

    /// Nesting limit of the recursive descent parser
    pub max_recursion_depth: usize,

    /// ISA, AKO and the type axes follow the supertype closure
    pub transitive_types: bool,

    /// Accept queries using modifying dialect extensions
    pub allow_modifications: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            base_locator: String::new(),
            auto_reduction: true,
            unify_results: false,
            cache_capacity: 256,
            max_recursion_depth: 128,
            transitive_types: true,
            allow_modifications: true,
        }
    }
}

impl EngineConfig {
    /// Create a configuration resolving relative references against `base`
    pub fn new(base_locator: impl Into<String>) -> Self {
        Self {
            base_locator: base_locator.into(),
            ..Default::default()
        }
    }

    /// Create configuration for development: no cache, deep nesting allowed
    pub fn for_development(base_locator: impl Into<String>) -> Self {
        Self {
            base_locator: base_locator.into(),
            cache_capacity: 0,
            max_recursion_depth: 512,
            ..Default::default()
        }
    }

    /// Read-only engine with deduplicated results
    pub fn strict(base_locator: impl Into<String>) -> Self {
        Self {
            base_locator: base_locator.into(),
            unify_results: true,
            allow_modifications: false,
            ..Default::default()
        }
    }

    /// Builder: set cache capacity
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }

    /// Builder: keep sequence cells intact
    pub fn n_dimensional(mut self) -> Self {
        self.auto_reduction = false;
        self
    }

    /// Builder: deduplicate rows
    pub fn unify(mut self) -> Self {
        self.unify_results = true;
        self
    }

    /// Builder: direct types only
    pub fn intransitive(mut self) -> Self {
        self.transitive_types = false;
        self
    }

    /// Builder: reject modifying queries
    pub fn read_only(mut self) -> Self {
        self.allow_modifications = false;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_recursion_depth == 0 {
            return Err(Error::Configuration(
                "max_recursion_depth must be at least 1".to_string(),
            ));
        }
        if !self.base_locator.is_empty() && !self.base_locator.contains(':') {
            return Err(Error::Configuration(format!(
                "base_locator '{}' is not an absolute IRI",
                self.base_locator
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.auto_reduction);
        assert!(config.transitive_types);
        assert!(config.allow_modifications);
        assert_eq!(config.max_recursion_depth, 128);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_and_builder() {
        let strict = EngineConfig::strict("http://example.org/");
        assert!(strict.unify_results);
        assert!(!strict.allow_modifications);

        let config = EngineConfig::new("http://example.org/")
            .cache_capacity(0)
            .n_dimensional()
            .intransitive();
        assert_eq!(config.cache_capacity, 0);
        assert!(!config.auto_reduction);
        assert!(!config.transitive_types);
        assert_eq!(EngineConfig::for_development("x:y").cache_capacity, 0);
    }

    #[test]
    fn test_validate() {
        let mut config = EngineConfig::new("not an iri");
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
        config.base_locator = "http://example.org/".to_string();
        config.max_recursion_depth = 0;
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_serde_round_trip() {
        let config = EngineConfig::strict("http://example.org/");
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
