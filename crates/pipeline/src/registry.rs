//! Node registry for creating node instances from configuration records.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::NodeConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::node::Node;

/// A factory for creating instances of a specific node kind.
pub trait NodeFactory: Send + Sync {
    /// The kind identifier this factory is registered under.
    fn kind(&self) -> &'static str;

    /// Validates kind-specific parameters and creates a node.
    fn create(&self, config: &NodeConfig) -> PipelineResult<Box<dyn Node>>;

    /// Describes the kind-specific parameters.
    fn parameter_schema(&self) -> serde_json::Value {
        serde_json::json!({})
    }
}

/// A registry for node factories, keyed by kind.
#[derive(Default)]
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    /// Creates a new, empty node registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under its own kind, replacing any previous one.
    pub fn register<F>(&mut self, factory: F)
    where
        F: NodeFactory + 'static,
    {
        self.factories
            .insert(factory.kind().to_string(), Arc::new(factory));
    }

    /// Creates a node instance from a validated record.
    pub fn create_node(&self, config: &NodeConfig) -> PipelineResult<Box<dyn Node>> {
        self.factories
            .get(&config.kind)
            .ok_or_else(|| PipelineError::UnknownNodeKind {
                kind: config.kind.clone(),
            })?
            .create(config)
    }

    /// All registered kinds, sorted.
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn parameter_schema(&self, kind: &str) -> Option<serde_json::Value> {
        self.factories.get(kind).map(|f| f.parameter_schema())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::register_builtin_nodes;
    use serde_json::json;

    #[test]
    fn test_builtin_kinds() {
        let mut registry = NodeRegistry::new();
        assert!(registry.kinds().is_empty());

        register_builtin_nodes(&mut registry);
        assert_eq!(registry.kinds(), ["csv_file", "detrend", "filter", "log_sink"]);
        assert!(registry.parameter_schema("csv_file").unwrap()["properties"]["file_path"].is_object());
        assert!(registry.parameter_schema("missing").is_none());
    }

    #[test]
    fn test_unknown_kind() {
        let registry = NodeRegistry::new();
        let config = NodeConfig::new("nope", "n1", json!({})).unwrap();
        let err = registry.create_node(&config).err().expect("unknown kind must fail");
        assert!(matches!(err, PipelineError::UnknownNodeKind { ref kind } if kind == "nope"));
    }
}
