//! Node kind registry.
//!
//! A [`NodeRegistry`] maps kind names to their computation callbacks and
//! arity bounds. The registry is assembled once at startup (usually via
//! [`NodeRegistry::with_builtins`]) and shared read-only behind an `Arc`
//! for the lifetime of the process.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Map;

use crate::error::{PipelineError, Result};
use crate::value::Value;

/// Computation callback for a node kind.
///
/// Receives the assembled input value (`Value::None` for sources, the single
/// predecessor output, or a `Value::Sequence` for fan-in) and the node's
/// raw parameter map.
pub type NodeFn =
    Arc<dyn Fn(&Value, &Map<String, serde_json::Value>) -> Result<Value> + Send + Sync>;

/// A registered computation type with arity bounds.
///
/// `max_inputs: None` means unbounded fan-in; `min_inputs: 0` permits
/// source nodes.
#[derive(Clone)]
pub struct NodeKind {
    name: String,
    min_inputs: usize,
    max_inputs: Option<usize>,
    run: NodeFn,
}

impl NodeKind {
    /// Create a kind from its name, arity bounds and callback.
    pub fn new(
        name: impl Into<String>,
        min_inputs: usize,
        max_inputs: Option<usize>,
        run: NodeFn,
    ) -> Self {
        Self {
            name: name.into(),
            min_inputs,
            max_inputs,
            run,
        }
    }

    /// Kind name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Minimum in-degree.
    pub fn min_inputs(&self) -> usize {
        self.min_inputs
    }

    /// Maximum in-degree, `None` for unbounded.
    pub fn max_inputs(&self) -> Option<usize> {
        self.max_inputs
    }

    /// Whether an in-degree satisfies the arity bounds.
    pub fn accepts(&self, in_degree: usize) -> bool {
        in_degree >= self.min_inputs && self.max_inputs.map_or(true, |max| in_degree <= max)
    }

    /// Human-readable arity bounds for error messages.
    pub fn arity_label(&self) -> String {
        match self.max_inputs {
            Some(max) if max == self.min_inputs => format!("exactly {}", max),
            Some(max) => format!("between {} and {}", self.min_inputs, max),
            None => format!("at least {}", self.min_inputs),
        }
    }

    /// Invoke the computation callback.
    pub fn run(&self, input: &Value, params: &Map<String, serde_json::Value>) -> Result<Value> {
        (self.run)(input, params)
    }
}

impl fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeKind")
            .field("name", &self.name)
            .field("min_inputs", &self.min_inputs)
            .field("max_inputs", &self.max_inputs)
            .finish()
    }
}

/// Catalogue of node kinds, keyed by name.
#[derive(Debug, Default)]
pub struct NodeRegistry {
    kinds: HashMap<String, NodeKind>,
}

impl NodeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the built-in kinds.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::kinds::register_builtins(&mut registry);
        registry
    }

    /// Register a kind, replacing any previous kind of the same name.
    pub fn register(&mut self, kind: NodeKind) {
        self.kinds.insert(kind.name().to_string(), kind);
    }

    /// Look up a kind by name.
    pub fn get(&self, name: &str) -> Option<&NodeKind> {
        self.kinds.get(name)
    }

    /// Look up a kind, failing with [`PipelineError::UnknownKind`].
    pub fn resolve(&self, node_id: &str, name: &str) -> Result<&NodeKind> {
        self.kinds.get(name).ok_or_else(|| PipelineError::UnknownKind {
            node: node_id.to_string(),
            kind: name.to_string(),
        })
    }

    /// Whether a kind name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    /// Number of registered kinds.
    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    /// True when nothing has been registered.
    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_kind(name: &str, min: usize, max: Option<usize>) -> NodeKind {
        NodeKind::new(name, min, max, Arc::new(|input, _| Ok(input.clone())))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = NodeRegistry::new();
        registry.register(noop_kind("echo", 1, Some(1)));
        assert!(registry.contains("echo"));
        assert_eq!(registry.get("echo").unwrap().min_inputs(), 1);
        assert!(registry.get("missing").is_none());
    }

    #[test]
    fn test_accepts_bounds() {
        let bounded = noop_kind("pair", 2, Some(3));
        assert!(!bounded.accepts(1));
        assert!(bounded.accepts(2));
        assert!(bounded.accepts(3));
        assert!(!bounded.accepts(4));

        let unbounded = noop_kind("many", 1, None);
        assert!(unbounded.accepts(100));
        assert!(!unbounded.accepts(0));
    }

    #[test]
    fn test_arity_label() {
        assert_eq!(noop_kind("one", 1, Some(1)).arity_label(), "exactly 1");
        assert_eq!(noop_kind("pair", 2, Some(3)).arity_label(), "between 2 and 3");
        assert_eq!(noop_kind("many", 2, None).arity_label(), "at least 2");
    }

    #[test]
    fn test_resolve_unknown_kind() {
        let registry = NodeRegistry::new();
        let err = registry.resolve("n1", "ghost").unwrap_err();
        assert!(matches!(err, PipelineError::UnknownKind { .. }));
    }

    #[test]
    fn test_builtins_present() {
        let registry = NodeRegistry::with_builtins();
        for kind in [
            "identity",
            "dataset",
            "concat",
            "segmentation",
            "filter",
            "structural-descriptor",
            "simulation",
            "figure",
            "text",
        ] {
            assert!(registry.contains(kind), "missing builtin kind {kind}");
        }
    }
}
