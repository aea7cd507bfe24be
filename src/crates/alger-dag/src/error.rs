//! Error types for graph normalisation, validation and execution.
//!
//! All failures surface as [`PipelineError`], which implements
//! `std::error::Error` via the `thiserror` crate. Validation variants carry
//! enough structure for callers to report the offending node or edge.

use thiserror::Error;

/// Errors raised while normalising, validating or executing a pipeline graph.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The editor payload could not be converted to a canonical graph
    #[error("invalid graph payload: {0}")]
    Normalization(String),

    /// A structural rule was violated
    #[error("graph validation failed: {0}")]
    Validation(String),

    /// The same node id appears more than once
    #[error("duplicate node id '{0}'")]
    DuplicateNode(String),

    /// A node names a kind absent from the registry
    #[error("node '{node}' references unknown kind '{kind}'")]
    UnknownKind { node: String, kind: String },

    /// An edge endpoint does not name a node in the graph
    #[error("edge '{source_node}' -> '{target}' references a missing node")]
    DanglingEdge { source_node: String, target: String },

    /// The graph is not acyclic; carries one offending cycle
    #[error("graph contains a cycle: {}", format_cycle(.cycle))]
    Cycle { cycle: Vec<(String, String)> },

    /// A node's in-degree falls outside its kind's arity bounds
    #[error("node '{node}' ({kind}) violates arity bounds: expected {expected} input(s), got {actual}")]
    Arity {
        node: String,
        kind: String,
        expected: String,
        actual: usize,
    },

    /// The canonical graph has no nodes
    #[error("graph has no nodes")]
    EmptyGraph,

    /// The canonical graph has no sink nodes
    #[error("graph has no sink nodes")]
    NoSinks,

    /// The requested ordering strategy is not recognised
    #[error("unknown execution strategy '{0}'")]
    UnknownStrategy(String),

    /// A node callback reported a failure
    #[error("{0}")]
    NodeFailure(String),

    /// A node callback failed during execution
    #[error("node '{node}' ({kind}) failed: {message}")]
    NodeExecution {
        node: String,
        kind: String,
        message: String,
    },
}

fn format_cycle(cycle: &[(String, String)]) -> String {
    if cycle.is_empty() {
        return "<empty>".to_string();
    }
    let mut path = cycle[0].0.clone();
    for (_, target) in cycle {
        path.push_str(" -> ");
        path.push_str(target);
    }
    path
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_display_lists_path() {
        let err = PipelineError::Cycle {
            cycle: vec![
                ("a".to_string(), "b".to_string()),
                ("b".to_string(), "a".to_string()),
            ],
        };
        assert_eq!(err.to_string(), "graph contains a cycle: a -> b -> a");
    }

    #[test]
    fn test_arity_display_mentions_arity() {
        let err = PipelineError::Arity {
            node: "cat".to_string(),
            kind: "concat".to_string(),
            expected: "at least 2".to_string(),
            actual: 1,
        };
        assert!(err.to_string().contains("arity"));
        assert!(err.to_string().contains("cat"));
    }
}
