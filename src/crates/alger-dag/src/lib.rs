//! Typed DAG pipeline engine.
//!
//! This crate turns free-form editor JSON into a canonical `{nodes, edges}`
//! graph, validates it against a registry of typed node kinds, derives a
//! topological order (Kahn or DFS reverse post-order), and executes the
//! nodes sequentially while reporting per-node events to an observer.
//!
//! # Building blocks
//!
//! - [`NodeRegistry`] / [`NodeKind`] — catalogue of computation types with
//!   arity bounds ([`kinds`] registers the built-ins)
//! - [`normalize_editor_graph`] — editor payload → [`CanonicalGraph`]
//! - [`execute`] / [`run_graph`] — validation, ordering and execution
//! - [`Value`] / [`Tensor`] — dynamic values flowing between nodes
//! - [`summarize_execution`] — JSON snapshot of a finished run
//!
//! # Example
//!
//! ```rust
//! use alger_dag::{run_graph, NodeRegistry, Strategy};
//! use serde_json::json;
//!
//! let registry = NodeRegistry::with_builtins();
//! let payload = json!({
//!     "nodes": [
//!         {"id": "ds", "kind": "dataset", "params": {"shape": [1, 8, 8]}},
//!         {"id": "desc", "kind": "structural-descriptor"},
//!     ],
//!     "edges": [{"source": "ds", "target": "desc"}],
//! });
//! let (report, summary) = run_graph(&payload, &registry, Strategy::Kahn, None).unwrap();
//! assert_eq!(report.sinks, vec!["desc"]);
//! assert!(summary["sinks"]["desc"].is_object());
//! ```

pub mod engine;
pub mod error;
pub mod graph;
pub mod kinds;
pub mod normalize;
pub mod registry;
pub mod summary;
pub mod value;

pub use engine::{execute, run_graph, ExecutionReport, NodeEvent};
pub use error::PipelineError;
pub use graph::{CanonicalGraph, EdgeRef, GraphIndex, NodeInstance, Strategy};
pub use normalize::normalize_editor_graph;
pub use registry::{NodeFn, NodeKind, NodeRegistry};
pub use summary::{decode_summary, describe_value, encode_summary, summarize_execution};
pub use value::{Dtype, Tensor, Value};
