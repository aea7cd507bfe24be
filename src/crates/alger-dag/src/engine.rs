//! Deterministic topological execution of canonical graphs.
//!
//! [`execute`] validates the graph, derives the requested order, then runs
//! every node in sequence, assembling each node's input from its unique
//! predecessors' outputs. An optional observer is invoked once per node with
//! timing and input/output references; a failing node fires the observer
//! with the error and aborts the run.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde_json::Value as Json;

use crate::error::{PipelineError, Result};
use crate::graph::{CanonicalGraph, GraphIndex, NodeInstance, Strategy};
use crate::normalize::normalize_editor_graph;
use crate::registry::NodeRegistry;
use crate::summary::summarize_execution;
use crate::value::Value;

/// Observer payload emitted after every node invocation.
#[derive(Debug)]
pub struct NodeEvent<'a> {
    /// Position of the node in the execution order
    pub index: usize,
    /// The node instance being executed
    pub node: &'a NodeInstance,
    /// Assembled input value
    pub input: &'a Value,
    /// Output value on success
    pub output: Option<&'a Value>,
    /// Wall-clock time spent in the callback
    pub duration: Duration,
    /// Unique predecessor ids, in edge insertion order
    pub predecessors: &'a [String],
    /// The failure, when the callback errored
    pub error: Option<&'a PipelineError>,
}

/// Result of a completed execution.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    /// The graph that was executed
    pub graph: CanonicalGraph,
    /// Node ids in execution order
    pub order: Vec<String>,
    /// Output value per executed node
    pub outputs: BTreeMap<String, Value>,
    /// Nodes with no predecessors, in insertion order
    pub sources: Vec<String>,
    /// Nodes with no successors, in insertion order
    pub sinks: Vec<String>,
    /// Ordering strategy that was applied
    pub strategy: Strategy,
}

impl ExecutionReport {
    /// Human-readable label of the applied strategy.
    pub fn strategy_label(&self) -> &'static str {
        self.strategy.label()
    }
}

/// Validate and execute a canonical graph.
pub fn execute(
    graph: &CanonicalGraph,
    registry: &NodeRegistry,
    strategy: Strategy,
    mut observer: Option<&mut dyn FnMut(&NodeEvent<'_>)>,
) -> Result<ExecutionReport> {
    let index = GraphIndex::new(graph, registry)?;
    let positions = index.order(strategy);
    let mut outputs: BTreeMap<String, Value> = BTreeMap::new();

    for (step, &position) in positions.iter().enumerate() {
        let node = &graph.nodes[position];
        let predecessors: Vec<String> = index
            .predecessors(position)
            .iter()
            .map(|&p| index.id(p).to_string())
            .collect();
        let input = assemble_input(&predecessors, &outputs);

        let kind = registry.resolve(&node.id, &node.kind)?;
        if !kind.accepts(predecessors.len()) {
            return Err(PipelineError::Arity {
                node: node.id.clone(),
                kind: node.kind.clone(),
                expected: kind.arity_label(),
                actual: predecessors.len(),
            });
        }

        let started = Instant::now();
        let result = kind.run(&input, &node.params);
        let duration = started.elapsed();

        match result {
            Ok(output) => {
                if let Some(ref mut obs) = observer {
                    obs(&NodeEvent {
                        index: step,
                        node,
                        input: &input,
                        output: Some(&output),
                        duration,
                        predecessors: &predecessors,
                        error: None,
                    });
                }
                tracing::debug!(
                    node = %node.id,
                    kind = %node.kind,
                    elapsed_us = duration.as_micros() as u64,
                    "node finished"
                );
                outputs.insert(node.id.clone(), output);
            }
            Err(err) => {
                let err = PipelineError::NodeExecution {
                    node: node.id.clone(),
                    kind: node.kind.clone(),
                    message: err.to_string(),
                };
                if let Some(ref mut obs) = observer {
                    obs(&NodeEvent {
                        index: step,
                        node,
                        input: &input,
                        output: None,
                        duration,
                        predecessors: &predecessors,
                        error: Some(&err),
                    });
                }
                tracing::warn!(node = %node.id, kind = %node.kind, error = %err, "node failed");
                return Err(err);
            }
        }
    }

    Ok(ExecutionReport {
        graph: graph.clone(),
        order: positions.iter().map(|&p| index.id(p).to_string()).collect(),
        outputs,
        sources: index.source_ids(),
        sinks: index.sink_ids(),
        strategy,
    })
}

fn assemble_input(predecessors: &[String], outputs: &BTreeMap<String, Value>) -> Value {
    match predecessors {
        [] => Value::None,
        [only] => outputs.get(only).cloned().unwrap_or(Value::None),
        many => Value::Sequence(
            many.iter()
                .map(|p| outputs.get(p).cloned().unwrap_or(Value::None))
                .collect(),
        ),
    }
}

/// Normalise an editor payload, execute it, and return the report together
/// with its JSON summary.
pub fn run_graph(
    payload: &Json,
    registry: &NodeRegistry,
    strategy: Strategy,
    observer: Option<&mut dyn FnMut(&NodeEvent<'_>)>,
) -> Result<(ExecutionReport, Json)> {
    let graph = normalize_editor_graph(payload)?;
    let report = execute(&graph, registry, strategy, observer)?;
    let summary = summarize_execution(&report);
    Ok((report, summary))
}
