//! Canonical graph structures, validation and topological ordering.
//!
//! A [`CanonicalGraph`] is the normalised `{nodes, edges}` form every
//! execution starts from. [`GraphIndex`] validates it against a registry and
//! precomputes the adjacency used by both ordering strategies. Parallel
//! duplicate edges are tolerated but collapse to a single input slot per
//! distinct source.

use std::collections::HashMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::registry::NodeRegistry;

/// A node occurrence inside one canonical graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeInstance {
    /// Unique non-empty id within the graph
    pub id: String,
    /// Registered kind name
    pub kind: String,
    /// Free-form parameter mapping
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

/// A directed edge between two node ids.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeRef {
    pub source: String,
    pub target: String,
}

/// The normalised `{nodes, edges}` graph form.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalGraph {
    pub nodes: Vec<NodeInstance>,
    pub edges: Vec<EdgeRef>,
}

/// Algorithm used to derive a topological order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Breadth-first removal of in-degree-zero nodes, ties by insertion order
    #[default]
    Kahn,
    /// Reverse post-order of a depth-first traversal rooted at sources
    Dfs,
}

impl Strategy {
    /// Short wire name (`kahn` / `dfs`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Kahn => "kahn",
            Strategy::Dfs => "dfs",
        }
    }

    /// Human-readable label recorded in execution summaries.
    pub fn label(&self) -> &'static str {
        match self {
            Strategy::Kahn => "breadth-first topological (Kahn)",
            Strategy::Dfs => "depth-first topological (DFS postorder)",
        }
    }
}

impl FromStr for Strategy {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "kahn" => Ok(Strategy::Kahn),
            "dfs" => Ok(Strategy::Dfs),
            other => Err(PipelineError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Validated adjacency view over a [`CanonicalGraph`].
///
/// Construction performs the full validation sequence: duplicate ids,
/// unknown kinds, dangling edges, acyclicity (reporting one example cycle),
/// per-node arity, empty graph, missing sinks.
#[derive(Debug)]
pub struct GraphIndex {
    ids: Vec<String>,
    /// Unique predecessors per node, in edge insertion order
    predecessors: Vec<Vec<usize>>,
    /// Unique successors per node, in edge insertion order
    successors: Vec<Vec<usize>>,
}

impl GraphIndex {
    /// Validate the graph against the registry and build the adjacency.
    pub fn new(graph: &CanonicalGraph, registry: &NodeRegistry) -> Result<Self> {
        let mut positions: HashMap<&str, usize> = HashMap::with_capacity(graph.nodes.len());
        for (i, node) in graph.nodes.iter().enumerate() {
            if positions.insert(node.id.as_str(), i).is_some() {
                return Err(PipelineError::DuplicateNode(node.id.clone()));
            }
        }

        for node in &graph.nodes {
            if !registry.contains(&node.kind) {
                return Err(PipelineError::UnknownKind {
                    node: node.id.clone(),
                    kind: node.kind.clone(),
                });
            }
        }

        let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); graph.nodes.len()];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); graph.nodes.len()];
        for edge in &graph.edges {
            let (source, target) = match (
                positions.get(edge.source.as_str()),
                positions.get(edge.target.as_str()),
            ) {
                (Some(&s), Some(&t)) => (s, t),
                _ => {
                    return Err(PipelineError::DanglingEdge {
                        source_node: edge.source.clone(),
                        target: edge.target.clone(),
                    })
                }
            };
            if !predecessors[target].contains(&source) {
                predecessors[target].push(source);
            }
            if !successors[source].contains(&target) {
                successors[source].push(target);
            }
        }

        let index = Self {
            ids: graph.nodes.iter().map(|n| n.id.clone()).collect(),
            predecessors,
            successors,
        };

        if let Some(cycle) = index.find_cycle() {
            return Err(PipelineError::Cycle { cycle });
        }

        for (i, node) in graph.nodes.iter().enumerate() {
            let kind = registry.resolve(&node.id, &node.kind)?;
            let in_degree = index.predecessors[i].len();
            if !kind.accepts(in_degree) {
                return Err(PipelineError::Arity {
                    node: node.id.clone(),
                    kind: node.kind.clone(),
                    expected: kind.arity_label(),
                    actual: in_degree,
                });
            }
        }

        if index.ids.is_empty() {
            return Err(PipelineError::EmptyGraph);
        }
        if index.sink_indices().is_empty() {
            return Err(PipelineError::NoSinks);
        }

        Ok(index)
    }

    /// Node count.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True for a graph without nodes.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Node id at a given position.
    pub fn id(&self, index: usize) -> &str {
        &self.ids[index]
    }

    /// Unique predecessor positions of a node, in edge insertion order.
    pub fn predecessors(&self, index: usize) -> &[usize] {
        &self.predecessors[index]
    }

    /// Ids of nodes with no predecessors, in insertion order.
    pub fn source_ids(&self) -> Vec<String> {
        self.source_indices().iter().map(|&i| self.ids[i].clone()).collect()
    }

    /// Ids of nodes with no successors, in insertion order.
    pub fn sink_ids(&self) -> Vec<String> {
        self.sink_indices().iter().map(|&i| self.ids[i].clone()).collect()
    }

    fn source_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.predecessors[i].is_empty()).collect()
    }

    fn sink_indices(&self) -> Vec<usize> {
        (0..self.len()).filter(|&i| self.successors[i].is_empty()).collect()
    }

    /// Topological order of node positions under the given strategy.
    ///
    /// Assumes the index was built successfully, i.e. the graph is acyclic.
    pub fn order(&self, strategy: Strategy) -> Vec<usize> {
        match strategy {
            Strategy::Kahn => self.kahn_order(),
            Strategy::Dfs => self.dfs_order(),
        }
    }

    fn kahn_order(&self) -> Vec<usize> {
        let mut remaining: Vec<usize> = self.predecessors.iter().map(Vec::len).collect();
        let mut placed = vec![false; self.len()];
        let mut order = Vec::with_capacity(self.len());
        while order.len() < self.len() {
            let next = (0..self.len()).find(|&i| !placed[i] && remaining[i] == 0);
            let Some(next) = next else { break };
            placed[next] = true;
            order.push(next);
            for &succ in &self.successors[next] {
                remaining[succ] -= 1;
            }
        }
        order
    }

    fn dfs_order(&self) -> Vec<usize> {
        let mut visited = vec![false; self.len()];
        let mut postorder = Vec::with_capacity(self.len());
        for root in self.source_indices() {
            self.dfs_visit(root, &mut visited, &mut postorder);
        }
        for node in 0..self.len() {
            self.dfs_visit(node, &mut visited, &mut postorder);
        }
        postorder.reverse();
        postorder
    }

    fn dfs_visit(&self, node: usize, visited: &mut [bool], postorder: &mut Vec<usize>) {
        if visited[node] {
            return;
        }
        visited[node] = true;
        for &succ in &self.successors[node] {
            self.dfs_visit(succ, visited, postorder);
        }
        postorder.push(node);
    }

    /// One example cycle as traversed edges, if the graph is cyclic.
    fn find_cycle(&self) -> Option<Vec<(String, String)>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }
        let mut marks = vec![Mark::White; self.len()];
        let mut path: Vec<usize> = Vec::new();

        fn visit(
            index: &GraphIndex,
            node: usize,
            marks: &mut [Mark],
            path: &mut Vec<usize>,
        ) -> Option<Vec<(String, String)>> {
            marks[node] = Mark::Grey;
            path.push(node);
            for &succ in &index.successors[node] {
                match marks[succ] {
                    Mark::Grey => {
                        let start = path.iter().position(|&n| n == succ).unwrap_or(0);
                        let mut cycle = Vec::new();
                        for pair in path[start..].windows(2) {
                            cycle.push((index.ids[pair[0]].clone(), index.ids[pair[1]].clone()));
                        }
                        cycle.push((index.ids[node].clone(), index.ids[succ].clone()));
                        return Some(cycle);
                    }
                    Mark::White => {
                        if let Some(cycle) = visit(index, succ, marks, path) {
                            return Some(cycle);
                        }
                    }
                    Mark::Black => {}
                }
            }
            path.pop();
            marks[node] = Mark::Black;
            None
        }

        for node in 0..self.len() {
            if marks[node] == Mark::White {
                if let Some(cycle) = visit(self, node, &mut marks, &mut path) {
                    return Some(cycle);
                }
            }
        }
        None
    }
}
