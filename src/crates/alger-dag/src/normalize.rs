//! Conversion of free-form editor JSON into the canonical graph form.
//!
//! The editor payload may wrap the graph in a top-level `pipeline` object or
//! ship it flat. Node kind and params live either on a `data` sub-object or
//! at the node's top level; ids and edge endpoints are stringified.

use std::collections::HashSet;

use serde_json::Value as Json;

use crate::error::{PipelineError, Result};
use crate::graph::{CanonicalGraph, EdgeRef, NodeInstance};

/// Normalise an editor payload into `{nodes, edges}`.
pub fn normalize_editor_graph(payload: &Json) -> Result<CanonicalGraph> {
    let root = match payload.get("pipeline") {
        Some(inner) if inner.is_object() => inner,
        _ => payload,
    };
    let root = root
        .as_object()
        .ok_or_else(|| PipelineError::Normalization("graph payload must be an object".to_string()))?;

    let mut nodes = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    if let Some(raw_nodes) = root.get("nodes") {
        let raw_nodes = raw_nodes.as_array().ok_or_else(|| {
            PipelineError::Normalization("'nodes' must be an array".to_string())
        })?;
        for raw in raw_nodes {
            let node = normalize_node(raw)?;
            if !seen.insert(node.id.clone()) {
                return Err(PipelineError::DuplicateNode(node.id));
            }
            nodes.push(node);
        }
    }

    let mut edges = Vec::new();
    if let Some(raw_edges) = root.get("edges") {
        let raw_edges = raw_edges.as_array().ok_or_else(|| {
            PipelineError::Normalization("'edges' must be an array".to_string())
        })?;
        for raw in raw_edges {
            edges.push(normalize_edge(raw)?);
        }
    }

    Ok(CanonicalGraph { nodes, edges })
}

fn normalize_node(raw: &Json) -> Result<NodeInstance> {
    let obj = raw
        .as_object()
        .ok_or_else(|| PipelineError::Normalization("node entries must be objects".to_string()))?;

    let id = stringify_id(obj.get("id"))
        .ok_or_else(|| PipelineError::Normalization("node id is missing or empty".to_string()))?;

    let data = obj.get("data").and_then(Json::as_object);
    let kind = data
        .and_then(|d| d.get("kind"))
        .or_else(|| data.and_then(|d| d.get("type")))
        .or_else(|| obj.get("kind"))
        .or_else(|| obj.get("type"))
        .and_then(Json::as_str)
        .ok_or_else(|| {
            PipelineError::Normalization(format!("node '{id}' does not declare a kind"))
        })?
        .to_string();

    let params_raw = data
        .and_then(|d| d.get("params"))
        .or_else(|| obj.get("params"));
    let params = match params_raw {
        None | Some(Json::Null) => serde_json::Map::new(),
        Some(Json::Object(map)) => map.clone(),
        Some(_) => {
            return Err(PipelineError::Normalization(format!(
                "node '{id}' params must be an object"
            )))
        }
    };

    Ok(NodeInstance { id, kind, params })
}

fn normalize_edge(raw: &Json) -> Result<EdgeRef> {
    let obj = raw
        .as_object()
        .ok_or_else(|| PipelineError::Normalization("edge entries must be objects".to_string()))?;
    let source = stringify_id(obj.get("source")).ok_or_else(|| {
        PipelineError::Normalization("edge is missing a 'source' endpoint".to_string())
    })?;
    let target = stringify_id(obj.get("target")).ok_or_else(|| {
        PipelineError::Normalization("edge is missing a 'target' endpoint".to_string())
    })?;
    Ok(EdgeRef { source, target })
}

/// Stringify an id-like value, rejecting empty and `"None"` placeholders.
fn stringify_id(raw: Option<&Json>) -> Option<String> {
    let id = match raw? {
        Json::String(s) => s.clone(),
        Json::Number(n) => n.to_string(),
        _ => return None,
    };
    if id.is_empty() || id == "None" {
        return None;
    }
    Some(id)
}
