//! Pipeline model for database persistence.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use sqlx::FromRow;

/// A stored pipeline definition.
///
/// `full_graph` keeps the raw editor JSON verbatim so the frontend can
/// round-trip its own format.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    pub full_graph: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Pipeline {
    /// Decoded editor graph, `{}` when unset.
    pub fn graph_json(&self) -> Json {
        self.full_graph
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| json!({}))
    }

    /// Decoded metadata object, `{}` when unset.
    pub fn metadata_json(&self) -> Json {
        self.metadata
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| json!({}))
    }

    /// True when a usable graph payload is stored.
    pub fn has_graph(&self) -> bool {
        match self.graph_json() {
            Json::Null => false,
            Json::Object(map) => !map.is_empty(),
            _ => true,
        }
    }

    /// Hydrated listing payload, with the node list surfaced for editors
    /// that read `pipeline.nodes` directly.
    pub fn to_json(&self) -> Json {
        let full_graph = self.graph_json();
        let nodes = full_graph
            .get("pipeline")
            .and_then(|p| p.get("nodes"))
            .cloned()
            .unwrap_or_else(|| json!([]));
        json!({
            "id": self.id,
            "name": self.name,
            "full_graph": full_graph,
            "description": self.description,
            "metadata": self.metadata_json(),
            "nodes": nodes,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hydration_surfaces_nodes() {
        let pipeline = Pipeline {
            id: "demo".to_string(),
            name: "Demo".to_string(),
            full_graph: Some(r#"{"pipeline": {"nodes": [{"id": "a"}]}}"#.to_string()),
            description: None,
            metadata: None,
            created_at: "2024-01-01T00:00:00Z".to_string(),
            updated_at: "2024-01-01T00:00:00Z".to_string(),
        };
        let hydrated = pipeline.to_json();
        assert_eq!(hydrated["nodes"][0]["id"], "a");
        assert!(pipeline.has_graph());
    }

    #[test]
    fn test_missing_graph() {
        let pipeline = Pipeline {
            id: "empty".to_string(),
            name: "Empty".to_string(),
            full_graph: None,
            description: None,
            metadata: None,
            created_at: "2024-01-01T00:00:00Z".to_string(),
            updated_at: "2024-01-01T00:00:00Z".to_string(),
        };
        assert!(!pipeline.has_graph());
        assert_eq!(pipeline.to_json()["nodes"], json!([]));
    }
}
