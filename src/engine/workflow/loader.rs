//! Graph loader - YAML/JSON file loading and parsing
//!
//! The engine consumes in-memory `GraphDescription`s; this is a convenience
//! for the binary and for tests.

use super::types::GraphDescription;
use crate::sdk::error::EngineError;
use std::fs;
use std::path::Path;

/// Loads graph descriptions from YAML or JSON files
pub struct GraphLoader;

impl GraphLoader {
    pub fn new() -> Self {
        Self
    }

    /// Load a graph, picking the format from the file extension (YAML by default)
    pub fn load_graph<P: AsRef<Path>>(&self, path: P) -> Result<GraphDescription, EngineError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::parse_json(&content),
            _ => Self::parse_yaml(&content),
        }
    }

    /// Parse a graph description from a YAML string
    pub fn parse_yaml(content: &str) -> Result<GraphDescription, EngineError> {
        let graph: GraphDescription = serde_yaml::from_str(content)?;
        Ok(graph)
    }

    /// Parse a graph description from a JSON string
    pub fn parse_json(content: &str) -> Result<GraphDescription, EngineError> {
        let graph: GraphDescription = serde_json::from_str(content)?;
        Ok(graph)
    }
}

impl Default for GraphLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::workflow::types::BatchErrorPolicy;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_parse_linear_graph() {
        let yaml = r#"
name: triage
description: "Fetch, transform, save"
steps:
  - id: fetch
    type: http_get
    params:
      url: "https://api.example.com/issues"
    retry:
      max_retries: 2
    timeout_ms: 5000
  - id: transform
    type: summarize
    params:
      items: "${fetch.result.issues}"
  - id: save
    type: write_file
edges:
  - from: fetch
    to: transform
  - from: transform
    to: save
"#;
        let graph = GraphLoader::parse_yaml(yaml).unwrap();
        assert_eq!(graph.name, "triage");
        assert_eq!(graph.steps.len(), 3);
        assert_eq!(graph.entry().unwrap().id, "fetch");

        let fetch = graph.step("fetch").unwrap();
        assert_eq!(fetch.retry.as_ref().unwrap().max_retries, 2);
        assert_eq!(fetch.timeout_ms, Some(5000));

        let transform = graph.step("transform").unwrap();
        assert_eq!(transform.params["items"], json!("${fetch.result.issues}"));
        assert!(graph.edges.iter().all(|e| e.action.is_default()));
    }

    #[test]
    fn test_parse_nodes_alias_and_batch() {
        let yaml = r#"
name: fanout
nodes:
  - id: each
    type: llm
    batch:
      items: "${fetch.items}"
      as: issue
      on_error: continue
"#;
        let graph = GraphLoader::parse_yaml(yaml).unwrap();
        let batch = graph.steps[0].batch.as_ref().unwrap();
        assert_eq!(batch.alias, "issue");
        assert_eq!(batch.on_error, BatchErrorPolicy::Continue);
    }

    #[test]
    fn test_parse_routing_actions() {
        let yaml = r#"
name: review
steps:
  - id: check
    type: classifier
  - id: approve
    type: noop
  - id: reject
    type: noop
edges:
  - { from: check, to: approve, action: approved }
  - { from: check, to: reject, action: rejected }
"#;
        let graph = GraphLoader::parse_yaml(yaml).unwrap();
        assert_eq!(graph.edges[0].action.as_str(), "approved");
        assert_eq!(graph.edges[1].action.as_str(), "rejected");
    }

    #[test]
    fn test_load_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            "{}",
            json!({"name": "j", "steps": [{"id": "a", "type": "noop"}]})
        )
        .unwrap();

        let graph = GraphLoader::new().load_graph(file.path()).unwrap();
        assert_eq!(graph.name, "j");
        assert_eq!(graph.steps[0].step_type, "noop");
    }

    #[test]
    fn test_invalid_yaml() {
        let err = GraphLoader::parse_yaml("steps: [unterminated").unwrap_err();
        assert!(matches!(err, EngineError::Yaml(_)));
    }
}
