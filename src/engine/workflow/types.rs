// SPDX-License-Identifier: MIT

//! Graph description types
//!
//! A `GraphDescription` is the immutable input to the builder: an ordered
//! list of steps and a list of action-labelled edges between them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::engine::workflow::retry::RetryConfig;
use crate::sdk::step::Action;

/// A declarative graph of typed steps
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
pub struct GraphDescription {
    /// Name of the graph
    #[serde(default)]
    pub name: String,
    /// Description of the graph
    #[serde(default)]
    pub description: String,
    /// Steps in declaration order; the first one is the entry step
    #[serde(default, alias = "nodes")]
    pub steps: Vec<StepSpec>,
    /// Routing edges
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl GraphDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_step(mut self, step: StepSpec) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_edge(mut self, edge: Edge) -> Self {
        self.edges.push(edge);
        self
    }

    pub fn step(&self, id: &str) -> Option<&StepSpec> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn step_mut(&mut self, id: &str) -> Option<&mut StepSpec> {
        self.steps.iter_mut().find(|s| s.id == id)
    }

    pub fn entry(&self) -> Option<&StepSpec> {
        self.steps.first()
    }
}

/// One step of the graph
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StepSpec {
    /// Unique identifier; also the namespace and checkpoint key
    pub id: String,
    /// Catalog type name
    #[serde(rename = "type")]
    pub step_type: String,
    /// Declared parameters, possibly containing `${...}` references
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Run the step once per element of a collection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchSpec>,
    /// Retry policy for the run phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    /// Deadline for one run attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Participates in a bounded loop declared by the planner
    #[serde(default)]
    pub allow_loop: bool,
}

impl StepSpec {
    pub fn new(id: impl Into<String>, step_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            step_type: step_type.into(),
            params: Map::new(),
            batch: None,
            retry: None,
            timeout_ms: None,
            allow_loop: false,
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }

    pub fn with_batch(mut self, batch: BatchSpec) -> Self {
        self.batch = Some(batch);
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn allow_loop(mut self) -> Self {
        self.allow_loop = true;
        self
    }
}

/// A routing edge: when `from` finishes with `action`, continue at `to`
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub action: Action,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            action: Action::default(),
        }
    }

    pub fn on(mut self, action: impl Into<Action>) -> Self {
        self.action = action.into();
        self
    }
}

/// Repeated sequential invocation of a step over a collection
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct BatchSpec {
    /// Reference that must resolve to an array, e.g. `${fetch.result.issues}`
    pub items: String,
    /// Name the current element is bound to
    #[serde(default = "default_alias", rename = "as")]
    pub alias: String,
    #[serde(default)]
    pub on_error: BatchErrorPolicy,
}

fn default_alias() -> String {
    "item".to_string()
}

impl BatchSpec {
    pub fn new(items: impl Into<String>) -> Self {
        Self {
            items: items.into(),
            alias: default_alias(),
            on_error: BatchErrorPolicy::default(),
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.on_error = BatchErrorPolicy::Continue;
        self
    }
}

/// What a batch does when one element fails
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BatchErrorPolicy {
    /// Halt the step at the first failing element
    #[default]
    FailFast,
    /// Record the error and keep going
    Continue,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builders() {
        let graph = GraphDescription::new("triage")
            .with_step(StepSpec::new("fetch", "http").with_param("url", json!("https://x")))
            .with_step(StepSpec::new("save", "file"))
            .with_edge(Edge::new("fetch", "save"));

        assert_eq!(graph.entry().unwrap().id, "fetch");
        assert_eq!(graph.step("fetch").unwrap().params["url"], json!("https://x"));
        assert!(graph.edges[0].action.is_default());
    }

    #[test]
    fn test_deserialize_defaults() {
        let spec: StepSpec = serde_json::from_value(json!({
            "id": "each",
            "type": "llm",
            "batch": {"items": "${fetch.items}"}
        }))
        .unwrap();
        let batch = spec.batch.unwrap();
        assert_eq!(batch.alias, "item");
        assert_eq!(batch.on_error, BatchErrorPolicy::FailFast);
        assert!(!spec.allow_loop);
        assert!(spec.params.is_empty());
    }

    #[test]
    fn test_edge_action() {
        let edge: Edge = serde_json::from_value(json!({"from": "a", "to": "b", "action": "retry"})).unwrap();
        assert_eq!(edge.action.as_str(), "retry");
        assert_eq!(Edge::new("a", "b").on("done").action.as_str(), "done");
    }
}
