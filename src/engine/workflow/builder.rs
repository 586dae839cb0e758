// SPDX-License-Identifier: MIT

//! Flow builder - turns a graph description into wired step instances
//!
//! Validation happens before anything is instantiated: unique ids, edge
//! endpoints, one successor per action, and no cycles except through steps
//! flagged for bounded loops. Each distinct step type is resolved through
//! the catalog once. No step runs during build.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::engine::workflow::catalog::{StepCatalog, StepMetadata, StepRegistry};
use crate::engine::workflow::checkpoint::content_hash;
use crate::engine::workflow::graph::{Flow, StepInstance};
use crate::engine::workflow::layers::{compose, InstrumentationConfig};
use crate::engine::workflow::types::{GraphDescription, StepSpec};
use crate::sdk::error::BuildError;
use crate::sdk::step::Action;

/// Builds flows from graph descriptions
#[derive(Clone)]
pub struct Builder {
    catalog: Arc<dyn StepCatalog>,
    registry: StepRegistry,
    instrumentation: InstrumentationConfig,
}

impl Builder {
    pub fn new(catalog: Arc<dyn StepCatalog>, registry: StepRegistry) -> Self {
        Self {
            catalog,
            registry,
            instrumentation: InstrumentationConfig::default(),
        }
    }

    pub fn with_instrumentation(mut self, config: InstrumentationConfig) -> Self {
        self.instrumentation = config;
        self
    }

    /// Build a flow; nothing is executed
    pub async fn build(&self, graph: &GraphDescription) -> Result<Flow, BuildError> {
        let successors = validate_structure(graph)?;
        detect_cycles(graph, &successors)?;

        let step_ids: Arc<BTreeSet<String>> =
            Arc::new(graph.steps.iter().map(|s| s.id.clone()).collect());

        let mut resolved: HashMap<String, StepMetadata> = HashMap::new();
        let mut instances = Vec::with_capacity(graph.steps.len());

        for spec in &graph.steps {
            if !resolved.contains_key(&spec.step_type) {
                let metadata = self.catalog.resolve(&spec.step_type).await.map_err(|e| {
                    BuildError::UnknownStepType {
                        step_id: spec.id.clone(),
                        step_type: spec.step_type.clone(),
                        reason: e.to_string(),
                    }
                })?;
                resolved.insert(spec.step_type.clone(), metadata);
            }
            let metadata = resolved
                .get(&spec.step_type)
                .ok_or_else(|| BuildError::UnknownStepType {
                    step_id: spec.id.clone(),
                    step_type: spec.step_type.clone(),
                    reason: "catalog entry vanished".to_string(),
                })?;

            check_required_params(spec, metadata)?;

            let factory = self.registry.get(&metadata.loader).await.ok_or_else(|| {
                BuildError::NotInstantiable {
                    step_id: spec.id.clone(),
                    step_type: spec.step_type.clone(),
                    reason: format!("no factory registered for loader `{}`", metadata.loader),
                }
            })?;
            let raw = factory(spec).map_err(|e| BuildError::NotInstantiable {
                step_id: spec.id.clone(),
                step_type: spec.step_type.clone(),
                reason: e.to_string(),
            })?;

            instances.push(StepInstance {
                spec: spec.clone(),
                layer: compose(raw, Arc::clone(&step_ids), &self.instrumentation),
                successors: successors.get(&spec.id).cloned().unwrap_or_default(),
                content_hash: content_hash(spec),
            });
        }

        let entry = graph
            .entry()
            .map(|s| s.id.clone())
            .ok_or_else(|| BuildError::EmptyGraph(graph.name.clone()))?;

        log::info!(
            "Built flow '{}': {} step(s), {} edge(s), {} distinct type(s), entry '{}'",
            graph.name,
            instances.len(),
            graph.edges.len(),
            resolved.len(),
            entry
        );

        Ok(Flow::new(graph.clone(), entry, instances, step_ids))
    }
}

type SuccessorMap = HashMap<String, BTreeMap<Action, String>>;

/// Check ids and edges, and group outgoing edges by action
fn validate_structure(graph: &GraphDescription) -> Result<SuccessorMap, BuildError> {
    if graph.steps.is_empty() {
        return Err(BuildError::EmptyGraph(graph.name.clone()));
    }

    let mut ids = HashSet::new();
    for spec in &graph.steps {
        if !ids.insert(spec.id.as_str()) {
            return Err(BuildError::DuplicateStep(spec.id.clone()));
        }
    }

    let mut successors: SuccessorMap = HashMap::new();
    for edge in &graph.edges {
        for endpoint in [&edge.from, &edge.to] {
            if !ids.contains(endpoint.as_str()) {
                return Err(BuildError::UnknownEdgeEndpoint {
                    from: edge.from.clone(),
                    to: edge.to.clone(),
                    action: edge.action.to_string(),
                    missing: endpoint.clone(),
                });
            }
        }

        let routes = successors.entry(edge.from.clone()).or_default();
        match routes.get(&edge.action) {
            Some(existing) if existing == &edge.to => {}
            Some(_) => {
                return Err(BuildError::DuplicateAction {
                    step_id: edge.from.clone(),
                    action: edge.action.to_string(),
                })
            }
            None => {
                routes.insert(edge.action.clone(), edge.to.clone());
            }
        }
    }

    Ok(successors)
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InProgress,
    Done,
}

/// Reject cycles unless every step on them is flagged `allow_loop`
fn detect_cycles(graph: &GraphDescription, successors: &SuccessorMap) -> Result<(), BuildError> {
    let allow: HashMap<&str, bool> = graph
        .steps
        .iter()
        .map(|s| (s.id.as_str(), s.allow_loop))
        .collect();
    let mut marks: HashMap<&str, Mark> = graph
        .steps
        .iter()
        .map(|s| (s.id.as_str(), Mark::Unvisited))
        .collect();
    let mut stack: Vec<&str> = Vec::new();

    for spec in &graph.steps {
        if marks.get(spec.id.as_str()) == Some(&Mark::Unvisited) {
            visit(&spec.id, successors, &allow, &mut marks, &mut stack)?;
        }
    }
    Ok(())
}

fn visit<'a>(
    id: &'a str,
    successors: &'a SuccessorMap,
    allow: &HashMap<&str, bool>,
    marks: &mut HashMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
) -> Result<(), BuildError> {
    marks.insert(id, Mark::InProgress);
    stack.push(id);

    if let Some(routes) = successors.get(id) {
        for next in routes.values() {
            match marks.get(next.as_str()).copied().unwrap_or(Mark::Unvisited) {
                Mark::InProgress => {
                    let start = stack.iter().position(|s| *s == next.as_str()).unwrap_or(0);
                    let cycle = &stack[start..];
                    let bounded = cycle
                        .iter()
                        .all(|s| allow.get(s).copied().unwrap_or(false));
                    if !bounded {
                        let mut path: Vec<String> = cycle.iter().map(|s| s.to_string()).collect();
                        path.push(next.clone());
                        return Err(BuildError::Cycle(path));
                    }
                    log::debug!("Accepting bounded loop through '{}'", next);
                }
                Mark::Unvisited => visit(next, successors, allow, marks, stack)?,
                Mark::Done => {}
            }
        }
    }

    stack.pop();
    marks.insert(id, Mark::Done);
    Ok(())
}

fn check_required_params(spec: &StepSpec, metadata: &StepMetadata) -> Result<(), BuildError> {
    for field in metadata.params.iter().filter(|f| f.required) {
        if !spec.params.contains_key(&field.name) {
            return Err(BuildError::MissingParameter {
                step_id: spec.id.clone(),
                step_type: spec.step_type.clone(),
                parameter: field.name.clone(),
            });
        }
    }
    Ok(())
}
