// SPDX-License-Identifier: MIT

//! Built flow: wrapped step instances wired by routing action

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use crate::engine::workflow::types::{GraphDescription, StepSpec};
use crate::sdk::step::{layer_chain, Action, Step};

/// One step bound to its spec, its wrapped implementation and its successors
///
/// Layers keep no per-invocation state, so cloning an instance for a second
/// incoming edge shares nothing mutable.
#[derive(Clone)]
pub struct StepInstance {
    pub spec: StepSpec,
    pub layer: Arc<dyn Step>,
    pub successors: BTreeMap<Action, String>,
    pub content_hash: String,
}

impl StepInstance {
    pub fn id(&self) -> &str {
        &self.spec.id
    }

    /// Successor for an action; `None` ends the branch
    pub fn successor(&self, action: &Action) -> Option<&str> {
        self.successors.get(action).map(String::as_str)
    }

    pub fn is_terminal(&self) -> bool {
        self.successors.is_empty()
    }

    /// Layer names, outermost first
    pub fn layers(&self) -> Vec<&'static str> {
        layer_chain(&self.layer)
    }
}

impl std::fmt::Debug for StepInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepInstance")
            .field("id", &self.spec.id)
            .field("type", &self.spec.step_type)
            .field("layers", &self.layers())
            .field("successors", &self.successors)
            .finish()
    }
}

/// A graph turned into runnable instances
#[derive(Debug, Clone)]
pub struct Flow {
    graph: GraphDescription,
    entry: String,
    steps: HashMap<String, StepInstance>,
    step_ids: Arc<BTreeSet<String>>,
}

impl Flow {
    pub(crate) fn new(
        graph: GraphDescription,
        entry: String,
        instances: Vec<StepInstance>,
        step_ids: Arc<BTreeSet<String>>,
    ) -> Self {
        let steps = instances
            .into_iter()
            .map(|i| (i.spec.id.clone(), i))
            .collect();
        Self {
            graph,
            entry,
            steps,
            step_ids,
        }
    }

    pub fn name(&self) -> &str {
        &self.graph.name
    }

    pub fn graph(&self) -> &GraphDescription {
        &self.graph
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn step(&self, id: &str) -> Option<&StepInstance> {
        self.steps.get(id)
    }

    pub fn step_ids(&self) -> &Arc<BTreeSet<String>> {
        &self.step_ids
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Instances in declaration order
    pub fn instances(&self) -> impl Iterator<Item = &StepInstance> {
        self.graph
            .steps
            .iter()
            .filter_map(|spec| self.steps.get(&spec.id))
    }
}
