// SPDX-License-Identifier: MIT

//! Checkpoint & resume
//!
//! A checkpoint records which steps finished, the action each returned and
//! a content hash of each finished step's definition. It never holds step
//! outputs. Compatibility is all-or-nothing: if any finished step's hash
//! differs from the current graph, the whole checkpoint is discarded.

mod store;

pub use store::CheckpointStore;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};

use crate::engine::workflow::state::{ReservedKey, SharedStore};
use crate::engine::workflow::types::{GraphDescription, StepSpec};
use crate::sdk::step::Action;

/// Persisted execution progress
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// In completion order; a step visited twice through a loop appears twice
    #[serde(default)]
    pub completed_steps: Vec<String>,
    #[serde(default)]
    pub step_actions: BTreeMap<String, Action>,
    /// Hex-encoded SHA-256 of each completed step's type and declared params
    #[serde(default)]
    pub step_hashes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    /// Set once every step on the path finished; never resumed from
    #[serde(default, skip_serializing_if = "is_false")]
    pub completed: bool,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&mut self, spec: &StepSpec, action: &Action) {
        self.completed_steps.push(spec.id.clone());
        self.step_actions.insert(spec.id.clone(), action.clone());
        self.step_hashes.insert(spec.id.clone(), content_hash(spec));
        if self.failed_step.as_deref() == Some(spec.id.as_str()) {
            self.failed_step = None;
        }
    }

    pub fn record_failure(&mut self, step_id: &str) {
        self.failed_step = Some(step_id.to_string());
    }

    pub fn is_completed(&self, step_id: &str) -> bool {
        self.completed_steps.iter().any(|s| s == step_id)
    }

    /// How many times a step completed
    pub fn completions(&self, step_id: &str) -> usize {
        self.completed_steps.iter().filter(|s| *s == step_id).count()
    }

    pub fn action_for(&self, step_id: &str) -> Option<&Action> {
        self.step_actions.get(step_id)
    }

    /// First completed step whose definition no longer matches `graph`
    pub fn first_incompatibility(&self, graph: &GraphDescription) -> Option<String> {
        let mut seen = BTreeSet::new();
        for step_id in &self.completed_steps {
            if !seen.insert(step_id.as_str()) {
                continue;
            }
            let current = graph.step(step_id).map(content_hash);
            let recorded = self.step_hashes.get(step_id);
            match (current, recorded) {
                (Some(current), Some(recorded)) if &current == recorded => {}
                _ => return Some(step_id.clone()),
            }
        }
        None
    }

    pub fn is_compatible(&self, graph: &GraphDescription) -> bool {
        self.first_incompatibility(graph).is_none()
    }

    /// The checkpoint a resumed attempt starts from
    pub fn for_resume(&self) -> Self {
        Self {
            failed_step: None,
            completed: false,
            ..self.clone()
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Recover the checkpoint mirrored under `__execution__`
    ///
    /// Returns the record as stored, finished or not; see [`Self::resumable_from`].
    pub fn from_store(store: &SharedStore) -> Option<Self> {
        let value = store.reserved(ReservedKey::Execution)?;
        match serde_json::from_value(value.clone()) {
            Ok(checkpoint) => Some(checkpoint),
            Err(e) => {
                log::warn!("Ignoring malformed {} record: {}", ReservedKey::Execution, e);
                None
            }
        }
    }

    /// The mirrored checkpoint, unless its run already finished
    pub fn resumable_from(store: &SharedStore) -> Option<Self> {
        Self::from_store(store).filter(|checkpoint| !checkpoint.completed)
    }
}

/// Stable hash of a step's type and declared (pre-substitution) parameters
pub fn content_hash(spec: &StepSpec) -> String {
    let mut canonical = String::new();
    canonical.push_str("{\"params\":");
    write_canonical(&Value::Object(spec.params.clone()), &mut canonical);
    canonical.push_str(",\"type\":");
    write_canonical(&Value::String(spec.step_type.clone()), &mut canonical);
    canonical.push('}');
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

// Key order must not depend on how the map was built
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                if let Some(v) = fields.get(*key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Initial store for a resumed attempt
///
/// Seeds workflow inputs, the namespaces of completed steps and the cost
/// records accumulated so far from `prior`; `inputs` override prior inputs.
/// Namespaces of steps that did not complete are dropped.
pub fn resume(
    checkpoint: &Checkpoint,
    graph: &GraphDescription,
    prior: Option<&SharedStore>,
    inputs: Map<String, Value>,
) -> SharedStore {
    let mut store = SharedStore::new();

    if let Some(prior) = prior {
        for key in prior.keys() {
            let is_step = graph.step(key).is_some();
            if is_step && !checkpoint.is_completed(key) {
                continue;
            }
            if let Some(value) = prior.get(key) {
                store.insert(key, value.clone());
            }
        }
        if let Some(calls) = prior.reserved(ReservedKey::LlmCalls) {
            store.update_reserved(ReservedKey::LlmCalls, calls.clone());
        }
    } else if !checkpoint.completed_steps.is_empty() {
        log::warn!(
            "Resuming without the prior store: outputs of {} completed step(s) are unavailable",
            checkpoint.completed_steps.len()
        );
    }

    for (key, value) in inputs {
        store.insert(&key, value);
    }

    let resumed = checkpoint.for_resume();
    store.update_reserved(ReservedKey::Execution, resumed.to_value());
    store
}
