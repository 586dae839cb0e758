// SPDX-License-Identifier: MIT

//! Typed error handling for stepflow-rs
//!
//! Errors follow the phase they belong to: building a flow, resolving step
//! parameters, running a step, and persisting checkpoints. Everything a step
//! does wrong at runtime is absorbed by retry/fallback or reported as a
//! `StepFailure` in the run outcome. Errors that halt a run midway (fatal
//! defects, the step limit, a failed checkpoint write) carry the outcome
//! reached so far, so the caller can still resume from its store.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::engine::workflow::graph::RunOutcome;

/// Top-level error type for stepflow-rs
#[derive(Debug, Error)]
pub enum EngineError {
    /// The graph could not be turned into a flow
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Checkpoint persistence failed
    #[error("Checkpoint error: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// Something escaped a step's finalize phase; the run was halted
    #[error("Fatal defect in step '{step_id}': {source}")]
    Fatal {
        step_id: String,
        source: StepError,
        outcome: Box<RunOutcome>,
    },

    /// Loop safety limit reached
    #[error("Step limit of {limit} invocations exceeded at step '{step_id}'")]
    StepLimitExceeded {
        limit: usize,
        step_id: String,
        outcome: Box<RunOutcome>,
    },

    /// The checkpoint could not be written after steps had already run
    #[error("Checkpoint write failed mid-run: {source}")]
    CheckpointWrite {
        source: CheckpointError,
        outcome: Box<RunOutcome>,
    },

    /// A successor pointed at a step the flow does not contain
    #[error("Step '{0}' is not part of the flow")]
    UnknownStep(String),

    /// Configuration errors (invalid env vars, unreadable config)
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl EngineError {
    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Store, checkpoint and telemetry of a run that was halted midway
    pub fn outcome(&self) -> Option<&RunOutcome> {
        match self {
            EngineError::Fatal { outcome, .. }
            | EngineError::StepLimitExceeded { outcome, .. }
            | EngineError::CheckpointWrite { outcome, .. } => Some(outcome.as_ref()),
            _ => None,
        }
    }

    pub fn into_outcome(self) -> Option<RunOutcome> {
        match self {
            EngineError::Fatal { outcome, .. }
            | EngineError::StepLimitExceeded { outcome, .. }
            | EngineError::CheckpointWrite { outcome, .. } => Some(*outcome),
            _ => None,
        }
    }
}

/// Fatal, pre-execution errors raised while building a flow
#[derive(Debug, Error, PartialEq)]
pub enum BuildError {
    #[error("Graph '{0}' declares no steps")]
    EmptyGraph(String),

    #[error("Step id '{0}' is declared more than once")]
    DuplicateStep(String),

    /// The catalog could not resolve a step type
    #[error("Step '{step_id}': unresolved step type '{step_type}': {reason}")]
    UnknownStepType {
        step_id: String,
        step_type: String,
        reason: String,
    },

    /// The type resolved, but no usable implementation could be created
    #[error("Step '{step_id}': type '{step_type}' cannot be instantiated: {reason}")]
    NotInstantiable {
        step_id: String,
        step_type: String,
        reason: String,
    },

    #[error("Step '{step_id}': type '{step_type}' requires parameter '{parameter}'")]
    MissingParameter {
        step_id: String,
        step_type: String,
        parameter: String,
    },

    #[error("Edge {from} -[{action}]-> {to} references undeclared step '{missing}'")]
    UnknownEdgeEndpoint {
        from: String,
        to: String,
        action: String,
        missing: String,
    },

    #[error("Step '{step_id}' has more than one successor for action '{action}'")]
    DuplicateAction { step_id: String, action: String },

    /// Cycle through at least one step not flagged for a bounded loop
    #[error("Illegal cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),
}

/// Catalog lookup failures (external collaborator)
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CatalogError {
    #[error("Step type '{0}' is not in the catalog")]
    NotFound(String),

    #[error("Catalog entry for '{type_name}' is invalid: {reason}")]
    Invalid { type_name: String, reason: String },
}

/// Failures while substituting `${...}` references into step parameters
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ResolutionError {
    /// A field along the path does not exist
    #[error(
        "Step '{step_id}' could not resolve `${{{reference}}}`: path `{path}` not found; {}",
        describe_available(.prefix, .available)
    )]
    MissingPath {
        step_id: String,
        reference: String,
        path: String,
        prefix: String,
        available: Vec<String>,
    },

    /// An array index along the path is past the end
    #[error(
        "Step '{step_id}' could not resolve `${{{reference}}}`: index {index} out of bounds; `{prefix}` has {len} element(s)"
    )]
    IndexOutOfBounds {
        step_id: String,
        reference: String,
        prefix: String,
        index: usize,
        len: usize,
    },

    /// The path tries to descend into a scalar
    #[error(
        "Step '{step_id}' could not resolve `${{{reference}}}`: `{prefix}` is {found}, not an object or array"
    )]
    NotTraversable {
        step_id: String,
        reference: String,
        prefix: String,
        found: String,
    },

    /// The referenced step exists in the graph but has not run in this attempt
    #[error(
        "Step '{step_id}' references `${{{reference}}}` but step '{target}' has not executed yet"
    )]
    NotYetExecuted {
        step_id: String,
        reference: String,
        target: String,
    },

    /// The reference root names neither a step, a binding nor a workflow input
    #[error(
        "Step '{step_id}' could not resolve `${{{reference}}}`: `{root}` is unknown; {}",
        describe_available("the store", .available)
    )]
    UnknownReference {
        step_id: String,
        reference: String,
        root: String,
        available: Vec<String>,
    },

    #[error("Step '{step_id}' has a malformed template `{template}`: {reason}")]
    InvalidTemplate {
        step_id: String,
        template: String,
        reason: String,
    },

    #[error("Step '{step_id}' batch items `{reference}` resolved to {found}, expected an array")]
    BatchItemsNotArray {
        step_id: String,
        reference: String,
        found: String,
    },
}

fn describe_available(prefix: &str, available: &[String]) -> String {
    if available.is_empty() {
        return format!("`{}` is empty", prefix);
    }
    let fields: Vec<String> = available.iter().map(|f| format!("`{}`", f)).collect();
    format!("`{}` contains: {}", prefix, fields.join(", "))
}

/// Errors produced by a single step
#[derive(Debug, Error)]
pub enum StepError {
    /// Generic runtime fault from the step's own logic
    #[error("{0}")]
    Failed(String),

    /// An expected field was missing from an input or output value
    #[error("Missing field '{0}'")]
    MissingField(String),

    /// Deadline elapsed for the run phase (the operation may still be running)
    #[error("Step '{step_id}' timed out after {timeout_ms}ms")]
    Timeout { step_id: String, timeout_ms: u64 },

    /// A parameter reference could not be substituted
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// The step panicked
    #[error("Step panicked: {0}")]
    Panicked(String),

    /// JSON serialization/deserialization errors
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl StepError {
    /// Create a runtime fault
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Create a missing field error
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField(field.into())
    }

    /// Category used for user-visible failure reports
    pub fn category(&self) -> FailureCategory {
        match self {
            StepError::Resolution(_) => FailureCategory::Resolution,
            StepError::Timeout { .. } => FailureCategory::Timeout,
            _ => FailureCategory::Runtime,
        }
    }
}

// Allow conversion from &str for step authors
impl From<&str> for StepError {
    fn from(s: &str) -> Self {
        Self::Failed(s.to_string())
    }
}

impl From<String> for StepError {
    fn from(s: String) -> Self {
        Self::Failed(s)
    }
}

// Convert from Box<dyn Error> for compatibility
impl From<Box<dyn std::error::Error + Send + Sync>> for StepError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        Self::Failed(err.to_string())
    }
}

/// Checkpoint persistence errors
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Invalid execution identity '{0}': only alphanumerics, '-' and '_' are allowed")]
    InvalidIdentity(String),

    #[error("Checkpoint I/O failed for {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Checkpoint at {} is malformed: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error(transparent)]
    Serialize(#[from] serde_json::Error),
}

/// Category of a step failure, reported to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    Resolution,
    Runtime,
    Timeout,
    Fatal,
}

impl std::fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FailureCategory::Resolution => "resolution",
            FailureCategory::Runtime => "runtime",
            FailureCategory::Timeout => "timeout",
            FailureCategory::Fatal => "fatal",
        };
        f.write_str(name)
    }
}

/// A failure that halted the run, as reported in its outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub step_id: String,
    pub category: FailureCategory,
    pub message: String,
}

impl StepFailure {
    pub fn new(step_id: impl Into<String>, error: &StepError) -> Self {
        Self {
            step_id: step_id.into(),
            category: error.category(),
            message: error.to_string(),
        }
    }

    /// Failure record for a defect that halted the whole run
    pub fn fatal(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            category: FailureCategory::Fatal,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] step '{}': {}", self.category, self.step_id, self.message)
    }
}
