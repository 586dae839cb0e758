// SPDX-License-Identifier: MIT

//! Flow executor
//!
//! Drives a built flow one step at a time from its entry step. Each step goes
//! through prepare, run (retried with backoff, raced against an optional
//! deadline) and finalize; the action returned by finalize picks the next
//! step. The checkpoint is updated and persisted after every step boundary.

use futures::FutureExt;
use serde_json::{json, Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::flow::{Flow, StepInstance};
use crate::engine::workflow::checkpoint::{Checkpoint, CheckpointStore};
use crate::engine::workflow::retry::RetryConfig;
use crate::engine::workflow::state::{ReservedKey, Scope, SharedStore};
use crate::engine::workflow::telemetry::Telemetry;
use crate::engine::workflow::template::Resolver;
use crate::engine::workflow::types::{BatchErrorPolicy, BatchSpec};
use crate::sdk::error::{CheckpointError, EngineError, StepError, StepFailure};
use crate::sdk::model::Meter;
use crate::sdk::step::{Action, Step, StepContext};

/// Execution limits and defaults
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Safety limit on step invocations per run
    pub max_steps: usize,
    /// Used by steps that declare no retry policy
    pub default_retry: RetryConfig,
    /// Used by steps that declare no deadline
    pub default_timeout_ms: Option<u64>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_steps: 100,
            default_retry: RetryConfig::default(),
            default_timeout_ms: None,
        }
    }
}

/// What the caller gets back from a run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub run_id: Uuid,
    /// Completed without a step failure, fatal fault or cancellation
    pub success: bool,
    /// Action returned by the last step that ran
    pub action: Option<Action>,
    pub last_step: Option<String>,
    pub failure: Option<StepFailure>,
    pub cancelled: bool,
    pub checkpoint: Checkpoint,
    pub store: SharedStore,
    pub telemetry: Telemetry,
}

impl RunOutcome {
    /// A declared output of one step
    pub fn output(&self, step_id: &str, key: &str) -> Option<&Value> {
        self.store.namespace(step_id).and_then(|ns| ns.get(key))
    }
}

enum StepResult {
    Completed(Action),
    Failed(StepFailure),
    /// Escaped finalize; halts the whole run
    Fatal(StepError),
}

/// How a run stopped short of an outcome
enum Halt {
    Fatal { step_id: String, source: StepError },
    StepLimit { step_id: String },
    CheckpointWrite(CheckpointError),
    UnknownStep(String),
}

enum Ending {
    Completed,
    Failed(StepFailure),
    Cancelled,
}

/// Progress of one run
struct RunState {
    run_id: Uuid,
    store: SharedStore,
    checkpoint: Checkpoint,
    last_step: Option<String>,
    last_action: Option<Action>,
    invocations: usize,
}

impl RunState {
    fn finish(self, failure: Option<StepFailure>, cancelled: bool) -> RunOutcome {
        RunOutcome {
            run_id: self.run_id,
            success: failure.is_none() && !cancelled,
            action: self.last_action,
            last_step: self.last_step,
            failure,
            cancelled,
            telemetry: Telemetry::from_store(&self.store),
            checkpoint: self.checkpoint,
            store: self.store,
        }
    }
}

/// Runs flows sequentially
pub struct FlowExecutor {
    config: ExecutorConfig,
    checkpoints: Option<CheckpointStore>,
    cancel: CancellationToken,
}

impl FlowExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self {
            config,
            checkpoints: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Persist the checkpoint to a file after every step
    pub fn with_checkpoint_store(mut self, store: CheckpointStore) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Checked between steps only
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run `flow` against `store`
    ///
    /// With `resume_from`, each step recorded as completed is skipped on its
    /// first visit and its recorded action is replayed. A run halted by a
    /// fatal defect, the step limit or a failed checkpoint write returns an
    /// error that still carries the outcome reached so far.
    pub async fn execute(
        &self,
        flow: &Flow,
        store: SharedStore,
        resume_from: Option<Checkpoint>,
    ) -> Result<RunOutcome, EngineError> {
        let resumed = resume_from.is_some();
        let mut run = RunState {
            run_id: Uuid::new_v4(),
            store,
            checkpoint: resume_from.map(|c| c.for_resume()).unwrap_or_default(),
            last_step: None,
            last_action: None,
            invocations: 0,
        };

        log::info!(
            "[{}] Running flow '{}' from '{}'{}",
            run.run_id,
            flow.name(),
            flow.entry(),
            if resumed { " (resuming)" } else { "" }
        );

        match self.drive(flow, &mut run).await {
            Ok(Ending::Completed) => {
                log::info!(
                    "[{}] Flow '{}' completed ({} step(s) executed)",
                    run.run_id,
                    flow.name(),
                    run.invocations
                );
                Ok(run.finish(None, false))
            }
            Ok(Ending::Failed(failure)) => Ok(run.finish(Some(failure), false)),
            Ok(Ending::Cancelled) => Ok(run.finish(None, true)),
            Err(halt) => Err(self.halted(run, halt)),
        }
    }

    async fn drive(&self, flow: &Flow, run: &mut RunState) -> Result<Ending, Halt> {
        let mut skippable: HashMap<String, usize> = HashMap::new();
        for step_id in &run.checkpoint.completed_steps {
            *skippable.entry(step_id.clone()).or_insert(0) += 1;
        }

        let mut current = Some(flow.entry().to_string());
        while let Some(step_id) = current.take() {
            if self.cancel.is_cancelled() {
                log::warn!("[{}] Cancelled before step '{}'", run.run_id, step_id);
                self.persist(run)?;
                return Ok(Ending::Cancelled);
            }

            let instance = flow
                .step(&step_id)
                .ok_or_else(|| Halt::UnknownStep(step_id.clone()))?;

            if let Some(remaining) = skippable.get_mut(&step_id).filter(|n| **n > 0) {
                *remaining -= 1;
                let action = run.checkpoint.action_for(&step_id).cloned().unwrap_or_default();
                log::info!(
                    "[{}] Skipping '{}': completed in a previous attempt (action={})",
                    run.run_id,
                    step_id,
                    action
                );
                current = instance.successor(&action).map(str::to_string);
                run.last_step = Some(step_id);
                run.last_action = Some(action);
                continue;
            }

            if run.invocations >= self.config.max_steps {
                log::error!(
                    "[{}] Step limit {} reached at '{}'",
                    run.run_id,
                    self.config.max_steps,
                    step_id
                );
                self.persist_or_log(run);
                return Err(Halt::StepLimit { step_id });
            }
            run.invocations += 1;

            log::info!("[{}] Executing step: {}", run.run_id, step_id);
            let result = match &instance.spec.batch {
                Some(batch) => self.invoke_batch(flow, instance, batch, &mut run.store).await,
                None => self.invoke_once(instance, &mut run.store, Map::new()).await,
            };

            match result {
                StepResult::Completed(action) => {
                    run.checkpoint.record_success(&instance.spec, &action);
                    self.persist(run)?;
                    current = instance.successor(&action).map(str::to_string);
                    if current.is_none() {
                        log::info!(
                            "[{}] Branch ends at '{}' (action={})",
                            run.run_id,
                            step_id,
                            action
                        );
                    }
                    run.last_step = Some(step_id);
                    run.last_action = Some(action);
                }
                StepResult::Failed(failure) => {
                    log::error!("[{}] {}", run.run_id, failure);
                    run.checkpoint.record_failure(&step_id);
                    run.last_step = Some(step_id);
                    run.last_action = None;
                    self.persist(run)?;
                    return Ok(Ending::Failed(failure));
                }
                StepResult::Fatal(source) => {
                    log::error!(
                        "[{}] Halting: fatal defect in step '{}': {}",
                        run.run_id,
                        step_id,
                        source
                    );
                    run.checkpoint.record_failure(&step_id);
                    run.last_step = Some(step_id.clone());
                    run.last_action = None;
                    self.persist_or_log(run);
                    return Err(Halt::Fatal { step_id, source });
                }
            }
        }

        // A finished run must not be resumed from its returned store either
        run.checkpoint.completed = true;
        self.persist(run)?;
        if let Some(checkpoints) = &self.checkpoints {
            checkpoints.supersede().map_err(Halt::CheckpointWrite)?;
        }
        Ok(Ending::Completed)
    }

    /// Mirror the checkpoint into `__execution__`, then write the file
    fn persist(&self, run: &mut RunState) -> Result<(), Halt> {
        run.store
            .update_reserved(ReservedKey::Execution, run.checkpoint.to_value());
        if let Some(checkpoints) = &self.checkpoints {
            checkpoints.save(&run.checkpoint).map_err(Halt::CheckpointWrite)?;
        }
        Ok(())
    }

    // Already halting; the original cause is the error worth reporting
    fn persist_or_log(&self, run: &mut RunState) {
        if let Err(Halt::CheckpointWrite(e)) = self.persist(run) {
            log::error!("[{}] Could not persist checkpoint: {}", run.run_id, e);
        }
    }

    fn halted(&self, run: RunState, halt: Halt) -> EngineError {
        match halt {
            Halt::Fatal { step_id, source } => {
                let failure = StepFailure::fatal(&step_id, source.to_string());
                EngineError::Fatal {
                    outcome: Box::new(run.finish(Some(failure), false)),
                    step_id,
                    source,
                }
            }
            Halt::StepLimit { step_id } => {
                let limit = self.config.max_steps;
                let failure = StepFailure::fatal(
                    &step_id,
                    format!("step limit of {} invocations exceeded", limit),
                );
                EngineError::StepLimitExceeded {
                    outcome: Box::new(run.finish(Some(failure), false)),
                    limit,
                    step_id,
                }
            }
            Halt::CheckpointWrite(source) => {
                let mut outcome = run.finish(None, false);
                outcome.success = false;
                EngineError::CheckpointWrite {
                    source,
                    outcome: Box::new(outcome),
                }
            }
            Halt::UnknownStep(step_id) => EngineError::UnknownStep(step_id),
        }
    }

    /// One pass through the lifecycle
    async fn invoke_once(
        &self,
        instance: &StepInstance,
        store: &mut SharedStore,
        bindings: Map<String, Value>,
    ) -> StepResult {
        let step_id = instance.id();
        let layer = &instance.layer;
        let meter = Meter::new(step_id);
        let mut ctx = StepContext::new(step_id, instance.spec.params.clone(), store, meter.clone())
            .with_bindings(bindings);

        // A prepare failure skips run but may still be absorbed by fallback.
        // Retrying it is pointless: the store cannot change in between.
        let prepared = AssertUnwindSafe(layer.prepare(&mut ctx)).catch_unwind().await;
        let (input, result) = match prepared {
            Ok(Ok(input)) => {
                let retry = instance
                    .spec
                    .retry
                    .as_ref()
                    .unwrap_or(&self.config.default_retry);
                let timeout_ms = instance.spec.timeout_ms.or(self.config.default_timeout_ms);
                let (result, attempts) =
                    run_with_retry(layer, step_id, &input, &meter, retry, timeout_ms).await;
                ctx.invocation_mut().attempts = attempts;
                (input, result)
            }
            Ok(Err(error)) => (Value::Null, Err(error)),
            Err(panic) => {
                // The unwind skipped the namespacing layer's scope restore
                ctx.set_scope(Scope::Global);
                (Value::Null, Err(StepError::Panicked(panic_message(panic))))
            }
        };

        let output = match result {
            Ok(output) => output,
            Err(error) => {
                log::warn!("Step '{}' failed: {}; trying fallback", step_id, error);
                let fallback = AssertUnwindSafe(layer.fallback(input.clone(), error, &meter))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(StepError::Panicked(panic_message(panic))));
                match fallback {
                    Ok(output) => {
                        log::info!("Step '{}' continues with fallback output", step_id);
                        ctx.invocation_mut().fallback_used = true;
                        output
                    }
                    Err(error) => {
                        layer.on_failure(&mut ctx, &error).await;
                        return StepResult::Failed(StepFailure::new(step_id, &error));
                    }
                }
            }
        };

        let finalized = AssertUnwindSafe(layer.finalize(&mut ctx, &input, output))
            .catch_unwind()
            .await;
        let error = match finalized {
            Ok(Ok(action)) => return StepResult::Completed(action),
            Ok(Err(error)) => error,
            Err(panic) => {
                ctx.set_scope(Scope::Global);
                StepError::Panicked(panic_message(panic))
            }
        };
        // Lets instrumentation record duration and costs before the run halts
        layer.on_failure(&mut ctx, &error).await;
        StepResult::Fatal(error)
    }

    /// Sequential invocation once per element; results collected per element
    async fn invoke_batch(
        &self,
        flow: &Flow,
        instance: &StepInstance,
        batch: &BatchSpec,
        store: &mut SharedStore,
    ) -> StepResult {
        let step_id = instance.id();
        let items = Resolver::new(step_id, store, flow.step_ids()).resolve_items(&batch.items);
        let items = match items {
            Ok(items) => items,
            Err(e) => {
                let error = StepError::from(e);
                let mut ctx = StepContext::new(step_id, instance.spec.params.clone(), store, Meter::new(step_id));
                instance.layer.on_failure(&mut ctx, &error).await;
                return StepResult::Failed(StepFailure::new(step_id, &error));
            }
        };

        log::info!("Step '{}' runs over {} item(s)", step_id, items.len());
        store.take_namespace(step_id);

        let mut results = Vec::with_capacity(items.len());
        let mut errors = Vec::new();
        for (index, item) in items.into_iter().enumerate() {
            let mut bindings = Map::new();
            bindings.insert(batch.alias.clone(), item);

            match self.invoke_once(instance, store, bindings).await {
                StepResult::Fatal(error) => return StepResult::Fatal(error),
                StepResult::Completed(_) => {
                    results.push(store.take_namespace(step_id).unwrap_or_else(|| json!({})));
                }
                StepResult::Failed(failure) => {
                    store.take_namespace(step_id);
                    if batch.on_error == BatchErrorPolicy::FailFast {
                        return StepResult::Failed(StepFailure {
                            message: format!("item {}: {}", index, failure.message),
                            ..failure
                        });
                    }
                    log::warn!("Step '{}' item {} failed: {}", step_id, index, failure.message);
                    results.push(Value::Null);
                    errors.push(json!({
                        "index": index,
                        "category": failure.category,
                        "error": failure.message,
                    }));
                }
            }
        }

        let success_count = results.len() - errors.len();
        store.insert(
            step_id,
            json!({
                "results": results,
                "count": results.len(),
                "success_count": success_count,
                "error_count": errors.len(),
                "errors": errors,
            }),
        );
        StepResult::Completed(Action::default())
    }
}

/// Retry the run phase with backoff; returns the last result and the attempt count
async fn run_with_retry(
    layer: &Arc<dyn Step>,
    step_id: &str,
    input: &Value,
    meter: &Meter,
    retry: &RetryConfig,
    timeout_ms: Option<u64>,
) -> (Result<Value, StepError>, u32) {
    let max_attempts = retry.max_attempts();
    let mut attempt = 1;
    loop {
        let result = run_attempt(layer, step_id, input.clone(), meter.for_attempt(attempt), timeout_ms).await;
        match result {
            Ok(output) => return (Ok(output), attempt),
            Err(error) if attempt < max_attempts => {
                let delay = retry.delay_for(attempt);
                log::warn!(
                    "Step '{}' attempt {}/{} failed: {}; retrying in {:?}",
                    step_id,
                    attempt,
                    max_attempts,
                    error,
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(error) => return (Err(error), attempt),
        }
    }
}

/// One run attempt on its own task, raced against the deadline
///
/// A timed-out task is detached, not aborted: the operation may still be
/// running and may still produce side effects.
async fn run_attempt(
    layer: &Arc<dyn Step>,
    step_id: &str,
    input: Value,
    meter: Meter,
    timeout_ms: Option<u64>,
) -> Result<Value, StepError> {
    let layer = Arc::clone(layer);
    let handle = tokio::spawn(async move { layer.run(input, &meter).await });

    let joined = match timeout_ms {
        Some(ms) => match tokio::time::timeout(Duration::from_millis(ms), handle).await {
            Ok(joined) => joined,
            Err(_) => {
                log::warn!(
                    "Step '{}' exceeded its {}ms deadline; the operation may still be running",
                    step_id,
                    ms
                );
                return Err(StepError::Timeout {
                    step_id: step_id.to_string(),
                    timeout_ms: ms,
                });
            }
        },
        None => handle.await,
    };

    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(StepError::Panicked(panic_message(e.into_panic()))),
        Err(e) => Err(StepError::failed(format!("run task did not complete: {}", e))),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
