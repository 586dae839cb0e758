// SPDX-License-Identifier: MIT

//! Outermost layer: timing, cost capture and optional before/after trace

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;

use crate::engine::workflow::state::ReservedKey;
use crate::engine::workflow::telemetry::{
    sanitize, snapshot, CostRecord, StepEvent, TelemetrySink, TraceEntry, TraceStatus,
};
use crate::sdk::error::StepError;
use crate::sdk::model::Meter;
use crate::sdk::step::{Action, Step, StepContext};

/// Settings shared by every instrumentation layer of a flow
#[derive(Clone)]
pub struct InstrumentationConfig {
    /// Record before/after snapshots
    pub trace: bool,
    /// Max characters kept per string in snapshots
    pub value_limit: usize,
    pub sink: Option<Arc<dyn TelemetrySink>>,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            trace: false,
            value_limit: 2000,
            sink: None,
        }
    }
}

impl std::fmt::Debug for InstrumentationConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentationConfig")
            .field("trace", &self.trace)
            .field("value_limit", &self.value_limit)
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

pub struct InstrumentationLayer {
    inner: Arc<dyn Step>,
    config: InstrumentationConfig,
}

impl InstrumentationLayer {
    pub fn new(inner: Arc<dyn Step>, config: InstrumentationConfig) -> Self {
        Self { inner, config }
    }

    fn record(
        &self,
        ctx: &mut StepContext<'_>,
        status: TraceStatus,
        action: Option<&Action>,
        error: Option<String>,
    ) {
        let step_id = ctx.step_id().to_string();
        let duration_ms = ctx
            .invocation()
            .started_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        // Loops and batch items revisit a step; durations add up
        let previous_ms = ctx
            .reserved(ReservedKey::Metrics)
            .and_then(|m| m.get(&step_id))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let mut metrics = Map::new();
        metrics.insert(step_id.clone(), json!(previous_ms + duration_ms));
        ctx.update_reserved(ReservedKey::Metrics, Value::Object(metrics));

        let costs: Vec<CostRecord> = ctx
            .meter()
            .drain()
            .into_iter()
            .map(|entry| CostRecord {
                step_id: step_id.clone(),
                model: entry.model,
                input_units: entry.usage.input_units,
                output_units: entry.usage.output_units,
                duration_ms: entry.duration.as_millis() as u64,
                is_retry_origin: entry.attempt > 1,
            })
            .collect();
        if !costs.is_empty() {
            let encoded: Vec<Value> = costs
                .iter()
                .filter_map(|c| serde_json::to_value(c).ok())
                .collect();
            ctx.update_reserved(ReservedKey::LlmCalls, Value::Array(encoded));
        }

        let attempts = ctx.invocation().attempts;
        if self.config.trace {
            let before = ctx.invocation_mut().before.take();
            let after = snapshot(ctx.store(), self.config.value_limit);
            let entry = TraceEntry {
                step_id: step_id.clone(),
                status,
                action: action.cloned(),
                attempts,
                duration_ms,
                timestamp: Utc::now(),
                before,
                after: Some(after),
                error,
            };
            match serde_json::to_value(&entry) {
                Ok(value) => ctx.update_reserved(ReservedKey::Trace, value),
                Err(e) => log::warn!("Could not record trace for {}: {}", step_id, e),
            }
        }

        if let Some(sink) = &self.config.sink {
            sink.on_step(&StepEvent {
                step_id: &step_id,
                status,
                action,
                attempts,
                duration_ms,
                costs: &costs,
            });
        }
    }
}

#[async_trait]
impl Step for InstrumentationLayer {
    fn layer_name(&self) -> &'static str {
        "instrumentation"
    }

    fn inner(&self) -> Option<&Arc<dyn Step>> {
        Some(&self.inner)
    }

    async fn prepare(&self, ctx: &mut StepContext<'_>) -> Result<Value, StepError> {
        ctx.invocation_mut().started_at = Some(Instant::now());
        let prepared = self.inner.prepare(ctx).await;
        // Taken even when prepare fails; params are then the declared ones
        if self.config.trace {
            let before = json!({
                "params": sanitize(&Value::Object(ctx.params().clone()), self.config.value_limit),
                "store": snapshot(ctx.store(), self.config.value_limit),
            });
            ctx.invocation_mut().before = Some(before);
        }
        prepared
    }

    async fn run(&self, input: Value, meter: &Meter) -> Result<Value, StepError> {
        self.inner.run(input, meter).await
    }

    async fn fallback(&self, input: Value, error: StepError, meter: &Meter) -> Result<Value, StepError> {
        self.inner.fallback(input, error, meter).await
    }

    async fn finalize(
        &self,
        ctx: &mut StepContext<'_>,
        input: &Value,
        output: Value,
    ) -> Result<Action, StepError> {
        let action = self.inner.finalize(ctx, input, output).await?;
        let status = if ctx.invocation().fallback_used {
            TraceStatus::Fallback
        } else {
            TraceStatus::Ok
        };
        self.record(ctx, status, Some(&action), None);
        Ok(action)
    }

    async fn on_failure(&self, ctx: &mut StepContext<'_>, error: &StepError) {
        self.inner.on_failure(ctx, error).await;
        self.record(ctx, TraceStatus::Failed, None, Some(error.to_string()));
    }
}
