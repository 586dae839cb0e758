//! Mock steps shared by unit tests

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::engine::workflow::builder::Builder;
use crate::engine::workflow::catalog::{InMemoryCatalog, StepMetadata, StepRegistry};
use crate::engine::workflow::graph::Flow;
use crate::engine::workflow::layers::InstrumentationConfig;
use crate::engine::workflow::types::{GraphDescription, StepSpec};
use crate::sdk::error::StepError;
use crate::sdk::model::{Completion, Content, GenerationConfig, Meter, Model, Usage};
use crate::sdk::step::{Action, Step, StepContext};

/// Returns a fixed output and counts invocations
pub struct MockStep {
    pub output: Value,
    pub calls: Arc<AtomicUsize>,
}

impl MockStep {
    pub fn new(output: Value) -> Self {
        Self {
            output,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait]
impl Step for MockStep {
    async fn run(&self, _input: Value, _meter: &Meter) -> Result<Value, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.clone())
    }
}

/// Captures the resolved input it receives and echoes it as output
#[derive(Default)]
pub struct InputCapturingStep {
    pub seen: Arc<Mutex<Vec<Value>>>,
}

#[async_trait]
impl Step for InputCapturingStep {
    async fn run(&self, input: Value, _meter: &Meter) -> Result<Value, StepError> {
        self.seen.lock().push(input.clone());
        Ok(input)
    }
}

/// Fails `failures` times, then succeeds; fallback yields the same shape
pub struct FlakyStep {
    pub failures: usize,
    pub calls: Arc<AtomicUsize>,
    pub with_fallback: bool,
}

impl FlakyStep {
    pub fn new(failures: usize, with_fallback: bool) -> Self {
        Self {
            failures,
            calls: Arc::new(AtomicUsize::new(0)),
            with_fallback,
        }
    }
}

#[async_trait]
impl Step for FlakyStep {
    async fn run(&self, _input: Value, _meter: &Meter) -> Result<Value, StepError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(StepError::failed(format!("transient failure #{}", call + 1)));
        }
        Ok(json!({"status": "ok", "items": [1, 2]}))
    }

    async fn fallback(&self, _input: Value, error: StepError, _meter: &Meter) -> Result<Value, StepError> {
        if !self.with_fallback {
            return Err(error);
        }
        Ok(json!({"status": "degraded", "items": []}))
    }

    async fn finalize(
        &self,
        ctx: &mut StepContext<'_>,
        _input: &Value,
        output: Value,
    ) -> Result<Action, StepError> {
        let status = output
            .get("status")
            .cloned()
            .ok_or_else(|| StepError::missing_field("status"))?;
        let items = output
            .get("items")
            .cloned()
            .ok_or_else(|| StepError::missing_field("items"))?;
        ctx.insert("status", status);
        ctx.insert("items", items);
        Ok(Action::default())
    }
}

/// Sleeps past any reasonable deadline
pub struct SlowStep {
    pub delay: Duration,
}

#[async_trait]
impl Step for SlowStep {
    async fn run(&self, _input: Value, _meter: &Meter) -> Result<Value, StepError> {
        tokio::time::sleep(self.delay).await;
        Ok(json!({"late": true}))
    }
}

/// Returns a fixed routing action
pub struct RoutingStep {
    pub action: String,
}

#[async_trait]
impl Step for RoutingStep {
    async fn run(&self, input: Value, _meter: &Meter) -> Result<Value, StepError> {
        Ok(input)
    }

    async fn finalize(
        &self,
        _ctx: &mut StepContext<'_>,
        _input: &Value,
        _output: Value,
    ) -> Result<Action, StepError> {
        Ok(Action::from(self.action.as_str()))
    }
}

/// Cancels the run from inside its own step
pub struct CancellingStep {
    pub token: CancellationToken,
}

#[async_trait]
impl Step for CancellingStep {
    async fn run(&self, _input: Value, _meter: &Meter) -> Result<Value, StepError> {
        self.token.cancel();
        Ok(json!({"done": true}))
    }
}

/// Bug in the lifecycle implementation itself
pub struct PanickingFinalizeStep;

#[async_trait]
impl Step for PanickingFinalizeStep {
    async fn run(&self, _input: Value, _meter: &Meter) -> Result<Value, StepError> {
        Ok(json!({}))
    }

    async fn finalize(
        &self,
        _ctx: &mut StepContext<'_>,
        _input: &Value,
        _output: Value,
    ) -> Result<Action, StepError> {
        panic!("finalize exploded")
    }
}

/// Deterministic model with fixed usage
pub struct FixedModel;

#[async_trait]
impl Model for FixedModel {
    fn name(&self) -> &str {
        "fixed-model"
    }

    async fn generate(
        &self,
        _history: &[Content],
        _config: Option<&GenerationConfig>,
    ) -> Result<Completion, StepError> {
        Ok(Completion {
            text: "summary".to_string(),
            usage: Usage {
                input_units: 5,
                output_units: 2,
            },
        })
    }
}

/// Makes one metered model call per run
pub struct MeteredStep;

#[async_trait]
impl Step for MeteredStep {
    async fn run(&self, _input: Value, meter: &Meter) -> Result<Value, StepError> {
        let model = meter.wrap(Arc::new(FixedModel));
        let completion = model.generate(&[Content::user("summarize")], None).await?;
        Ok(json!({"text": completion.text}))
    }
}

/// Catalog + registry where each step type maps to a prebuilt instance
pub async fn builder_for(impls: Vec<(&str, Arc<dyn Step>)>) -> Builder {
    let catalog = InMemoryCatalog::new();
    let registry = StepRegistry::new();
    for (step_type, step) in impls {
        catalog.register(step_type, StepMetadata::new(step_type)).await;
        registry
            .register_fn(step_type, move |_spec: &StepSpec| Ok(Arc::clone(&step)))
            .await;
    }
    Builder::new(Arc::new(catalog), registry)
}

pub async fn build_flow(graph: &GraphDescription, impls: Vec<(&str, Arc<dyn Step>)>) -> Flow {
    builder_for(impls)
        .await
        .with_instrumentation(InstrumentationConfig::default())
        .build(graph)
        .await
        .unwrap()
}
