// SPDX-License-Identifier: MIT

//! Engine facade: build, decide whether to resume, execute

use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::engine::config::EngineConfig;
use crate::engine::workflow::builder::Builder;
use crate::engine::workflow::catalog::{StepCatalog, StepRegistry};
use crate::engine::workflow::checkpoint::{self, Checkpoint, CheckpointStore};
use crate::engine::workflow::graph::{Flow, FlowExecutor, RunOutcome};
use crate::engine::workflow::state::SharedStore;
use crate::engine::workflow::telemetry::TelemetrySink;
use crate::engine::workflow::types::GraphDescription;
use crate::sdk::error::EngineError;

/// Everything a single execution attempt needs besides the graph
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Names the checkpoint file; without it progress lives only in the store
    pub execution_id: Option<String>,
    pub inputs: Map<String, Value>,
    /// Store returned by the previous attempt, needed to resume with outputs
    pub prior_store: Option<SharedStore>,
    pub cancel: Option<CancellationToken>,
}

impl RunRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_execution_id(mut self, id: impl Into<String>) -> Self {
        self.execution_id = Some(id.into());
        self
    }

    pub fn with_input(mut self, key: impl Into<String>, value: Value) -> Self {
        self.inputs.insert(key.into(), value);
        self
    }

    pub fn with_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.inputs.extend(inputs);
        self
    }

    pub fn with_prior_store(mut self, store: SharedStore) -> Self {
        self.prior_store = Some(store);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

pub struct Engine {
    config: EngineConfig,
    catalog: Arc<dyn StepCatalog>,
    registry: StepRegistry,
    sink: Option<Arc<dyn TelemetrySink>>,
}

impl Engine {
    pub fn new(config: EngineConfig, catalog: Arc<dyn StepCatalog>, registry: StepRegistry) -> Self {
        Self {
            config,
            catalog,
            registry,
            sink: None,
        }
    }

    /// Receive a telemetry event after every step
    pub fn with_sink(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn builder(&self) -> Builder {
        let mut instrumentation = self.config.instrumentation();
        instrumentation.sink = self.sink.clone();
        Builder::new(Arc::clone(&self.catalog), self.registry.clone()).with_instrumentation(instrumentation)
    }

    /// Build without executing; useful for validating a graph
    pub async fn build(&self, graph: &GraphDescription) -> Result<Flow, EngineError> {
        Ok(self.builder().build(graph).await?)
    }

    /// Run one execution attempt
    ///
    /// A checkpoint from a previous attempt is looked up in the checkpoint
    /// directory (with an execution id) or in the prior store. It is used
    /// only if its run did not finish and every step it records as completed
    /// is unchanged; otherwise the attempt starts from scratch.
    ///
    /// A halted run's error carries its outcome (`EngineError::outcome`);
    /// pass that store as the prior store to resume after a fatal defect.
    pub async fn execute(
        &self,
        graph: &GraphDescription,
        request: RunRequest,
    ) -> Result<RunOutcome, EngineError> {
        let flow = self.build(graph).await?;

        let checkpoints = match &request.execution_id {
            Some(id) => Some(CheckpointStore::new(&self.config.checkpoint_dir, id)?),
            None => None,
        };
        let previous = match &checkpoints {
            Some(store) => store.load()?.filter(|c| !c.completed),
            None => request.prior_store.as_ref().and_then(Checkpoint::resumable_from),
        };

        let (store, resume_from) = match previous {
            Some(previous) => match previous.first_incompatibility(graph) {
                None => {
                    log::info!(
                        "Resuming '{}': {} completed step(s) carried over",
                        graph.name,
                        previous.completed_steps.len()
                    );
                    let store = checkpoint::resume(
                        &previous,
                        graph,
                        request.prior_store.as_ref(),
                        request.inputs,
                    );
                    (store, Some(previous))
                }
                Some(changed) => {
                    log::warn!(
                        "Checkpoint for '{}' discarded: step '{}' changed since it completed; starting over",
                        graph.name,
                        changed
                    );
                    (SharedStore::with_inputs(request.inputs), None)
                }
            },
            None => (SharedStore::with_inputs(request.inputs), None),
        };

        let mut executor = FlowExecutor::new(self.config.executor());
        if let Some(checkpoints) = checkpoints {
            executor = executor.with_checkpoint_store(checkpoints);
        }
        if let Some(token) = request.cancel {
            executor = executor.with_cancellation(token);
        }
        executor.execute(&flow, store, resume_from).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::workflow::catalog::{InMemoryCatalog, StepMetadata};
    use crate::engine::workflow::test_support::{CancellingStep, InputCapturingStep, MockStep};
    use crate::engine::workflow::types::{Edge, StepSpec};
    use crate::sdk::error::{FailureCategory, StepError};
    use crate::sdk::model::Meter;
    use crate::sdk::step::{Action, Step, StepContext};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Rejects its output in finalize while its `strict` param is set
    struct StrictStep;

    #[async_trait]
    impl Step for StrictStep {
        async fn run(&self, input: Value, _meter: &Meter) -> Result<Value, StepError> {
            Ok(input)
        }

        async fn finalize(
            &self,
            ctx: &mut StepContext<'_>,
            input: &Value,
            output: Value,
        ) -> Result<Action, StepError> {
            if input["strict"] == json!(true) {
                return Err(StepError::missing_field("summary"));
            }
            ctx.insert("n", output["n"].clone());
            Ok(Action::default())
        }
    }

    struct Fixture {
        engine: Engine,
        fetch_calls: Arc<AtomicUsize>,
        cancel: CancellationToken,
        dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let catalog = InMemoryCatalog::new();
        let registry = StepRegistry::new();
        let cancel = CancellationToken::new();

        let fetch = Arc::new(MockStep::new(json!({"result": {"data": ["a", "b"]}})));
        let fetch_calls = fetch.counter();
        let steps: Vec<(&str, Arc<dyn Step>)> = vec![
            ("fetch", fetch as Arc<dyn Step>),
            ("transform", Arc::new(InputCapturingStep::default()) as Arc<dyn Step>),
            ("strict", Arc::new(StrictStep) as Arc<dyn Step>),
            ("pause", Arc::new(CancellingStep { token: cancel.clone() }) as Arc<dyn Step>),
        ];
        for (name, step) in steps {
            catalog.register(name, StepMetadata::new(name)).await;
            registry
                .register_fn(name, move |_spec: &StepSpec| Ok(Arc::clone(&step)))
                .await;
        }

        let config = EngineConfig {
            checkpoint_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        Fixture {
            engine: Engine::new(config, Arc::new(catalog), registry),
            fetch_calls,
            cancel,
            dir,
        }
    }

    fn graph(reference: &str) -> GraphDescription {
        GraphDescription::new("issues")
            .with_step(StepSpec::new("fetch", "fetch").with_param("repo", json!("${repo}")))
            .with_step(StepSpec::new("transform", "transform").with_param("items", json!(reference)))
            .with_edge(Edge::new("fetch", "transform"))
    }

    fn strict_graph(strict: bool) -> GraphDescription {
        GraphDescription::new("issues")
            .with_step(StepSpec::new("fetch", "fetch").with_param("repo", json!("${repo}")))
            .with_step(
                StepSpec::new("use", "strict")
                    .with_param("n", json!("${fetch.result.data}"))
                    .with_param("strict", json!(strict)),
            )
            .with_edge(Edge::new("fetch", "use"))
    }

    #[tokio::test]
    async fn test_resume_from_prior_store() {
        let f = fixture().await;
        let first = f
            .engine
            .execute(
                &graph("${fetch.result.issues}"),
                RunRequest::new().with_input("repo", json!("acme/app")),
            )
            .await
            .unwrap();
        assert_eq!(first.failure.as_ref().unwrap().category, FailureCategory::Resolution);
        assert_eq!(f.fetch_calls.load(Ordering::SeqCst), 1);

        let second = f
            .engine
            .execute(
                &graph("${fetch.result.data}"),
                RunRequest::new().with_prior_store(first.store),
            )
            .await
            .unwrap();

        assert!(second.success);
        assert_eq!(f.fetch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.output("transform", "items"), Some(&json!(["a", "b"])));
        assert_eq!(second.store.get("repo"), Some(&json!("acme/app")));
    }

    #[tokio::test]
    async fn test_changed_completed_step_forces_fresh_run() {
        let f = fixture().await;
        let first = f
            .engine
            .execute(
                &graph("${fetch.result.issues}"),
                RunRequest::new().with_input("repo", json!("acme/app")),
            )
            .await
            .unwrap();

        let mut changed = graph("${fetch.result.data}");
        changed
            .step_mut("fetch")
            .unwrap()
            .params
            .insert("per_page".into(), json!(50));

        let second = f
            .engine
            .execute(
                &changed,
                RunRequest::new()
                    .with_input("repo", json!("acme/app"))
                    .with_prior_store(first.store),
            )
            .await
            .unwrap();

        assert!(second.success);
        assert_eq!(f.fetch_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_resume_after_fatal_defect() {
        let f = fixture().await;
        let err = f
            .engine
            .execute(
                &strict_graph(true),
                RunRequest::new()
                    .with_execution_id("x")
                    .with_input("repo", json!("acme/app")),
            )
            .await
            .unwrap_err();
        assert!(matches!(&err, EngineError::Fatal { step_id, .. } if step_id == "use"));
        assert!(f.dir.path().join("x.json").exists());

        let halted = err.into_outcome().unwrap();
        assert_eq!(halted.checkpoint.completed_steps, vec!["fetch"]);
        assert!(halted.telemetry.durations_ms.contains_key("use"));

        let second = f
            .engine
            .execute(
                &strict_graph(false),
                RunRequest::new()
                    .with_execution_id("x")
                    .with_prior_store(halted.store),
            )
            .await
            .unwrap();

        assert!(second.success);
        assert_eq!(f.fetch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.output("use", "n"), Some(&json!(["a", "b"])));
        assert!(!f.dir.path().join("x.json").exists());
    }

    #[tokio::test]
    async fn test_resume_after_cancellation() {
        let f = fixture().await;
        let graph = GraphDescription::new("issues")
            .with_step(StepSpec::new("fetch", "fetch").with_param("repo", json!("${repo}")))
            .with_step(StepSpec::new("pause", "pause"))
            .with_step(
                StepSpec::new("transform", "transform").with_param("items", json!("${fetch.result.data}")),
            )
            .with_edge(Edge::new("fetch", "pause"))
            .with_edge(Edge::new("pause", "transform"));

        let first = f
            .engine
            .execute(
                &graph,
                RunRequest::new()
                    .with_execution_id("c")
                    .with_input("repo", json!("acme/app"))
                    .with_cancellation(f.cancel.clone()),
            )
            .await
            .unwrap();
        assert!(first.cancelled);
        assert_eq!(first.checkpoint.completed_steps, vec!["fetch", "pause"]);
        assert!(first.output("transform", "items").is_none());

        let second = f
            .engine
            .execute(
                &graph,
                RunRequest::new()
                    .with_execution_id("c")
                    .with_prior_store(first.store),
            )
            .await
            .unwrap();

        assert!(second.success);
        assert_eq!(f.fetch_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.output("transform", "items"), Some(&json!(["a", "b"])));
        assert_eq!(
            second.checkpoint.completed_steps,
            vec!["fetch", "pause", "transform"]
        );
    }

    #[tokio::test]
    async fn test_rerun_after_success_from_returned_store() {
        let f = fixture().await;
        let graph = graph("${fetch.result.data}");
        let first = f
            .engine
            .execute(&graph, RunRequest::new().with_input("repo", json!("acme/app")))
            .await
            .unwrap();
        assert!(first.success);
        assert!(Checkpoint::from_store(&first.store).unwrap().completed);

        let second = f
            .engine
            .execute(
                &graph,
                RunRequest::new()
                    .with_input("repo", json!("acme/app"))
                    .with_prior_store(first.store),
            )
            .await
            .unwrap();

        assert!(second.success);
        assert_eq!(f.fetch_calls.load(Ordering::SeqCst), 2);
        assert_eq!(second.telemetry.durations_ms.len(), 2);
        assert_eq!(second.checkpoint.completed_steps, vec!["fetch", "transform"]);
    }

    #[tokio::test]
    async fn test_rerun_after_success_with_execution_id() {
        let f = fixture().await;
        let graph = graph("${fetch.result.data}");
        let request = RunRequest::new()
            .with_execution_id("done")
            .with_input("repo", json!("acme/app"));

        let first = f.engine.execute(&graph, request.clone()).await.unwrap();
        assert!(first.success);
        assert!(f.dir.path().join("done.completed.json").exists());

        let second = f
            .engine
            .execute(&graph, request.with_prior_store(first.store))
            .await
            .unwrap();

        assert!(second.success);
        assert_eq!(f.fetch_calls.load(Ordering::SeqCst), 2);
        assert_eq!(second.telemetry.durations_ms.len(), 2);
    }

    #[tokio::test]
    async fn test_build_errors_surface_before_execution() {
        let f = fixture().await;
        let graph = GraphDescription::new("bad").with_step(StepSpec::new("x", "nope"));
        let err = f.engine.execute(&graph, RunRequest::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Build(_)));
    }
}
