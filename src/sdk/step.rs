// SPDX-License-Identifier: MIT

//! Step module - the lifecycle contract every unit of work implements
//!
//! A step exposes three phases:
//! - `prepare` reads the store and produces the input for `run`
//! - `run` performs the work (may be retried, may run past its deadline)
//! - `finalize` writes outputs back and returns the routing `Action`
//!
//! Engine layers implement the same trait and hold a typed reference to the
//! next layer, forwarding any phase they do not intercept.

use crate::sdk::error::StepError;
use crate::sdk::model::Meter;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

pub use crate::engine::workflow::state::{Scope, StepContext};

/// Routing label returned by `finalize`, selects the successor edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Action(String);

impl Action {
    pub const DEFAULT: &'static str = "default";

    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_default(&self) -> bool {
        self.0 == Self::DEFAULT
    }
}

impl Default for Action {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl From<&str> for Action {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Action {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Core lifecycle trait for all steps and the layers that wrap them
#[async_trait]
pub trait Step: Send + Sync {
    /// Name of this layer in a wrapped chain
    fn layer_name(&self) -> &'static str {
        "step"
    }

    /// The wrapped layer, if this is a wrapper
    fn inner(&self) -> Option<&Arc<dyn Step>> {
        None
    }

    /// Build the input for `run` from the (already resolved) parameters and the store
    async fn prepare(&self, ctx: &mut StepContext<'_>) -> Result<Value, StepError> {
        Ok(Value::Object(ctx.params().clone()))
    }

    /// Perform the work. Metered service calls must go through `meter`.
    async fn run(&self, input: Value, meter: &Meter) -> Result<Value, StepError>;

    /// Produce a degraded output of the same shape `run` returns.
    /// Called once retries are exhausted, or with a null input when `prepare`
    /// failed; the default re-raises.
    async fn fallback(
        &self,
        _input: Value,
        error: StepError,
        _meter: &Meter,
    ) -> Result<Value, StepError> {
        Err(error)
    }

    /// Write outputs to the store and pick the routing action
    async fn finalize(
        &self,
        ctx: &mut StepContext<'_>,
        _input: &Value,
        output: Value,
    ) -> Result<Action, StepError> {
        match output {
            Value::Object(fields) => {
                for (key, value) in fields {
                    ctx.insert(&key, value);
                }
            }
            Value::Null => {}
            other => ctx.insert("result", other),
        }
        Ok(Action::default())
    }

    /// Observe a failure that halted this step
    async fn on_failure(&self, _ctx: &mut StepContext<'_>, _error: &StepError) {}
}

/// Walk a wrapped step from the outermost layer inwards
pub fn layer_chain(step: &Arc<dyn Step>) -> Vec<&'static str> {
    let mut names = vec![step.layer_name()];
    let mut current = step.inner();
    while let Some(layer) = current {
        names.push(layer.layer_name());
        current = layer.inner();
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::workflow::state::SharedStore;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl Step for Echo {
        async fn run(&self, input: Value, _meter: &Meter) -> Result<Value, StepError> {
            Ok(input)
        }
    }

    #[test]
    fn test_action_default() {
        let action = Action::default();
        assert_eq!(action.as_str(), "default");
        assert!(action.is_default());
        assert_eq!(Action::from("retry").to_string(), "retry");
    }

    #[test]
    fn test_action_serializes_as_string() {
        let action = Action::from("approve");
        assert_eq!(serde_json::to_value(&action).unwrap(), json!("approve"));
    }

    #[tokio::test]
    async fn test_default_lifecycle() {
        let mut store = SharedStore::new();
        let meter = Meter::new("echo");
        let step = Echo;

        let mut params = serde_json::Map::new();
        params.insert("greeting".to_string(), json!("hi"));

        let mut ctx = StepContext::new("echo", params, &mut store, meter.clone());
        let input = step.prepare(&mut ctx).await.unwrap();
        assert_eq!(input, json!({"greeting": "hi"}));

        let output = step.run(input.clone(), &meter).await.unwrap();
        let action = step.finalize(&mut ctx, &input, output).await.unwrap();
        assert!(action.is_default());

        assert_eq!(store.get("greeting"), Some(&json!("hi")));
    }

    #[tokio::test]
    async fn test_default_finalize_wraps_scalar_output() {
        let mut store = SharedStore::new();
        let step = Echo;
        let mut ctx = StepContext::new("echo", serde_json::Map::new(), &mut store, Meter::new("echo"));
        step.finalize(&mut ctx, &Value::Null, json!(42)).await.unwrap();
        assert_eq!(store.get("result"), Some(&json!(42)));
    }

    #[tokio::test]
    async fn test_default_fallback_reraises() {
        let step = Echo;
        let err = step
            .fallback(Value::Null, StepError::failed("boom"), &Meter::new("echo"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_layer_chain_unwrapped() {
        let step: Arc<dyn Step> = Arc::new(Echo);
        assert_eq!(layer_chain(&step), vec!["step"]);
    }
}
