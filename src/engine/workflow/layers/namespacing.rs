// SPDX-License-Identifier: MIT

//! Routes a step's unqualified reads and writes into its own namespace

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::sdk::error::StepError;
use crate::sdk::model::Meter;
use crate::sdk::step::{Action, Scope, Step, StepContext};

/// Pure storage-routing layer; validates nothing
pub struct NamespacingLayer {
    inner: Arc<dyn Step>,
}

impl NamespacingLayer {
    pub fn new(inner: Arc<dyn Step>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl Step for NamespacingLayer {
    fn layer_name(&self) -> &'static str {
        "namespacing"
    }

    fn inner(&self) -> Option<&Arc<dyn Step>> {
        Some(&self.inner)
    }

    async fn prepare(&self, ctx: &mut StepContext<'_>) -> Result<Value, StepError> {
        let previous = ctx.set_scope(Scope::Namespaced);
        let result = self.inner.prepare(ctx).await;
        ctx.set_scope(previous);
        result
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
        let previous = ctx.set_scope(Scope::Namespaced);
        let result = self.inner.finalize(ctx, input, output).await;
        ctx.set_scope(previous);
        result
    }

    async fn on_failure(&self, ctx: &mut StepContext<'_>, error: &StepError) {
        let previous = ctx.set_scope(Scope::Namespaced);
        self.inner.on_failure(ctx, error).await;
        ctx.set_scope(previous);
    }
}
