// SPDX-License-Identifier: MIT

//! Resolves `${...}` references in a step's parameters just before `prepare`

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::engine::workflow::template::Resolver;
use crate::sdk::error::StepError;
use crate::sdk::model::Meter;
use crate::sdk::step::{Action, Step, StepContext};

/// Innermost layer; the only one that sees raw parameter strings
pub struct SubstitutionLayer {
    inner: Arc<dyn Step>,
    known_steps: Arc<BTreeSet<String>>,
}

impl SubstitutionLayer {
    pub fn new(inner: Arc<dyn Step>, known_steps: Arc<BTreeSet<String>>) -> Self {
        Self { inner, known_steps }
    }
}

#[async_trait]
impl Step for SubstitutionLayer {
    fn layer_name(&self) -> &'static str {
        "substitution"
    }

    fn inner(&self) -> Option<&Arc<dyn Step>> {
        Some(&self.inner)
    }

    async fn prepare(&self, ctx: &mut StepContext<'_>) -> Result<Value, StepError> {
        let resolved = {
            let resolver = Resolver::new(ctx.step_id(), ctx.store(), &self.known_steps)
                .with_bindings(ctx.bindings());
            resolver.resolve_params(ctx.params())?
        };
        ctx.set_params(resolved);
        self.inner.prepare(ctx).await
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
        self.inner.finalize(ctx, input, output).await
    }

    async fn on_failure(&self, ctx: &mut StepContext<'_>, error: &StepError) {
        self.inner.on_failure(ctx, error).await
    }
}
