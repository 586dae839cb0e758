// SPDX-License-Identifier: MIT

//! Model module - metered access to LLM-like services
//!
//! Steps never call a provider directly. They wrap it in a [`MeteredModel`]
//! bound to the [`Meter`] handed to `run`, so every call's usage and latency
//! lands in the invocation's ledger regardless of which layer is active.

use crate::sdk::error::StepError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Configuration for model generation
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub max_output_tokens: Option<u32>,
}

/// A message in the conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Content {
    pub role: String,
    pub text: String,
}

impl Content {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            text: text.into(),
        }
    }
}

/// Units consumed by one call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_units: u64,
    pub output_units: u64,
}

/// Result of one model call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,
    pub usage: Usage,
}

/// Core trait for metered model implementations
#[async_trait]
pub trait Model: Send + Sync {
    fn name(&self) -> &str;

    async fn generate(
        &self,
        history: &[Content],
        config: Option<&GenerationConfig>,
    ) -> Result<Completion, StepError>;
}

/// One metered call as seen by the ledger
#[derive(Debug, Clone)]
pub struct UsageEntry {
    pub model: String,
    pub usage: Usage,
    pub duration: Duration,
    /// 1-based run attempt that made the call
    pub attempt: u32,
}

/// Per-invocation usage ledger, shared by every attempt of one step
#[derive(Debug, Clone)]
pub struct Meter {
    step_id: String,
    attempt: u32,
    ledger: Arc<Mutex<Vec<UsageEntry>>>,
}

impl Meter {
    pub fn new(step_id: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            attempt: 1,
            ledger: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Same ledger, tagged with a different attempt number
    pub fn for_attempt(&self, attempt: u32) -> Self {
        Self {
            step_id: self.step_id.clone(),
            attempt,
            ledger: Arc::clone(&self.ledger),
        }
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn record(&self, model: &str, usage: Usage, duration: Duration) {
        self.ledger.lock().push(UsageEntry {
            model: model.to_string(),
            usage,
            duration,
            attempt: self.attempt,
        });
    }

    pub fn entries(&self) -> Vec<UsageEntry> {
        self.ledger.lock().clone()
    }

    /// Take every entry recorded so far, leaving the ledger empty
    pub fn drain(&self) -> Vec<UsageEntry> {
        std::mem::take(&mut *self.ledger.lock())
    }

    /// Wrap a model so its calls are recorded here
    pub fn wrap(&self, model: Arc<dyn Model>) -> MeteredModel {
        MeteredModel::new(model, self.clone())
    }
}

/// Decorator that times every call and records its usage
pub struct MeteredModel {
    inner: Arc<dyn Model>,
    meter: Meter,
}

impl MeteredModel {
    pub fn new(inner: Arc<dyn Model>, meter: Meter) -> Self {
        Self { inner, meter }
    }
}

#[async_trait]
impl Model for MeteredModel {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(
        &self,
        history: &[Content],
        config: Option<&GenerationConfig>,
    ) -> Result<Completion, StepError> {
        let started = Instant::now();
        let result = self.inner.generate(history, config).await;
        if let Ok(completion) = &result {
            self.meter
                .record(self.inner.name(), completion.usage, started.elapsed());
        }
        result
    }
}
