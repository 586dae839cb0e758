// SPDX-License-Identifier: MIT

//! Telemetry extracted from a run: durations, cost records and trace
//!
//! Everything here is derived from the reserved region of the store, so a
//! caller holding only the final store can rebuild it.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::engine::workflow::state::{ReservedKey, SharedStore};
use crate::sdk::step::Action;

// ============================================================================
// REDACTION
// ============================================================================

/// Key names that look like credentials
static CREDENTIAL_KEY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(api[_-]?key|token|secret|passw(or)?d|credential|authorization|^auth$|^auth[_-]|[_-]auth$)",
    )
    .expect("credential pattern is valid")
});

const REDACTED: &str = "[REDACTED]";
const MAX_ARRAY_ITEMS: usize = 50;

pub fn is_credential_key(key: &str) -> bool {
    CREDENTIAL_KEY.is_match(key)
}

/// Redact credential-like keys and truncate oversized values
pub fn sanitize(value: &Value, limit: usize) -> Value {
    match value {
        Value::Object(fields) => {
            let mut out = Map::new();
            for (key, v) in fields {
                if is_credential_key(key) {
                    out.insert(key.clone(), Value::String(REDACTED.to_string()));
                } else {
                    out.insert(key.clone(), sanitize(v, limit));
                }
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            let mut out: Vec<Value> = items
                .iter()
                .take(MAX_ARRAY_ITEMS)
                .map(|v| sanitize(v, limit))
                .collect();
            if items.len() > MAX_ARRAY_ITEMS {
                out.push(Value::String(format!(
                    "...[{} more items]",
                    items.len() - MAX_ARRAY_ITEMS
                )));
            }
            Value::Array(out)
        }
        Value::String(s) if s.chars().count() > limit => {
            let kept: String = s.chars().take(limit).collect();
            let dropped = s.chars().count() - limit;
            Value::String(format!("{}...[truncated {} chars]", kept, dropped))
        }
        other => other.clone(),
    }
}

/// Sanitized copy of the store, without the trace buffer itself
pub fn snapshot(store: &SharedStore, limit: usize) -> Value {
    let mut json = store.to_json();
    if let Value::Object(fields) = &mut json {
        fields.remove(ReservedKey::Trace.as_str());
    }
    sanitize(&json, limit)
}

// ============================================================================
// RECORDS
// ============================================================================

/// One metered call attributed to a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostRecord {
    pub step_id: String,
    pub model: String,
    pub input_units: u64,
    pub output_units: u64,
    pub duration_ms: u64,
    /// The call was made by a retry attempt, not the first one
    pub is_retry_origin: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Ok,
    Fallback,
    Failed,
}

/// Before/after record of one step invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub step_id: String,
    pub status: TraceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<Action>,
    pub attempts: u32,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What the telemetry sink receives after every step
#[derive(Debug, Clone)]
pub struct StepEvent<'a> {
    pub step_id: &'a str,
    pub status: TraceStatus,
    pub action: Option<&'a Action>,
    pub attempts: u32,
    pub duration_ms: u64,
    pub costs: &'a [CostRecord],
}

/// Consumer of per-step telemetry (CLI, metrics exporter, ...)
pub trait TelemetrySink: Send + Sync {
    fn on_step(&self, event: &StepEvent<'_>);
}

/// Sink that writes one log line per step
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn on_step(&self, event: &StepEvent<'_>) {
        let units: u64 = event
            .costs
            .iter()
            .map(|c| c.input_units + c.output_units)
            .sum();
        log::info!(
            "step {} {:?} in {}ms ({} attempt(s), action={}, {} metered call(s), {} units)",
            event.step_id,
            event.status,
            event.duration_ms,
            event.attempts,
            event.action.map(Action::as_str).unwrap_or("-"),
            event.costs.len(),
            units
        );
    }
}

// ============================================================================
// AGGREGATE
// ============================================================================

/// Telemetry of one run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Telemetry {
    pub durations_ms: BTreeMap<String, u64>,
    pub costs: Vec<CostRecord>,
    pub trace: Vec<TraceEntry>,
}

impl Telemetry {
    /// Rebuild telemetry from the reserved region
    pub fn from_store(store: &SharedStore) -> Self {
        let durations_ms = store
            .reserved(ReservedKey::Metrics)
            .and_then(Value::as_object)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|(k, v)| v.as_u64().map(|ms| (k.clone(), ms)))
                    .collect()
            })
            .unwrap_or_default();

        Self {
            durations_ms,
            costs: decode_list(store, ReservedKey::LlmCalls),
            trace: decode_list(store, ReservedKey::Trace),
        }
    }

    pub fn total_units(&self) -> u64 {
        self.costs
            .iter()
            .map(|c| c.input_units + c.output_units)
            .sum()
    }
}

fn decode_list<T: serde::de::DeserializeOwned>(store: &SharedStore, key: ReservedKey) -> Vec<T> {
    store
        .reserved(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match serde_json::from_value(item.clone()) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        log::warn!("Skipping malformed {} entry: {}", key, e);
                        None
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}
