// SPDX-License-Identifier: MIT

//! Engine configuration
//!
//! Read from a YAML file, from `STEPFLOW_*` environment variables, or both
//! (environment wins). Every field has a default.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::engine::workflow::graph::ExecutorConfig;
use crate::engine::workflow::layers::InstrumentationConfig;
use crate::engine::workflow::retry::RetryConfig;
use crate::sdk::error::EngineError;

pub const ENV_CHECKPOINT_DIR: &str = "STEPFLOW_CHECKPOINT_DIR";
pub const ENV_TRACE: &str = "STEPFLOW_TRACE";
pub const ENV_MAX_STEPS: &str = "STEPFLOW_MAX_STEPS";
pub const ENV_STEP_TIMEOUT_MS: &str = "STEPFLOW_STEP_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Where `<execution-id>.json` checkpoints are written
    #[serde(default = "default_checkpoint_dir")]
    pub checkpoint_dir: PathBuf,

    /// Record before/after snapshots in `__trace__`
    #[serde(default)]
    pub trace: bool,

    /// Safety limit on step invocations per run
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Applied to steps that declare no retry policy
    #[serde(default)]
    pub default_retry: RetryConfig,

    /// Applied to steps that declare no deadline
    #[serde(default)]
    pub default_timeout_ms: Option<u64>,

    /// Max characters kept per string in trace snapshots
    #[serde(default = "default_trace_value_limit")]
    pub trace_value_limit: usize,
}

fn default_checkpoint_dir() -> PathBuf {
    PathBuf::from(".stepflow/checkpoints")
}

fn default_max_steps() -> usize {
    100
}

fn default_trace_value_limit() -> usize {
    2000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            checkpoint_dir: default_checkpoint_dir(),
            trace: false,
            max_steps: default_max_steps(),
            default_retry: RetryConfig::default(),
            default_timeout_ms: None,
            trace_value_limit: default_trace_value_limit(),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by the process environment
    pub fn from_env() -> Result<Self, EngineError> {
        Self::default().merge_env(|key| std::env::var(key).ok())
    }

    pub fn from_yaml(content: &str) -> Result<Self, EngineError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Apply `STEPFLOW_*` overrides found through `lookup`
    pub fn merge_env<F>(mut self, lookup: F) -> Result<Self, EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_CHECKPOINT_DIR) {
            self.checkpoint_dir = PathBuf::from(dir);
        }
        if let Some(trace) = lookup(ENV_TRACE) {
            self.trace = parse_flag(ENV_TRACE, &trace)?;
        }
        if let Some(max_steps) = lookup(ENV_MAX_STEPS) {
            self.max_steps = parse_number(ENV_MAX_STEPS, &max_steps)?;
        }
        if let Some(timeout) = lookup(ENV_STEP_TIMEOUT_MS) {
            self.default_timeout_ms = Some(parse_number(ENV_STEP_TIMEOUT_MS, &timeout)?);
        }
        Ok(self)
    }

    pub fn executor(&self) -> ExecutorConfig {
        ExecutorConfig {
            max_steps: self.max_steps,
            default_retry: self.default_retry.clone(),
            default_timeout_ms: self.default_timeout_ms,
        }
    }

    pub fn instrumentation(&self) -> InstrumentationConfig {
        InstrumentationConfig {
            trace: self.trace,
            value_limit: self.trace_value_limit,
            sink: None,
        }
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool, EngineError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(EngineError::config(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}

fn parse_number<T: FromStr>(key: &str, value: &str) -> Result<T, EngineError> {
    value.trim().parse().map_err(|_| {
        EngineError::config(format!("{} must be a non-negative integer, got '{}'", key, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.checkpoint_dir, PathBuf::from(".stepflow/checkpoints"));
        assert!(!config.trace);
        assert_eq!(config.max_steps, 100);
        assert_eq!(config.default_timeout_ms, None);
    }

    #[test]
    fn test_from_yaml_with_partial_fields() {
        let yaml = r#"
trace: true
max_steps: 25
default_retry:
  max_retries: 3
"#;
        let config = EngineConfig::from_yaml(yaml).unwrap();
        assert!(config.trace);
        assert_eq!(config.max_steps, 25);
        assert_eq!(config.default_retry.max_retries, 3);
        assert_eq!(config.default_retry.initial_delay_ms, 100);
        assert_eq!(config.trace_value_limit, 2000);
    }

    #[test]
    fn test_env_overrides() {
        let vars = env(&[
            (ENV_CHECKPOINT_DIR, "/tmp/cp"),
            (ENV_TRACE, "yes"),
            (ENV_MAX_STEPS, "7"),
            (ENV_STEP_TIMEOUT_MS, "1500"),
        ]);
        let config = EngineConfig::default()
            .merge_env(|k| vars.get(k).cloned())
            .unwrap();
        assert_eq!(config.checkpoint_dir, PathBuf::from("/tmp/cp"));
        assert!(config.trace);
        assert_eq!(config.max_steps, 7);
        assert_eq!(config.executor().default_timeout_ms, Some(1500));
    }

    #[test]
    fn test_bad_env_value_is_config_error() {
        let vars = env(&[(ENV_MAX_STEPS, "lots")]);
        let err = EngineConfig::default()
            .merge_env(|k| vars.get(k).cloned())
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        assert!(err.to_string().contains(ENV_MAX_STEPS));
    }
}
