// SPDX-License-Identifier: MIT

//! Retry with exponential backoff for a step's `run` phase

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the initial attempt)
    pub max_retries: u32,
    /// Delay before the first retry
    pub initial_delay_ms: u64,
    /// Cap on the delay between retries
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff (2.0 doubles the delay each time)
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay_ms: 100,
            max_delay_ms: 10_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Total number of `run` attempts, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay to wait after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.max(1.0).powi(exponent);
        let capped = base.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_runs_once() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts(), 1);
    }

    #[test]
    fn test_exponential_backoff() {
        let config = RetryConfig::default()
            .with_max_retries(4)
            .with_initial_delay(Duration::from_millis(100));

        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig::default()
            .with_initial_delay(Duration::from_millis(1000))
            .with_max_delay(Duration::from_millis(1500));
        assert_eq!(config.delay_for(5), Duration::from_millis(1500));
    }

    #[test]
    fn test_constant_delay() {
        let config = RetryConfig::default().with_backoff_multiplier(1.0);
        assert_eq!(config.delay_for(1), config.delay_for(4));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: RetryConfig = serde_yaml::from_str("max_retries: 2").unwrap();
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.initial_delay_ms, 100);
    }
}
