// SPDX-License-Identifier: MIT

//! Reserved store keys owned by the engine

use serde::{Deserialize, Serialize};

/// Keys in the reserved region; never namespaced in either direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ReservedKey {
    /// Checkpoint mirror
    Execution,
    /// Cost records
    LlmCalls,
    /// Per-step durations
    Metrics,
    /// Before/after snapshots
    Trace,
}

impl ReservedKey {
    pub const ALL: [ReservedKey; 4] = [
        ReservedKey::Execution,
        ReservedKey::LlmCalls,
        ReservedKey::Metrics,
        ReservedKey::Trace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReservedKey::Execution => "__execution__",
            ReservedKey::LlmCalls => "__llm_calls__",
            ReservedKey::Metrics => "__metrics__",
            ReservedKey::Trace => "__trace__",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }

    /// How writes to this key combine with what is already there
    pub fn reducer(&self) -> ReducerType {
        match self {
            ReservedKey::Execution => ReducerType::Overwrite,
            ReservedKey::LlmCalls | ReservedKey::Trace => ReducerType::Append,
            ReservedKey::Metrics => ReducerType::Merge,
        }
    }

    /// Empty value a reducer starts from
    pub fn initial(&self) -> serde_json::Value {
        match self.reducer() {
            ReducerType::Append => serde_json::Value::Array(Vec::new()),
            ReducerType::Merge => serde_json::Value::Object(serde_json::Map::new()),
            ReducerType::Overwrite => serde_json::Value::Null,
        }
    }
}

impl std::fmt::Display for ReservedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reducer types for merging values into the reserved region
#[derive(Debug, Clone, Copy, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReducerType {
    /// Replace the value (default)
    #[default]
    Overwrite,
    /// Append to array
    Append,
    /// Shallow merge objects
    Merge,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_names() {
        for key in ReservedKey::ALL {
            assert_eq!(ReservedKey::parse(key.as_str()), Some(key));
        }
        assert_eq!(ReservedKey::parse("fetch"), None);
        assert_eq!(ReservedKey::parse("__other__"), None);
    }

    #[test]
    fn test_reducers() {
        assert_eq!(ReservedKey::Execution.reducer(), ReducerType::Overwrite);
        assert_eq!(ReservedKey::LlmCalls.reducer(), ReducerType::Append);
        assert_eq!(ReservedKey::Trace.reducer(), ReducerType::Append);
        assert_eq!(ReservedKey::Metrics.reducer(), ReducerType::Merge);
    }
}
