// SPDX-License-Identifier: MIT

//! Shared data bus threaded through one execution attempt

use serde_json::{Map, Value};
use std::collections::BTreeMap;

use super::reserved::{ReducerType, ReservedKey};

/// Mutable key/value bus with two address spaces
///
/// The root map holds workflow inputs and one object per executed step
/// (`store[step_id][output_key]`). The reserved region is keyed by
/// [`ReservedKey`] and only ever written through its reducer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharedStore {
    root: Map<String, Value>,
    reserved: BTreeMap<ReservedKey, Value>,
}

impl SharedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store seeded with workflow inputs at the root
    pub fn with_inputs(inputs: Map<String, Value>) -> Self {
        let mut store = Self::new();
        for (key, value) in inputs {
            store.insert(&key, value);
        }
        store
    }

    /// Get a value by key; reserved names read the reserved region
    pub fn get(&self, key: &str) -> Option<&Value> {
        match ReservedKey::parse(key) {
            Some(reserved) => self.reserved.get(&reserved),
            None => self.root.get(key),
        }
    }

    /// Write a value; reserved names go through their reducer
    pub fn insert(&mut self, key: &str, value: Value) {
        match ReservedKey::parse(key) {
            Some(reserved) => self.update_reserved(reserved, value),
            None => {
                self.root.insert(key.to_string(), value);
            }
        }
    }

    /// Get a nested value using dot notation (e.g., "fetch.result")
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let mut current = self.get(parts.next()?)?;
        for part in parts {
            current = match current {
                Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
                other => other.get(part)?,
            };
        }
        Some(current)
    }

    pub fn namespace(&self, step_id: &str) -> Option<&Map<String, Value>> {
        self.root.get(step_id).and_then(Value::as_object)
    }

    /// Write into a step's namespace, creating it on first write
    pub fn insert_namespaced(&mut self, step_id: &str, key: &str, value: Value) {
        let entry = self
            .root
            .entry(step_id.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        if let Value::Object(fields) = entry {
            fields.insert(key.to_string(), value);
        }
    }

    pub fn has_namespace(&self, step_id: &str) -> bool {
        self.namespace(step_id).is_some()
    }

    /// Remove a namespace and return what it held
    pub fn take_namespace(&mut self, step_id: &str) -> Option<Value> {
        self.root.remove(step_id)
    }

    /// Root-level keys (inputs and namespaces)
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.root.keys()
    }

    pub fn reserved(&self, key: ReservedKey) -> Option<&Value> {
        self.reserved.get(&key)
    }

    /// Apply the key's reducer
    pub fn update_reserved(&mut self, key: ReservedKey, value: Value) {
        match key.reducer() {
            ReducerType::Overwrite => {
                self.reserved.insert(key, value);
            }
            ReducerType::Append => {
                let current = self.reserved.entry(key).or_insert_with(|| key.initial());
                if let Value::Array(items) = current {
                    match value {
                        Value::Array(new_items) => items.extend(new_items),
                        other => items.push(other),
                    }
                }
            }
            ReducerType::Merge => {
                let current = self.reserved.entry(key).or_insert_with(|| key.initial());
                if let (Value::Object(current_obj), Value::Object(new_obj)) = (current, value) {
                    for (k, v) in new_obj {
                        current_obj.insert(k, v);
                    }
                }
            }
        }
    }

    /// Convert the whole store to a JSON object
    pub fn to_json(&self) -> Value {
        let mut out = self.root.clone();
        for (key, value) in &self.reserved {
            out.insert(key.as_str().to_string(), value.clone());
        }
        Value::Object(out)
    }

    /// Rebuild a store from its JSON form
    pub fn from_json(value: Value) -> Self {
        let mut store = Self::new();
        if let Value::Object(fields) = value {
            for (key, value) in fields {
                match ReservedKey::parse(&key) {
                    Some(reserved) => {
                        store.reserved.insert(reserved, value);
                    }
                    None => {
                        store.root.insert(key, value);
                    }
                }
            }
        }
        store
    }
}
