// SPDX-License-Identifier: MIT

//! Reference resolution against a store snapshot

use serde_json::{Map, Value};
use std::collections::BTreeSet;

use super::ast::{PathSegment, Piece, Reference};
use super::parser;
use crate::engine::workflow::state::{ReservedKey, SharedStore};
use crate::sdk::error::ResolutionError;

/// Resolves `${...}` references for one step
///
/// Reference roots are looked up in this order: bindings (batch alias),
/// steps of the flow, then workflow inputs at the store root.
pub struct Resolver<'a> {
    step_id: &'a str,
    store: &'a SharedStore,
    known_steps: &'a BTreeSet<String>,
    bindings: Option<&'a Map<String, Value>>,
}

impl<'a> Resolver<'a> {
    pub fn new(step_id: &'a str, store: &'a SharedStore, known_steps: &'a BTreeSet<String>) -> Self {
        Self {
            step_id,
            store,
            known_steps,
            bindings: None,
        }
    }

    pub fn with_bindings(mut self, bindings: &'a Map<String, Value>) -> Self {
        self.bindings = Some(bindings);
        self
    }

    /// Resolve every parameter, preserving native types
    pub fn resolve_params(&self, params: &Map<String, Value>) -> Result<Map<String, Value>, ResolutionError> {
        params
            .iter()
            .map(|(key, value)| Ok((key.clone(), self.resolve_value(value)?)))
            .collect()
    }

    /// Resolve references anywhere inside a value
    pub fn resolve_value(&self, value: &Value) -> Result<Value, ResolutionError> {
        match value {
            Value::String(s) => self.resolve_str(s),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve_value(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(fields) => self.resolve_params(fields).map(Value::Object),
            other => Ok(other.clone()),
        }
    }

    /// A lone reference yields the native value; embedded ones are interpolated
    pub fn resolve_str(&self, input: &str) -> Result<Value, ResolutionError> {
        if !parser::contains_reference(input) {
            return Ok(Value::String(input.to_string()));
        }

        let template = parser::parse(input).map_err(|reason| ResolutionError::InvalidTemplate {
            step_id: self.step_id.to_string(),
            template: input.to_string(),
            reason,
        })?;

        if let Some(reference) = template.single_reference() {
            return self.lookup(reference);
        }

        let mut out = String::new();
        for piece in &template.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Reference(reference) => match self.lookup(reference)? {
                    Value::String(s) => out.push_str(&s),
                    other => out.push_str(&other.to_string()),
                },
            }
        }
        Ok(Value::String(out))
    }

    /// Resolve a batch `items` expression, which must produce an array
    pub fn resolve_items(&self, expression: &str) -> Result<Vec<Value>, ResolutionError> {
        match self.resolve_str(expression)? {
            Value::Array(items) => Ok(items),
            Value::String(s) => match serde_json::from_str::<Value>(&s) {
                Ok(Value::Array(items)) => Ok(items),
                _ => Err(self.not_an_array(expression, "a string")),
            },
            other => Err(self.not_an_array(expression, type_name(&other))),
        }
    }

    /// Look up one parsed reference
    pub fn lookup(&self, reference: &Reference) -> Result<Value, ResolutionError> {
        let root = reference.root.as_str();

        if let Some(value) = self.bindings.and_then(|b| b.get(root)) {
            return self.traverse(reference, value, 0);
        }

        if self.known_steps.contains(root) {
            return match self.store.get(root) {
                Some(value) => self.traverse(reference, value, 0),
                None => Err(ResolutionError::NotYetExecuted {
                    step_id: self.step_id.to_string(),
                    reference: reference.to_string(),
                    target: root.to_string(),
                }),
            };
        }

        if ReservedKey::parse(root).is_none() {
            if let Some(value) = self.store.get(root) {
                return self.traverse(reference, value, 0);
            }
        }

        let mut available: Vec<String> = self.store.keys().cloned().collect();
        if let Some(bindings) = self.bindings {
            available.extend(bindings.keys().cloned());
        }
        available.sort();
        available.dedup();

        Err(ResolutionError::UnknownReference {
            step_id: self.step_id.to_string(),
            reference: reference.to_string(),
            root: root.to_string(),
            available,
        })
    }

    fn traverse(&self, reference: &Reference, value: &Value, depth: usize) -> Result<Value, ResolutionError> {
        let Some(segment) = reference.path.get(depth) else {
            return Ok(value.clone());
        };

        // Step outputs are sometimes serialized JSON
        if let Value::String(s) = value {
            if let Some(parsed) = parse_embedded_json(s) {
                return self.traverse(reference, &parsed, depth);
            }
        }

        let prefix = reference.display_prefix(depth);
        match (segment, value) {
            (PathSegment::Key(key), Value::Object(fields)) => match fields.get(key) {
                Some(next) => self.traverse(reference, next, depth + 1),
                None => Err(ResolutionError::MissingPath {
                    step_id: self.step_id.to_string(),
                    reference: reference.to_string(),
                    path: reference.display_prefix(depth + 1),
                    prefix,
                    available: fields.keys().cloned().collect(),
                }),
            },
            (PathSegment::Index(index), Value::Array(items)) => match items.get(*index) {
                Some(next) => self.traverse(reference, next, depth + 1),
                None => Err(ResolutionError::IndexOutOfBounds {
                    step_id: self.step_id.to_string(),
                    reference: reference.to_string(),
                    prefix,
                    index: *index,
                    len: items.len(),
                }),
            },
            (_, other) => Err(ResolutionError::NotTraversable {
                step_id: self.step_id.to_string(),
                reference: reference.to_string(),
                prefix,
                found: type_name(other).to_string(),
            }),
        }
    }

    fn not_an_array(&self, expression: &str, found: &str) -> ResolutionError {
        ResolutionError::BatchItemsNotArray {
            step_id: self.step_id.to_string(),
            reference: expression.to_string(),
            found: found.to_string(),
        }
    }
}

fn parse_embedded_json(s: &str) -> Option<Value> {
    let trimmed = s.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return None;
    }
    serde_json::from_str::<Value>(s)
        .ok()
        .filter(|v| v.is_object() || v.is_array())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
