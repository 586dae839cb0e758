// SPDX-License-Identifier: MIT

//! Storage-routing view of the shared store handed to one step invocation

use serde_json::{Map, Value};
use std::time::Instant;

use super::reserved::ReservedKey;
use super::store::SharedStore;
use crate::sdk::model::Meter;

/// How unqualified reads and writes are routed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    /// Reads and writes hit the store root
    #[default]
    Global,
    /// Writes go to `store[step_id]`; reads see that namespace merged over the root
    Namespaced,
}

/// Per-invocation bookkeeping shared by the layers of one step
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub started_at: Option<Instant>,
    pub before: Option<Value>,
    pub attempts: u32,
    pub fallback_used: bool,
}

/// The context passed to `prepare`, `finalize` and `on_failure`
///
/// Borrows the store for the duration of one invocation only; steps cannot
/// keep it past their own phase calls.
pub struct StepContext<'a> {
    step_id: String,
    params: Map<String, Value>,
    bindings: Map<String, Value>,
    store: &'a mut SharedStore,
    scope: Scope,
    meter: Meter,
    invocation: Invocation,
}

impl<'a> StepContext<'a> {
    pub fn new(
        step_id: impl Into<String>,
        params: Map<String, Value>,
        store: &'a mut SharedStore,
        meter: Meter,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            params,
            bindings: Map::new(),
            store,
            scope: Scope::Global,
            meter,
            invocation: Invocation::default(),
        }
    }

    /// Extra reference roots visible to substitution (e.g. a batch item alias)
    pub fn with_bindings(mut self, bindings: Map<String, Value>) -> Self {
        self.bindings = bindings;
        self
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    /// Declared parameters; resolved once substitution has run
    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    pub fn bindings(&self) -> &Map<String, Value> {
        &self.bindings
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn meter(&self) -> &Meter {
        &self.meter
    }

    /// Read-only view of the whole store
    pub fn store(&self) -> &SharedStore {
        self.store
    }

    /// Read a key through the current scope
    pub fn get(&self, key: &str) -> Option<&Value> {
        if ReservedKey::parse(key).is_some() {
            return self.store.get(key);
        }
        match self.scope {
            Scope::Global => self.store.get(key),
            Scope::Namespaced => self
                .store
                .namespace(&self.step_id)
                .and_then(|ns| ns.get(key))
                .or_else(|| self.store.get(key)),
        }
    }

    /// Write a key through the current scope
    pub fn insert(&mut self, key: &str, value: Value) {
        if ReservedKey::parse(key).is_some() {
            self.store.insert(key, value);
            return;
        }
        match self.scope {
            Scope::Global => self.store.insert(key, value),
            Scope::Namespaced => self.store.insert_namespaced(&self.step_id, key, value),
        }
    }

    /// Qualified read of another step's output; never rerouted
    pub fn output_of(&self, step_id: &str, key: &str) -> Option<&Value> {
        self.store.namespace(step_id).and_then(|ns| ns.get(key))
    }

    pub fn reserved(&self, key: ReservedKey) -> Option<&Value> {
        self.store.reserved(key)
    }

    pub fn update_reserved(&mut self, key: ReservedKey, value: Value) {
        self.store.update_reserved(key, value);
    }

    pub(crate) fn set_params(&mut self, params: Map<String, Value>) {
        self.params = params;
    }

    /// Returns the scope that was active before
    pub(crate) fn set_scope(&mut self, scope: Scope) -> Scope {
        std::mem::replace(&mut self.scope, scope)
    }

    pub(crate) fn invocation(&self) -> &Invocation {
        &self.invocation
    }

    pub(crate) fn invocation_mut(&mut self) -> &mut Invocation {
        &mut self.invocation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx<'a>(store: &'a mut SharedStore, step_id: &str) -> StepContext<'a> {
        StepContext::new(step_id, Map::new(), store, Meter::new(step_id))
    }

    #[test]
    fn test_global_scope_writes_root() {
        let mut store = SharedStore::new();
        ctx(&mut store, "a").insert("k", json!(1));
        assert_eq!(store.get("k"), Some(&json!(1)));
    }

    #[test]
    fn test_namespaced_writes_stay_in_own_namespace() {
        let mut store = SharedStore::new();
        {
            let mut a = ctx(&mut store, "a");
            a.set_scope(Scope::Namespaced);
            a.insert("k", json!("from a"));
            a.insert("b", json!("not b's namespace"));
        }
        {
            let mut b = ctx(&mut store, "b");
            b.set_scope(Scope::Namespaced);
            assert_eq!(b.get("k"), None);
            assert_eq!(b.output_of("a", "k"), Some(&json!("from a")));
            b.insert("k", json!("from b"));
        }

        assert_eq!(store.get_path("a.k"), Some(&json!("from a")));
        assert_eq!(store.get_path("b.k"), Some(&json!("from b")));
        assert_eq!(store.get_path("a.b"), Some(&json!("not b's namespace")));
    }

    #[test]
    fn test_namespaced_read_falls_back_to_root() {
        let mut store = SharedStore::new();
        store.insert("repo", json!("acme"));
        let mut a = ctx(&mut store, "a");
        a.set_scope(Scope::Namespaced);
        assert_eq!(a.get("repo"), Some(&json!("acme")));

        a.insert("repo", json!("shadow"));
        assert_eq!(a.get("repo"), Some(&json!("shadow")));
        assert_eq!(a.store().get("repo"), Some(&json!("acme")));
    }

    #[test]
    fn test_reserved_keys_bypass_namespace() {
        let mut store = SharedStore::new();
        {
            let mut a = ctx(&mut store, "a");
            a.set_scope(Scope::Namespaced);
            a.insert("__metrics__", json!({"a": 5}));
            assert_eq!(a.get("__metrics__"), Some(&json!({"a": 5})));
        }
        assert!(!store.has_namespace("a"));
        assert_eq!(store.reserved(ReservedKey::Metrics), Some(&json!({"a": 5})));
    }

    #[test]
    fn test_set_scope_returns_previous() {
        let mut store = SharedStore::new();
        let mut a = ctx(&mut store, "a");
        assert_eq!(a.set_scope(Scope::Namespaced), Scope::Global);
        assert_eq!(a.set_scope(Scope::Global), Scope::Namespaced);
    }
}
