// SPDX-License-Identifier: MIT

//! Step catalog and factory registry
//!
//! The catalog maps a declared step type to its metadata (where the
//! implementation lives and which parameters it takes). The registry maps
//! that loader location to a factory that builds a `Step`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::engine::workflow::types::StepSpec;
use crate::sdk::error::{CatalogError, StepError};
use crate::sdk::step::Step;

/// A parameter or output declared by a step type
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    #[serde(rename = "type", default = "default_field_type")]
    pub field_type: String,
    #[serde(default)]
    pub required: bool,
}

fn default_field_type() -> String {
    "any".to_string()
}

impl FieldSpec {
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: default_field_type(),
            required: true,
        }
    }

    pub fn optional(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field_type: default_field_type(),
            required: false,
        }
    }
}

/// What the catalog knows about one step type
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StepMetadata {
    /// Key of the factory in the `StepRegistry`
    pub loader: String,
    #[serde(default)]
    pub params: Vec<FieldSpec>,
    #[serde(default)]
    pub outputs: Vec<FieldSpec>,
}

impl StepMetadata {
    pub fn new(loader: impl Into<String>) -> Self {
        Self {
            loader: loader.into(),
            params: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn with_param(mut self, field: FieldSpec) -> Self {
        self.params.push(field);
        self
    }

    pub fn with_output(mut self, field: FieldSpec) -> Self {
        self.outputs.push(field);
        self
    }
}

/// External collaborator resolving step types
#[async_trait]
pub trait StepCatalog: Send + Sync {
    async fn resolve(&self, type_name: &str) -> Result<StepMetadata, CatalogError>;
}

/// Catalog backed by a map, filled at startup
#[derive(Clone, Default)]
pub struct InMemoryCatalog {
    entries: Arc<RwLock<HashMap<String, StepMetadata>>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, type_name: impl Into<String>, metadata: StepMetadata) {
        let mut entries = self.entries.write().await;
        entries.insert(type_name.into(), metadata);
    }
}

#[async_trait]
impl StepCatalog for InMemoryCatalog {
    async fn resolve(&self, type_name: &str) -> Result<StepMetadata, CatalogError> {
        let entries = self.entries.read().await;
        let metadata = entries
            .get(type_name)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(type_name.to_string()))?;
        if metadata.loader.trim().is_empty() {
            return Err(CatalogError::Invalid {
                type_name: type_name.to_string(),
                reason: "empty loader location".to_string(),
            });
        }
        Ok(metadata)
    }
}

/// Builds a step instance from its spec
pub type StepFactory = Arc<dyn Fn(&StepSpec) -> Result<Arc<dyn Step>, StepError> + Send + Sync>;

/// Factories keyed by loader location
#[derive(Clone, Default)]
pub struct StepRegistry {
    factories: Arc<RwLock<HashMap<String, StepFactory>>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, loader: impl Into<String>, factory: StepFactory) {
        let mut factories = self.factories.write().await;
        factories.insert(loader.into(), factory);
    }

    /// Register a factory from a closure
    pub async fn register_fn<F>(&self, loader: impl Into<String>, factory: F)
    where
        F: Fn(&StepSpec) -> Result<Arc<dyn Step>, StepError> + Send + Sync + 'static,
    {
        self.register(loader, Arc::new(factory)).await;
    }

    pub async fn get(&self, loader: &str) -> Option<StepFactory> {
        let factories = self.factories.read().await;
        factories.get(loader).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::workflow::test_support::MockStep;
    use serde_json::json;

    #[tokio::test]
    async fn test_catalog_resolve() {
        let catalog = InMemoryCatalog::new();
        catalog
            .register(
                "http_get",
                StepMetadata::new("steps::http::Get").with_param(FieldSpec::required("url")),
            )
            .await;

        let metadata = catalog.resolve("http_get").await.unwrap();
        assert_eq!(metadata.loader, "steps::http::Get");
        assert!(metadata.params[0].required);

        let err = catalog.resolve("missing").await.unwrap_err();
        assert_eq!(err, CatalogError::NotFound("missing".to_string()));
    }

    #[tokio::test]
    async fn test_catalog_rejects_empty_loader() {
        let catalog = InMemoryCatalog::new();
        catalog.register("broken", StepMetadata::new("")).await;
        assert!(matches!(
            catalog.resolve("broken").await,
            Err(CatalogError::Invalid { .. })
        ));
    }

    #[tokio::test]
    async fn test_registry_register_and_get() {
        let registry = StepRegistry::new();
        registry
            .register_fn("mock", |_spec: &StepSpec| {
                Ok(Arc::new(MockStep::new(json!({"ok": true}))) as Arc<dyn Step>)
            })
            .await;

        let factory = registry.get("mock").await.unwrap();
        let step = factory(&StepSpec::new("a", "mock")).unwrap();
        assert_eq!(step.layer_name(), "step");
        assert!(registry.get("other").await.is_none());
    }

    #[test]
    fn test_metadata_deserialize() {
        let metadata: StepMetadata = serde_yaml::from_str(
            r#"
loader: steps::llm::Summarize
params:
  - name: prompt
    type: string
    required: true
outputs:
  - name: summary
"#,
        )
        .unwrap();
        assert_eq!(metadata.params[0].field_type, "string");
        assert_eq!(metadata.outputs[0].field_type, "any");
        assert!(!metadata.outputs[0].required);
    }
}
