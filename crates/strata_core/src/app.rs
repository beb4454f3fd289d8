//! The app: scope tree, flag registry, deferred pipeline and resources.

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::context::ContextFile;
use crate::deferred::{DeferredPipeline, Owner, RenderInputs, ResolveInputs};
use crate::error::{CoreError, CoreResult};
use crate::flags::{FeatureFlags, FlagRegistry};
use crate::token::{Resolvable, Token};
use crate::tree::{Annotation, ConstructTree, ScopeId};
use crate::validate::{ValidationError, ValidationResult};

/// A resource registered by a construct, before rendering.
#[derive(Debug, Clone)]
struct ResourceEntry {
    scope: ScopeId,
    logical_id: String,
    resource_type: String,
    properties: Value,
}

/// A rendered template resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateResource {
    #[serde(rename = "Type")]
    pub resource_type: String,
    #[serde(rename = "Properties")]
    pub properties: Value,
    #[serde(rename = "Metadata")]
    pub metadata: BTreeMap<String, Value>,
}

/// The synthesized template.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, TemplateResource>,
    #[serde(rename = "Warnings", default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Annotation>,
}

impl Template {
    pub fn resource(&self, logical_id: &str) -> Option<&TemplateResource> {
        self.resources.get(logical_id)
    }

    pub fn to_json_pretty(&self) -> CoreResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Metadata key holding the scope path of a resource.
pub const PATH_METADATA: &str = "strata:path";

/// Root of a construct application.
#[derive(Debug)]
pub struct App {
    tree: ConstructTree,
    registry: FlagRegistry,
    pipeline: DeferredPipeline,
    resources: Vec<ResourceEntry>,
}

impl Default for App {
    fn default() -> Self {
        Self::new(FlagRegistry::current())
    }
}

impl App {
    /// Create an app using the given flag registry.
    pub fn new(registry: FlagRegistry) -> Self {
        Self {
            tree: ConstructTree::new(),
            registry,
            pipeline: DeferredPipeline::new(),
            resources: Vec::new(),
        }
    }

    /// Set a context value on the root scope.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> CoreResult<Self> {
        let root = self.tree.root();
        self.tree.set_context(root, key, value)?;
        Ok(self)
    }

    /// Apply every entry of a context file to the root scope.
    pub fn apply_context_file(&mut self, file: &ContextFile) -> CoreResult<()> {
        let root = self.tree.root();
        for (key, value) in &file.context {
            self.tree.set_context(root, key.clone(), value.clone())?;
        }
        Ok(())
    }

    pub fn root(&self) -> ScopeId {
        self.tree.root()
    }

    pub fn tree(&self) -> &ConstructTree {
        &self.tree
    }

    pub fn registry(&self) -> &FlagRegistry {
        &self.registry
    }

    pub fn pipeline(&self) -> &DeferredPipeline {
        &self.pipeline
    }

    /// Add a child scope.
    pub fn add_scope(&mut self, parent: ScopeId, id: &str) -> CoreResult<ScopeId> {
        self.tree.add_child(parent, id)
    }

    pub fn set_context(&mut self, scope: ScopeId, key: impl Into<String>, value: impl Into<Value>) -> CoreResult<()> {
        self.tree.set_context(scope, key, value)
    }

    pub fn path(&self, scope: ScopeId) -> CoreResult<String> {
        self.tree.path(scope)
    }

    /// Owner handle used to attribute errors to `scope`.
    pub fn owner(&self, scope: ScopeId) -> CoreResult<Owner> {
        self.tree.id(scope)?;
        Ok(Owner::new(scope, self.tree.display_path(scope)))
    }

    pub fn feature_flags(&self) -> FeatureFlags<'_> {
        FeatureFlags::of(&self.tree, &self.registry)
    }

    /// Resolve a feature flag for `scope`.
    pub fn is_enabled(&self, scope: ScopeId, flag: &str) -> CoreResult<Option<bool>> {
        self.feature_flags().is_enabled(scope, flag)
    }

    /// Attribute the outcome of a literal check to `scope`.
    pub fn ensure<T>(&self, scope: ScopeId, result: ValidationResult<T>) -> CoreResult<T> {
        result.map_err(|e| self.validation_error(scope, e.0))
    }

    /// A validation failure reported against `scope`.
    pub fn validation_error(&self, scope: ScopeId, message: impl Into<String>) -> CoreError {
        CoreError::Validation {
            path: self.tree.display_path(scope),
            message: message.into(),
        }
    }

    /// Attach a warning to `scope`.
    pub fn add_warning(&mut self, scope: ScopeId, message: impl Into<String>) -> CoreResult<()> {
        self.tree.add_warning(scope, message)
    }

    /// A placeholder supplied by name when synthesizing.
    pub fn parameter<T>(&mut self, name: impl Into<String>) -> Token<T> {
        self.pipeline.parameter(name)
    }

    /// A placeholder computed by `producer` when synthesizing.
    pub fn lazy<T, F>(&mut self, name: impl Into<String>, producer: F) -> Token<T>
    where
        T: Serialize,
        F: FnOnce() -> T + 'static,
    {
        self.pipeline.lazy(name, producer)
    }

    /// Run `callback` once every input is known. See [`DeferredPipeline::with_resolved`].
    pub fn with_resolved<I, F>(&mut self, scope: ScopeId, inputs: I, callback: F) -> CoreResult<()>
    where
        I: ResolveInputs,
        F: FnOnce(I::Output) -> Result<(), ValidationError> + 'static,
    {
        let owner = self.owner(scope)?;
        self.pipeline.with_resolved(owner, inputs, callback)
    }

    /// Derive a value from `inputs`. See [`DeferredPipeline::derive`].
    pub fn derive<I, U, F>(&mut self, scope: ScopeId, inputs: I, f: F) -> CoreResult<Resolvable<U>>
    where
        I: ResolveInputs,
        U: Serialize + 'static,
        F: FnOnce(I::Output) -> Result<U, ValidationError> + 'static,
    {
        let owner = self.owner(scope)?;
        self.pipeline.derive(owner, inputs, f)
    }

    /// Current value of a resolvable, `None` while pending.
    pub fn value_of<T>(&self, value: &Resolvable<T>) -> CoreResult<Option<T>>
    where
        T: DeserializeOwned + Clone,
    {
        self.pipeline.value_of(value)
    }

    /// Register a template resource owned by `scope` under its
    /// [`Self::unique_id`].
    pub fn add_resource(
        &mut self,
        scope: ScopeId,
        resource_type: impl Into<String>,
        properties: impl Serialize,
    ) -> CoreResult<String> {
        let logical_id = self.unique_id(scope)?;
        if let Some(existing) = self.resources.iter().find(|r| r.logical_id == logical_id) {
            return Err(CoreError::DuplicateLogicalId {
                logical_id,
                path: self.tree.display_path(existing.scope),
            });
        }

        let resource_type = resource_type.into();
        debug!("Adding {} as {}", resource_type, logical_id);
        self.resources.push(ResourceEntry {
            scope,
            logical_id: logical_id.clone(),
            resource_type,
            properties: serde_json::to_value(properties)?,
        });
        Ok(logical_id)
    }

    /// Identifier built from the alphanumeric characters of the scope path.
    pub fn unique_id(&self, scope: ScopeId) -> CoreResult<String> {
        let mut logical_id = String::new();
        for component in self.tree.scopes(scope)? {
            logical_id.extend(self.tree.id(component)?.chars().filter(|c| c.is_ascii_alphanumeric()));
        }
        if logical_id.is_empty() {
            return Err(CoreError::InvalidScopeId {
                id: self.tree.display_path(scope),
                reason: "resources need a path with at least one alphanumeric character".to_string(),
            });
        }
        Ok(logical_id)
    }

    /// Number of registered resources.
    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Run the resolution pass and render the template.
    pub fn synth(&mut self, inputs: &RenderInputs) -> CoreResult<Template> {
        info!(
            "Synthesizing {} resource(s), {} deferred check(s)",
            self.resources.len(),
            self.pipeline.pending_checks()
        );
        self.pipeline.resolve(inputs)?;

        let mut template = Template::default();
        for entry in &self.resources {
            let mut metadata = BTreeMap::new();
            metadata.insert(
                PATH_METADATA.to_string(),
                Value::String(self.tree.path(entry.scope)?),
            );
            template.resources.insert(
                entry.logical_id.clone(),
                TemplateResource {
                    resource_type: entry.resource_type.clone(),
                    properties: self.pipeline.render(&entry.properties)?,
                    metadata,
                },
            );
        }
        template.warnings = self.tree.warnings();
        Ok(template)
    }
}
