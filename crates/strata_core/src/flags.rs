//! Feature flags.
//!
//! Flags preserve legacy behavior for existing apps. The value of a flag for
//! a given scope comes from the scope's context (nearest ancestor wins) and
//! falls back to the registry default. Retired flags always behave as if
//! enabled and may no longer be set.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::context::truthy;
use crate::error::{CoreError, CoreResult};
use crate::tree::{ConstructTree, ScopeId};

/// Use the `NodegroupName` attribute instead of the resource reference for
/// the node group name.
pub const EKS_NODEGROUP_NAME: &str = "@strata/aws-eks:nodegroupNameAttribute";

/// Queues without an explicit encryption setting use SQS managed
/// server-side encryption.
pub const SQS_MANAGED_SSE_DEFAULT: &str = "@strata/aws-sqs:sqsManagedSseByDefault";

/// Cache policies clamp TTLs so that `min <= default <= max`.
pub const CLOUDFRONT_CLAMP_TTLS: &str = "@strata/aws-cloudfront:clampCachePolicyTtls";

/// Flags removed in the current major version.
pub const RETIRED_FLAGS: &[&str] = &[
    "@strata/core:enableStackNameDuplicates",
    "@strata/core:stackRelativeExports",
    "@strata/aws-kms:defaultKeyPolicies",
    "@strata/aws-s3:grantWriteWithoutAcl",
    "@strata/aws-ecs-patterns:removeDefaultDesiredCount",
];

/// Source of flag defaults and the retired flag set.
#[cfg_attr(test, mockall::automock)]
pub trait FlagDefaults {
    /// Default value for a flag, `None` when the registry has no opinion.
    fn default_for(&self, flag: &str) -> Option<bool>;

    /// Whether the flag has been retired.
    fn is_retired(&self, flag: &str) -> bool;
}

/// Definition of a single flag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagDefinition {
    pub name: String,
    #[serde(default)]
    pub summary: String,
    /// Value used when the flag is not set in context.
    #[serde(default)]
    pub default: Option<bool>,
    /// Value written into the context of newly initialized projects.
    #[serde(default)]
    pub recommended: Option<bool>,
    #[serde(default)]
    pub introduced_in: Option<String>,
}

impl FlagDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            summary: String::new(),
            default: None,
            recommended: None,
            introduced_in: None,
        }
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_default(mut self, default: bool) -> Self {
        self.default = Some(default);
        self
    }

    pub fn with_recommended(mut self, recommended: bool) -> Self {
        self.recommended = Some(recommended);
        self
    }

    pub fn introduced_in(mut self, version: impl Into<String>) -> Self {
        self.introduced_in = Some(version.into());
        self
    }
}

/// Table of flag definitions and retired flags.
///
/// The registry is plain data passed to [`FeatureFlags`]; nothing here is
/// process-wide.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRegistry {
    #[serde(default)]
    flags: Vec<FlagDefinition>,
    #[serde(default)]
    retired: BTreeSet<String>,
}

impl FlagRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The flags known to this version of the library.
    pub fn current() -> Self {
        let mut registry = Self::new()
            .with_flag(
                FlagDefinition::new(EKS_NODEGROUP_NAME)
                    .with_summary("Expose the node group name attribute instead of the resource reference")
                    .with_default(false)
                    .with_recommended(true)
                    .introduced_in("0.2.0"),
            )
            .with_flag(
                FlagDefinition::new(SQS_MANAGED_SSE_DEFAULT)
                    .with_summary("Queues without explicit encryption use SQS managed encryption")
                    .with_default(false)
                    .with_recommended(true)
                    .introduced_in("0.3.0"),
            )
            .with_flag(
                FlagDefinition::new(CLOUDFRONT_CLAMP_TTLS)
                    .with_summary("Clamp cache policy TTLs so that min <= default <= max")
                    .with_default(true)
                    .with_recommended(true)
                    .introduced_in("0.1.0"),
            );

        for flag in RETIRED_FLAGS {
            registry = registry.with_retired(*flag);
        }
        registry
    }

    /// Load a registry from a YAML file.
    pub fn load(path: &Path) -> CoreResult<Self> {
        debug!("Loading flag registry from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> CoreResult<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Add or replace a flag definition.
    pub fn with_flag(mut self, definition: FlagDefinition) -> Self {
        self.add_flag(definition);
        self
    }

    /// Mark a flag as retired.
    pub fn with_retired(mut self, flag: impl Into<String>) -> Self {
        self.retired.insert(flag.into());
        self
    }

    pub fn add_flag(&mut self, definition: FlagDefinition) {
        match self.flags.iter_mut().find(|f| f.name == definition.name) {
            Some(existing) => *existing = definition,
            None => self.flags.push(definition),
        }
    }

    /// Overlay another registry; its definitions replace ours by name.
    pub fn merge(&mut self, other: FlagRegistry) {
        for definition in other.flags {
            self.add_flag(definition);
        }
        self.retired.extend(other.retired);
    }

    pub fn get(&self, flag: &str) -> Option<&FlagDefinition> {
        self.flags.iter().find(|f| f.name == flag)
    }

    pub fn flags(&self) -> &[FlagDefinition] {
        &self.flags
    }

    pub fn retired(&self) -> impl Iterator<Item = &str> {
        self.retired.iter().map(String::as_str)
    }

    /// Context a newly initialized project should record.
    pub fn recommended_context(&self) -> BTreeMap<String, Value> {
        self.flags
            .iter()
            .filter(|f| !self.retired.contains(&f.name))
            .filter_map(|f| f.recommended.map(|v| (f.name.clone(), Value::Bool(v))))
            .collect()
    }
}

impl FlagDefaults for FlagRegistry {
    fn default_for(&self, flag: &str) -> Option<bool> {
        self.get(flag).and_then(|f| f.default)
    }

    fn is_retired(&self, flag: &str) -> bool {
        self.retired.contains(flag)
    }
}

/// Resolves feature flags for scopes of a tree.
pub struct FeatureFlags<'a> {
    tree: &'a ConstructTree,
    defaults: &'a dyn FlagDefaults,
}

impl<'a> FeatureFlags<'a> {
    pub fn of(tree: &'a ConstructTree, defaults: &'a dyn FlagDefaults) -> Self {
        Self { tree, defaults }
    }

    /// Check whether a flag is enabled for `scope`.
    ///
    /// Returns `None` when the flag is unset and the registry has no default;
    /// callers treat that as "keep the baseline behavior".
    pub fn is_enabled(&self, scope: ScopeId, flag: &str) -> CoreResult<Option<bool>> {
        let context = self.tree.try_get_context(scope, flag);

        if self.defaults.is_retired(flag) {
            if context.is_some() {
                return Err(CoreError::RetiredFlag {
                    flag: flag.to_string(),
                    path: self.tree.display_path(scope),
                });
            }
            return Ok(Some(true));
        }

        let enabled = match context {
            Some(value) => Some(truthy(value)),
            None => self.defaults.default_for(flag),
        };
        debug!("Flag {} at {} -> {:?}", flag, self.tree.display_path(scope), enabled);
        Ok(enabled)
    }

    /// Like [`Self::is_enabled`], mapping "no opinion" to `baseline`.
    pub fn is_enabled_or(&self, scope: ScopeId, flag: &str, baseline: bool) -> CoreResult<bool> {
        Ok(self.is_enabled(scope, flag)?.unwrap_or(baseline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use serde_json::json;

    #[test]
    fn test_unset_flag_uses_registry_default() {
        let tree = ConstructTree::new();
        let registry = FlagRegistry::current();
        let flags = FeatureFlags::of(&tree, &registry);

        assert_eq!(flags.is_enabled(tree.root(), EKS_NODEGROUP_NAME).unwrap(), Some(false));
        assert_eq!(flags.is_enabled(tree.root(), CLOUDFRONT_CLAMP_TTLS).unwrap(), Some(true));
    }

    #[test]
    fn test_unknown_flag_has_no_opinion() {
        let tree = ConstructTree::new();
        let registry = FlagRegistry::current();
        let flags = FeatureFlags::of(&tree, &registry);

        assert_eq!(flags.is_enabled(tree.root(), "@strata/unknown:flag").unwrap(), None);
        assert!(flags.is_enabled_or(tree.root(), "@strata/unknown:flag", true).unwrap());
        assert!(!flags.is_enabled_or(tree.root(), "@strata/unknown:flag", false).unwrap());
    }

    #[test]
    fn test_parent_context_reaches_child() {
        let mut tree = ConstructTree::new();
        let parent = tree.add_child(tree.root(), "Parent").unwrap();
        tree.set_context(parent, "flagA", true).unwrap();
        let child = tree.add_child(parent, "Child").unwrap();

        let registry = FlagRegistry::new();
        let flags = FeatureFlags::of(&tree, &registry);
        assert_eq!(flags.is_enabled(child, "flagA").unwrap(), Some(true));
    }

    #[test]
    fn test_nearest_ancestor_wins() {
        let mut tree = ConstructTree::new();
        let root = tree.root();
        tree.set_context(root, EKS_NODEGROUP_NAME, true).unwrap();
        let stack = tree.add_child(root, "Stack").unwrap();
        tree.set_context(stack, EKS_NODEGROUP_NAME, 0).unwrap();
        let leaf = tree.add_child(stack, "Leaf").unwrap();

        let registry = FlagRegistry::current();
        let flags = FeatureFlags::of(&tree, &registry);
        assert_eq!(flags.is_enabled(leaf, EKS_NODEGROUP_NAME).unwrap(), Some(false));
        assert_eq!(flags.is_enabled(root, EKS_NODEGROUP_NAME).unwrap(), Some(true));
    }

    #[test]
    fn test_string_context_is_truthy() {
        let mut tree = ConstructTree::new();
        let root = tree.root();
        tree.set_context(root, "flag", "false").unwrap();

        let registry = FlagRegistry::new();
        let flags = FeatureFlags::of(&tree, &registry);
        assert_eq!(flags.is_enabled(root, "flag").unwrap(), Some(true));
    }

    #[test]
    fn test_retired_flag_unset_is_enabled() {
        let tree = ConstructTree::new();
        let registry = FlagRegistry::new()
            .with_flag(FlagDefinition::new("old-flag").with_default(false))
            .with_retired("old-flag");
        let flags = FeatureFlags::of(&tree, &registry);

        assert_eq!(flags.is_enabled(tree.root(), "old-flag").unwrap(), Some(true));
    }

    #[test]
    fn test_retired_flag_set_in_context_fails() {
        let mut tree = ConstructTree::new();
        let root = tree.root();
        tree.set_context(root, "old-flag", false).unwrap();
        let child = tree.add_child(root, "Child").unwrap();

        let registry = FlagRegistry::new().with_retired("old-flag");
        let flags = FeatureFlags::of(&tree, &registry);

        let err = flags.is_enabled(child, "old-flag").unwrap_err();
        assert!(matches!(err, CoreError::RetiredFlag { .. }));
        assert!(err.to_string().contains("'old-flag'"));
    }

    #[test]
    fn test_resolver_consults_injected_defaults() {
        let mut defaults = MockFlagDefaults::new();
        defaults.expect_is_retired().with(eq("custom")).return_const(false);
        defaults
            .expect_default_for()
            .with(eq("custom"))
            .times(1)
            .return_const(Some(true));

        let tree = ConstructTree::new();
        let flags = FeatureFlags::of(&tree, &defaults);
        assert_eq!(flags.is_enabled(tree.root(), "custom").unwrap(), Some(true));
    }

    #[test]
    fn test_context_value_skips_defaults() {
        let mut defaults = MockFlagDefaults::new();
        defaults.expect_is_retired().return_const(false);
        defaults.expect_default_for().never();

        let mut tree = ConstructTree::new();
        let root = tree.root();
        tree.set_context(root, "custom", json!(false)).unwrap();

        let flags = FeatureFlags::of(&tree, &defaults);
        assert_eq!(flags.is_enabled(root, "custom").unwrap(), Some(false));
    }

    #[test]
    fn test_registry_from_yaml() {
        let yaml = r#"
flags:
  - name: "@acme/service:newBehavior"
    summary: "Use the new behavior"
    default: false
    recommended: true
retired:
  - "@acme/service:ancient"
"#;
        let registry = FlagRegistry::from_yaml_str(yaml).unwrap();
        assert_eq!(registry.default_for("@acme/service:newBehavior"), Some(false));
        assert!(registry.is_retired("@acme/service:ancient"));
        assert_eq!(
            registry.recommended_context().get("@acme/service:newBehavior"),
            Some(&json!(true))
        );
    }

    #[test]
    fn test_registry_merge_overrides_by_name() {
        let mut registry = FlagRegistry::current();
        registry.merge(
            FlagRegistry::new()
                .with_flag(FlagDefinition::new(EKS_NODEGROUP_NAME).with_default(true))
                .with_retired("@acme/old"),
        );

        assert_eq!(registry.default_for(EKS_NODEGROUP_NAME), Some(true));
        assert!(registry.is_retired("@acme/old"));
        assert!(registry.is_retired(RETIRED_FLAGS[0]));
    }

    #[test]
    fn test_recommended_context_skips_retired() {
        let registry = FlagRegistry::new()
            .with_flag(FlagDefinition::new("a").with_recommended(true))
            .with_flag(FlagDefinition::new("b").with_recommended(false))
            .with_flag(FlagDefinition::new("c"))
            .with_flag(FlagDefinition::new("d").with_recommended(true))
            .with_retired("d");

        let context = registry.recommended_context();
        assert_eq!(context.len(), 2);
        assert_eq!(context.get("b"), Some(&json!(false)));
    }
}
