//! Scope tree with hierarchical context.
//!
//! Scopes live in an arena and refer to their parent by index. Context
//! lookups walk from a scope towards the root and the nearest value wins.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CoreError, CoreResult};

/// Separator used when rendering scope paths.
pub const PATH_SEP: &str = "/";

/// Index of a scope inside a [`ConstructTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopeId(usize);

impl ScopeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for ScopeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A warning attached to a scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone)]
struct ScopeNode {
    id: String,
    parent: Option<ScopeId>,
    children: Vec<ScopeId>,
    context: BTreeMap<String, Value>,
    warnings: Vec<String>,
}

impl ScopeNode {
    fn new(id: impl Into<String>, parent: Option<ScopeId>) -> Self {
        Self {
            id: id.into(),
            parent,
            children: Vec::new(),
            context: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }
}

/// Arena of scopes. Index 0 is always the root.
#[derive(Debug, Clone)]
pub struct ConstructTree {
    nodes: Vec<ScopeNode>,
}

impl Default for ConstructTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ConstructTree {
    /// Create a tree holding only the root scope.
    pub fn new() -> Self {
        Self {
            nodes: vec![ScopeNode::new("", None)],
        }
    }

    /// The root scope.
    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    fn node(&self, scope: ScopeId) -> CoreResult<&ScopeNode> {
        self.nodes
            .get(scope.0)
            .ok_or(CoreError::UnknownScope(scope.0))
    }

    fn node_mut(&mut self, scope: ScopeId) -> CoreResult<&mut ScopeNode> {
        self.nodes
            .get_mut(scope.0)
            .ok_or(CoreError::UnknownScope(scope.0))
    }

    /// Add a child scope under `parent`.
    ///
    /// Ids must be non-empty, must not contain the path separator and must be
    /// unique among siblings.
    pub fn add_child(&mut self, parent: ScopeId, id: &str) -> CoreResult<ScopeId> {
        if id.is_empty() {
            return Err(CoreError::InvalidScopeId {
                id: id.to_string(),
                reason: "only the root scope may have an empty id".to_string(),
            });
        }
        if id.contains(PATH_SEP) {
            return Err(CoreError::InvalidScopeId {
                id: id.to_string(),
                reason: format!("ids cannot contain '{}'", PATH_SEP),
            });
        }

        let siblings = &self.node(parent)?.children;
        if siblings.iter().any(|c| self.nodes[c.0].id == id) {
            return Err(CoreError::DuplicateScope {
                parent: self.display_path(parent),
                id: id.to_string(),
            });
        }

        let child = ScopeId(self.nodes.len());
        self.nodes.push(ScopeNode::new(id, Some(parent)));
        self.node_mut(parent)?.children.push(child);
        debug!("Added scope {} at {}", child, self.display_path(child));
        Ok(child)
    }

    /// Local id of a scope.
    pub fn id(&self, scope: ScopeId) -> CoreResult<&str> {
        Ok(self.node(scope)?.id.as_str())
    }

    /// Parent of a scope, `None` for the root.
    pub fn parent(&self, scope: ScopeId) -> CoreResult<Option<ScopeId>> {
        Ok(self.node(scope)?.parent)
    }

    /// Direct children of a scope, in insertion order.
    pub fn children(&self, scope: ScopeId) -> CoreResult<&[ScopeId]> {
        Ok(&self.node(scope)?.children)
    }

    /// Scope ids from the root (exclusive) down to `scope` (inclusive).
    pub fn scopes(&self, scope: ScopeId) -> CoreResult<Vec<ScopeId>> {
        let mut chain = Vec::new();
        let mut current = Some(scope);
        while let Some(id) = current {
            let node = self.node(id)?;
            if node.parent.is_some() {
                chain.push(id);
            }
            current = node.parent;
        }
        chain.reverse();
        Ok(chain)
    }

    /// `/`-joined path of a scope. The root has an empty path.
    pub fn path(&self, scope: ScopeId) -> CoreResult<String> {
        let ids = self
            .scopes(scope)?
            .into_iter()
            .map(|s| self.nodes[s.0].id.as_str())
            .collect::<Vec<_>>();
        Ok(ids.join(PATH_SEP))
    }

    /// Path for error messages; unknown scopes render as their index.
    pub fn display_path(&self, scope: ScopeId) -> String {
        match self.path(scope) {
            Ok(path) if path.is_empty() => "<root>".to_string(),
            Ok(path) => path,
            Err(_) => scope.to_string(),
        }
    }

    /// Set a context value on a scope.
    ///
    /// Context can only be changed while the scope has no children.
    pub fn set_context(
        &mut self,
        scope: ScopeId,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) -> CoreResult<()> {
        let key = key.into();
        if !self.node(scope)?.children.is_empty() {
            return Err(CoreError::ContextLocked {
                path: self.display_path(scope),
                key,
            });
        }

        let value = value.into();
        debug!("Setting context {}={} on {}", key, value, self.display_path(scope));
        self.node_mut(scope)?.context.insert(key, value);
        Ok(())
    }

    /// Look up a context value, walking from `scope` up to the root.
    pub fn try_get_context(&self, scope: ScopeId, key: &str) -> Option<&Value> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let node = self.nodes.get(id.0)?;
            if let Some(value) = node.context.get(key) {
                return Some(value);
            }
            current = node.parent;
        }
        None
    }

    /// Context values defined directly on a scope.
    pub fn local_context(&self, scope: ScopeId) -> CoreResult<&BTreeMap<String, Value>> {
        Ok(&self.node(scope)?.context)
    }

    /// Attach a warning to a scope.
    pub fn add_warning(&mut self, scope: ScopeId, message: impl Into<String>) -> CoreResult<()> {
        let message = message.into();
        warn!("{}: {}", self.display_path(scope), message);
        self.node_mut(scope)?.warnings.push(message);
        Ok(())
    }

    /// All warnings in the tree, in scope creation order.
    pub fn warnings(&self) -> Vec<Annotation> {
        self.nodes
            .iter()
            .enumerate()
            .flat_map(|(index, node)| {
                let path = self.display_path(ScopeId(index));
                node.warnings.iter().map(move |message| Annotation {
                    path: path.clone(),
                    message: message.clone(),
                })
            })
            .collect()
    }

    /// Number of scopes including the root.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
