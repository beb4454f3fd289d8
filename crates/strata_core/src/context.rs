//! Context values: coercion, command-line parsing and the project context file.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::error::{CoreError, CoreResult};

/// Default name of the project context file.
pub const CONTEXT_FILE: &str = "strata.json";

/// Truthy coercion of a stored context value.
///
/// Strings are not re-parsed: `"false"` is a non-empty string and therefore
/// true. Writers that want a boolean must store a JSON boolean.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Parse a `key=value` pair given on the command line.
///
/// The value is stored as a JSON literal when it parses as one (`true`,
/// `false`, numbers, quoted strings), otherwise as a plain string.
pub fn parse_context_arg(arg: &str) -> CoreResult<(String, Value)> {
    let (key, raw) = arg.split_once('=').ok_or_else(|| CoreError::Validation {
        path: "<command line>".to_string(),
        message: format!("context must be given as key=value, got: '{}'", arg),
    })?;

    let key = key.trim();
    if key.is_empty() {
        return Err(CoreError::Validation {
            path: "<command line>".to_string(),
            message: format!("context key cannot be empty, got: '{}'", arg),
        });
    }

    let value = match serde_json::from_str::<Value>(raw) {
        Ok(v @ (Value::Bool(_) | Value::Number(_) | Value::String(_) | Value::Null)) => v,
        _ => Value::String(raw.to_string()),
    };
    Ok((key.to_string(), value))
}

/// Project context file.
///
/// ```json
/// { "context": { "@strata/aws-eks:nodegroupNameAttribute": true } }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ContextFile {
    #[serde(default)]
    pub context: BTreeMap<String, Value>,
}

impl ContextFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a context file from disk.
    pub fn load(path: &Path) -> CoreResult<Self> {
        debug!("Loading context file {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> CoreResult<Self> {
        Ok(serde_json::from_str(content)?)
    }

    /// Write the context file, pretty-printed.
    pub fn save(&self, path: &Path) -> CoreResult<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Merge `other` on top of this file; keys in `other` win.
    pub fn merge(&mut self, other: ContextFile) {
        self.context.extend(other.context);
    }
}
