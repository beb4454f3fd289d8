//! Error types for the core module.

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur while configuring or synthesizing an app.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error(
        "Unsupported feature flag '{flag}' (set at '{path}'). This flag existed in the previous \
         major version but has been removed. Behavior now matches the flag being enabled."
    )]
    RetiredFlag { flag: String, path: String },

    #[error("Validation failed at '{path}': {message}")]
    Validation { path: String, message: String },

    #[error("There is already a scope named '{id}' under '{parent}'")]
    DuplicateScope { parent: String, id: String },

    #[error("Invalid scope id '{id}': {reason}")]
    InvalidScopeId { id: String, reason: String },

    #[error("Cannot set context key '{key}' on '{path}' after children have been added")]
    ContextLocked { path: String, key: String },

    #[error("Unknown scope: {0}")]
    UnknownScope(usize),

    #[error("Token {token} ({name}) could not be resolved: {reason}")]
    UnresolvedToken {
        token: usize,
        name: String,
        reason: String,
    },

    #[error("Token {token} ({name}) has an unexpected value: {message}")]
    TokenType {
        token: usize,
        name: String,
        message: String,
    },

    #[error("Logical id '{logical_id}' is already used by '{path}'")]
    DuplicateLogicalId { logical_id: String, path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid pattern: {0}")]
    Pattern(#[from] regex::Error),
}

impl CoreError {
    /// Whether the error is a configuration fault the user must correct
    /// (as opposed to an IO or parsing problem).
    pub fn is_configuration(&self) -> bool {
        !matches!(self, Self::Io(_) | Self::Json(_) | Self::Yaml(_) | Self::Pattern(_))
    }
}
