//! Error types for constructs.

use strata_core::CoreError;
use thiserror::Error;

/// Result type alias for construct operations.
pub type ConstructResult<T> = Result<T, ConstructError>;

/// Errors raised while defining a construct.
#[derive(Error, Debug)]
pub enum ConstructError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Invalid {construct} properties: {message}")]
    InvalidProps { construct: &'static str, message: String },
}

impl ConstructError {
    pub fn invalid_props(construct: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidProps {
            construct,
            message: message.into(),
        }
    }

    /// Whether the error is a property or validation failure.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidProps { .. } | Self::Core(CoreError::Validation { .. })
        )
    }
}
