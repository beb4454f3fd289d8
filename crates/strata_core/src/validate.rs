//! Property validation helpers shared by constructs.
//!
//! Every helper returns a [`ValidationError`] whose message names the
//! property, the rule and the offending value.

use regex::Regex;
use thiserror::Error;

/// A violated property rule. Attributed to a scope by the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

impl From<String> for ValidationError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for ValidationError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Result type alias for property checks.
pub type ValidationResult<T = ()> = Result<T, ValidationError>;

/// Fail when both options are set.
pub fn mutually_exclusive(first: &str, first_set: bool, second: &str, second_set: bool) -> ValidationResult {
    if first_set && second_set {
        return Err(ValidationError::new(format!(
            "'{}' and '{}' are not allowed to be defined together",
            first, second
        )));
    }
    Ok(())
}

/// Fail unless exactly one of the options is set.
pub fn exactly_one(first: &str, first_set: bool, second: &str, second_set: bool) -> ValidationResult {
    if first_set == second_set {
        return Err(ValidationError::new(format!(
            "Exactly one of '{}' or '{}' must be configured",
            first, second
        )));
    }
    Ok(())
}

/// Fail when `value` is outside `min..=max`.
pub fn in_range<T>(name: &str, value: T, min: T, max: T) -> ValidationResult
where
    T: PartialOrd + std::fmt::Display,
{
    if value < min || value > max {
        return Err(ValidationError::new(format!(
            "'{}' must be between {} and {}, got {}",
            name, min, max, value
        )));
    }
    Ok(())
}

/// Fail when `value` is longer than `max` characters.
pub fn max_length(name: &str, value: &str, max: usize) -> ValidationResult {
    let len = value.chars().count();
    if len > max {
        return Err(ValidationError::new(format!(
            "'{}' cannot be longer than {} characters, got: {}",
            name, max, len
        )));
    }
    Ok(())
}

/// Fail when the length of `value` is outside `min..=max` characters.
pub fn length_between(name: &str, value: &str, min: usize, max: usize) -> ValidationResult {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ValidationError::new(format!(
            "'{}' must be between {} and {} characters, got: {} characters",
            name, min, max, len
        )));
    }
    Ok(())
}

/// Fail when `value` does not match `pattern`.
///
/// `description` tells the user what the pattern allows.
pub fn matches_pattern(name: &str, value: &str, pattern: &str, description: &str) -> ValidationResult {
    let regex = Regex::new(pattern)
        .map_err(|e| ValidationError::new(format!("Invalid pattern for '{}': {}", name, e)))?;

    if !regex.is_match(value) {
        return Err(ValidationError::new(format!(
            "'{}' can only include {}, got: '{}'",
            name, description, value
        )));
    }
    Ok(())
}
