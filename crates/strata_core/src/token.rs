//! Placeholders for values that are only known during rendering.

use std::marker::PhantomData;

use regex::Regex;
use serde::{Serialize, Serializer};

/// Pattern matching a token marker inside a string.
pub(crate) const TOKEN_MARKER_PATTERN: &str = r"\$\{Token\[(\d+)\]\}";

pub(crate) fn marker_regex() -> Result<Regex, regex::Error> {
    Regex::new(TOKEN_MARKER_PATTERN)
}

/// Identity of a token within its pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TokenId(pub(crate) usize);

impl TokenId {
    pub fn index(&self) -> usize {
        self.0
    }

    /// The string embedded into templates in place of the value.
    pub fn marker(&self) -> String {
        format!("${{Token[{}]}}", self.0)
    }
}

impl std::fmt::Display for TokenId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Token[{}]", self.0)
    }
}

/// A typed handle to a deferred value.
pub struct Token<T> {
    id: TokenId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Token<T> {
    pub(crate) fn new(id: TokenId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    pub fn id(&self) -> TokenId {
        self.id
    }
}

impl<T> Clone for Token<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Token<T> {}

impl<T> PartialEq for Token<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T> Eq for Token<T> {}

impl<T> std::fmt::Debug for Token<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl<T> Serialize for Token<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.id.marker())
    }
}

/// A value that is either known now or stands in for one resolved later.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolvable<T> {
    Literal(T),
    Deferred(Token<T>),
}

impl<T> Resolvable<T> {
    /// Whether the value is a placeholder.
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Self::Deferred(_))
    }

    pub fn as_literal(&self) -> Option<&T> {
        match self {
            Self::Literal(value) => Some(value),
            Self::Deferred(_) => None,
        }
    }

    pub fn token_id(&self) -> Option<TokenId> {
        match self {
            Self::Literal(_) => None,
            Self::Deferred(token) => Some(token.id()),
        }
    }
}

impl<T> From<Token<T>> for Resolvable<T> {
    fn from(token: Token<T>) -> Self {
        Self::Deferred(token)
    }
}

macro_rules! impl_from_literal {
    ($($ty:ty),+) => {
        $(
            impl From<$ty> for Resolvable<$ty> {
                fn from(value: $ty) -> Self {
                    Self::Literal(value)
                }
            }
        )+
    };
}

impl_from_literal!(bool, u32, u64, i64, String);

impl From<&str> for Resolvable<String> {
    fn from(value: &str) -> Self {
        Self::Literal(value.to_string())
    }
}

impl<T: Serialize> Serialize for Resolvable<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Literal(value) => value.serialize(serializer),
            Self::Deferred(token) => token.serialize(serializer),
        }
    }
}
