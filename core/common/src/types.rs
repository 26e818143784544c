//! Common types used throughout Lockbox.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of an [`Identifier`], in characters.
///
/// Storage names append a prefix and a policy suffix, and some device
/// filesystems cap names at 127 characters.
pub const MAX_IDENTIFIER_LENGTH: usize = 100;

/// Filename-safe name of a stored secret.
///
/// Only ASCII alphanumerics, `-` and `_` are accepted, so an identifier can
/// never be blank, contain whitespace or control characters, or escape its
/// storage directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Identifier(String);

impl Identifier {
    /// Create a new identifier.
    ///
    /// # Errors
    /// - Returns `InvalidArgument` if `id` is blank, longer than
    ///   [`MAX_IDENTIFIER_LENGTH`], or contains anything other than
    ///   `[A-Za-z0-9_-]`
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(crate::Error::InvalidArgument(
                "identifier cannot be blank".to_string(),
            ));
        }
        if id.chars().count() > MAX_IDENTIFIER_LENGTH {
            return Err(crate::Error::InvalidArgument(format!(
                "identifier cannot be more than {} characters",
                MAX_IDENTIFIER_LENGTH
            )));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(crate::Error::InvalidArgument(
                "identifier can only contain alphanumeric characters, underscores and hyphens"
                    .to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Check an identifier without constructing it.
    pub fn is_valid(id: &str) -> bool {
        Self::new(id).is_ok()
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Identifier {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<Identifier> for String {
    fn from(id: Identifier) -> Self {
        id.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
