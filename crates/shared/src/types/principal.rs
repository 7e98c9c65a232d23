//! The principal a ledger is kept for.
//!
//! Principals arrive as free-form strings (account, business or user
//! identifiers). They are trimmed and must not be empty.

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Maximum principal length in bytes, after trimming.
pub const MAX_PRINCIPAL_LEN: usize = 128;

/// Trimmed, non-empty principal identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Principal(String);

impl Principal {
    /// Parses a principal from raw input.
    ///
    /// # Errors
    ///
    /// Returns an error if the trimmed input is empty or too long.
    pub fn parse(raw: &str) -> Result<Self, TypeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(TypeError::EmptyPrincipal);
        }
        if trimmed.len() > MAX_PRINCIPAL_LEN {
            return Err(TypeError::PrincipalTooLong {
                len: trimmed.len(),
                max: MAX_PRINCIPAL_LEN,
            });
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the principal as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Principal {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Principal> for String {
    fn from(value: Principal) -> Self {
        value.0
    }
}

impl std::fmt::Display for Principal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for Principal {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
