//! Participant identities (proposers, voters, administrators).

use crate::error::AgoraError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An opaque participant identity, e.g. an account name or address.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity(String);

impl Identity {
    /// Longest identity accepted by [`Identity::parse`].
    pub const MAX_LEN: usize = 128;

    /// Create an identity from a raw string without validation.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Create an identity, rejecting empty, oversized or whitespace-bearing input.
    pub fn parse(raw: impl Into<String>) -> Result<Self, AgoraError> {
        let id = Self(raw.into());
        if id.is_valid() {
            Ok(id)
        } else {
            Err(AgoraError::InvalidIdentity(id.0))
        }
    }

    /// Return the raw identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Validate that this identity is well-formed.
    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= Self::MAX_LEN
            && !self.0.chars().any(|c| c.is_whitespace() || c == '/')
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Identity {
    type Err = AgoraError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_plain_names() {
        assert_eq!(Identity::parse("alice").unwrap().as_str(), "alice");
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(Identity::parse("").is_err());
        assert!(Identity::parse("al ice").is_err());
        assert!(Identity::parse("a/b").is_err());
        assert!(Identity::parse("x".repeat(Identity::MAX_LEN + 1)).is_err());
    }
}
