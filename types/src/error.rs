//! Top-level error type shared across crates.

use thiserror::Error;

/// Common error type for parsing and validating shared types.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AgoraError {
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("invalid proposal id: {0}")]
    InvalidProposalId(String),

    #[error("{0}")]
    Other(String),
}
