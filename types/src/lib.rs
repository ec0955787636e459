//! Fundamental types for the Agora governance engine.
//!
//! This crate defines the core types shared across every other crate in the workspace:
//! identities, proposal ids, amounts, timestamps and the clock capability.

pub mod amount;
pub mod error;
pub mod hash;
pub mod identity;
pub mod time;

pub use amount::Amount;
pub use error::AgoraError;
pub use hash::ProposalId;
pub use identity::Identity;
pub use time::{Clock, SystemClock, Timestamp};
