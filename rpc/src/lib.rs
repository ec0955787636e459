//! HTTP/JSON API for the Agora governance engine.
//!
//! Provides endpoints for:
//! - Proposal submission, lookup and listing
//! - Compliance review and history
//! - Voting, vote and escrow queries
//! - Closing, execution and administrative revert
//! - Threshold administration
//! - Prometheus metrics

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod server;

pub use error::RpcError;
pub use metrics::GovernanceMetrics;
pub use server::{router, AppState, RpcServer};
