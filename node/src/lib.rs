//! Agora node: hosts the governance engine.
//!
//! The node:
//! - Loads TOML configuration
//! - Initialises structured logging
//! - Builds the engine over in-memory ledger and balance services
//! - Serves the RPC API
//! - Closes proposals whose voting deadline has passed
//! - Shuts down gracefully on SIGINT/SIGTERM

pub mod config;
pub mod error;
pub mod logging;
pub mod node;
pub mod shutdown;

pub use config::NodeConfig;
pub use error::NodeError;
pub use logging::{init_logging, LogFormat};
pub use node::AgoraNode;
pub use shutdown::ShutdownController;
