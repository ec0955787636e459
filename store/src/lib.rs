//! Abstract storage traits for the Agora governance engine.
//!
//! Every storage backend (a production ledger, in-memory for testing) implements
//! these traits. The rest of the codebase depends only on the traits.

pub mod account;
pub mod error;
pub mod ledger;

pub use account::AccountStore;
pub use error::StoreError;
pub use ledger::{LedgerGateway, Precondition, RecordKey, WriteBatch, WriteOp};
