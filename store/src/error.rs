use agora_types::Amount;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("key not found: {0}")]
    NotFound(String),

    #[error("duplicate key: {0}")]
    Duplicate(String),

    /// A batch precondition did not hold; nothing was written.
    #[error("write conflict on key: {0}")]
    Conflict(String),

    #[error("insufficient balance for {account}: need {needed}, have {available}")]
    InsufficientBalance {
        account: String,
        needed: Amount,
        available: Amount,
    },

    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("database is corrupted: {0}")]
    Corruption(String),
}
