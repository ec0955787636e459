//! Balance service trait.

use crate::StoreError;
use agora_types::{Amount, Identity};

/// Debit/credit access to participants' available balances.
///
/// Each call is atomic on its own: a failed debit leaves the balance
/// untouched. Callers compose multi-step movements and compensate with the
/// inverse call when a later step fails.
pub trait AccountStore: Send + Sync {
    /// Current available (unlocked) balance.
    fn balance(&self, account: &Identity) -> Result<Amount, StoreError>;

    /// Remove `amount` from the available balance.
    ///
    /// Fails with [`StoreError::InsufficientBalance`] if funds are short.
    fn debit(&self, account: &Identity, amount: Amount) -> Result<(), StoreError>;

    /// Add `amount` to the available balance.
    fn credit(&self, account: &Identity, amount: Amount) -> Result<(), StoreError>;
}
