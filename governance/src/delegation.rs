//! Delegated voting weight.
//!
//! A vote counts the stake its voter escrows. Any weight beyond that must be
//! vouched for by a [`DelegationResolver`] configured on the engine; a weight
//! claimed by the caller alone is never trusted.

use agora_types::{Amount, Identity, ProposalId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DelegationError {
    /// The delegation registry could not be consulted.
    #[error("{0}")]
    Unavailable(String),
}

/// Capability that resolves the weight a voter carries on a proposal.
#[async_trait]
pub trait DelegationResolver: Send + Sync {
    /// Weight of `voter` on `proposal` when escrowing `stake`.
    async fn resolve(
        &self,
        proposal: &ProposalId,
        voter: &Identity,
        stake: Amount,
    ) -> Result<Amount, DelegationError>;
}

/// In-memory table of weight delegated to representatives.
///
/// A representative's vote counts their own stake plus everything delegated
/// to them.
#[derive(Debug, Default)]
pub struct DelegationTable {
    delegated: RwLock<HashMap<Identity, Amount>>,
}

impl DelegationTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delegations<I>(delegations: I) -> Self
    where
        I: IntoIterator<Item = (Identity, Amount)>,
    {
        let table = Self::new();
        for (delegate, weight) in delegations {
            table.set(delegate, weight);
        }
        table
    }

    /// Set the weight delegated to `delegate`, replacing any previous value.
    pub fn set(&self, delegate: Identity, weight: Amount) {
        let mut delegated = self
            .delegated
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if weight.is_zero() {
            delegated.remove(&delegate);
        } else {
            delegated.insert(delegate, weight);
        }
    }

    pub fn delegated_to(&self, delegate: &Identity) -> Amount {
        self.delegated
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(delegate)
            .copied()
            .unwrap_or(Amount::ZERO)
    }
}

#[async_trait]
impl DelegationResolver for DelegationTable {
    async fn resolve(
        &self,
        _proposal: &ProposalId,
        voter: &Identity,
        stake: Amount,
    ) -> Result<Amount, DelegationError> {
        Ok(stake.saturating_add(self.delegated_to(voter)))
    }
}
