//! Typed access to governance records on the ledger gateway.
//!
//! Records are bincode-encoded. Loads return a [`Stored`] carrying the exact
//! bytes read so that writes can be made conditional on nothing having
//! changed in between (compare-and-set).

use crate::compliance::ComplianceRecord;
use crate::error::GovernanceError;
use crate::escrow::{Escrow, EscrowPurpose};
use crate::proposal::Proposal;
use crate::vote::Vote;
use agora_store::{LedgerGateway, RecordKey, WriteBatch};
use agora_types::{Identity, ProposalId};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;

const PROPOSAL: &str = "proposal";
const VOTE: &str = "vote";
const ESCROW: &str = "escrow";
const COMPLIANCE: &str = "compliance";

/// A decoded record plus the raw bytes it was decoded from.
#[derive(Clone, Debug)]
pub struct Stored<T> {
    pub value: T,
    pub raw: Vec<u8>,
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, GovernanceError> {
    Ok(bincode::serialize(value)?)
}

pub fn decode<T: DeserializeOwned>(raw: &[u8]) -> Result<T, GovernanceError> {
    Ok(bincode::deserialize(raw)?)
}

pub fn proposal_key(id: &ProposalId) -> RecordKey {
    RecordKey::from_parts(&[PROPOSAL, &id.to_hex()])
}

pub fn vote_key(id: &ProposalId, voter: &Identity) -> RecordKey {
    RecordKey::from_parts(&[VOTE, &id.to_hex(), voter.as_str()])
}

pub fn escrow_key(id: &ProposalId, holder: &Identity, purpose: EscrowPurpose) -> RecordKey {
    RecordKey::from_parts(&[ESCROW, &id.to_hex(), holder.as_str(), purpose.as_str()])
}

pub fn compliance_key(id: &ProposalId) -> RecordKey {
    RecordKey::from_parts(&[COMPLIANCE, &id.to_hex()])
}

/// Governance view over an injected [`LedgerGateway`].
#[derive(Clone)]
pub struct GovernanceLedger {
    gateway: Arc<dyn LedgerGateway>,
}

impl GovernanceLedger {
    pub fn new(gateway: Arc<dyn LedgerGateway>) -> Self {
        Self { gateway }
    }

    fn load<T: DeserializeOwned>(&self, key: &RecordKey) -> Result<Option<Stored<T>>, GovernanceError> {
        match self.gateway.get(key)? {
            Some(raw) => Ok(Some(Stored {
                value: decode(&raw)?,
                raw,
            })),
            None => Ok(None),
        }
    }

    fn scan<T: DeserializeOwned>(&self, prefix: &RecordKey) -> Result<Vec<T>, GovernanceError> {
        self.gateway
            .scan_prefix(prefix)?
            .into_iter()
            .map(|(_, raw)| decode(&raw))
            .collect()
    }

    pub fn find_proposal(&self, id: &ProposalId) -> Result<Option<Stored<Proposal>>, GovernanceError> {
        self.load(&proposal_key(id))
    }

    /// Load a proposal, failing with `NotFound` if it does not exist.
    pub fn load_proposal(&self, id: &ProposalId) -> Result<Stored<Proposal>, GovernanceError> {
        self.find_proposal(id)?
            .ok_or_else(|| GovernanceError::NotFound(format!("proposal {id}")))
    }

    pub fn list_proposals(&self) -> Result<Vec<Proposal>, GovernanceError> {
        self.scan(&RecordKey::prefix(&[PROPOSAL]))
    }

    pub fn load_vote(
        &self,
        id: &ProposalId,
        voter: &Identity,
    ) -> Result<Option<Stored<Vote>>, GovernanceError> {
        self.load(&vote_key(id, voter))
    }

    pub fn list_votes(&self, id: &ProposalId) -> Result<Vec<Vote>, GovernanceError> {
        self.scan(&RecordKey::prefix(&[VOTE, &id.to_hex()]))
    }

    pub fn load_escrow(
        &self,
        id: &ProposalId,
        holder: &Identity,
        purpose: EscrowPurpose,
    ) -> Result<Option<Stored<Escrow>>, GovernanceError> {
        self.load(&escrow_key(id, holder, purpose))
    }

    pub fn list_escrows(&self, id: &ProposalId) -> Result<Vec<Escrow>, GovernanceError> {
        self.scan(&RecordKey::prefix(&[ESCROW, &id.to_hex()]))
    }

    pub fn load_compliance(
        &self,
        id: &ProposalId,
    ) -> Result<Option<Stored<Vec<ComplianceRecord>>>, GovernanceError> {
        self.load(&compliance_key(id))
    }

    /// Stage a conditional replacement of `current` (or creation, if `None`).
    pub fn stage_update<T: Serialize>(
        batch: &mut WriteBatch,
        key: RecordKey,
        current: Option<&Stored<T>>,
        next: &T,
    ) -> Result<Vec<u8>, GovernanceError> {
        let raw = encode(next)?;
        batch
            .expect_current(key.clone(), current.map(|s| s.raw.clone()))
            .put(key, raw.clone());
        Ok(raw)
    }

    pub fn commit(&self, batch: WriteBatch) -> Result<(), GovernanceError> {
        Ok(self.gateway.commit(batch)?)
    }

    /// Conditionally replace a proposal record with `next`.
    pub fn update_proposal(
        &self,
        current: &Stored<Proposal>,
        next: &Proposal,
    ) -> Result<Stored<Proposal>, GovernanceError> {
        let mut batch = WriteBatch::new();
        let raw = Self::stage_update(&mut batch, proposal_key(&next.id), Some(current), next)?;
        self.commit(batch)?;
        Ok(Stored {
            value: next.clone(),
            raw,
        })
    }
}
