//! Voting engine: records one weighted vote per (proposal, voter).
//!
//! A cast holds the proposal lock for its whole duration. The vote row and the
//! proposal's running tallies are written in one conditional batch, so a
//! retried or concurrent cast can never count the same voter twice. If that
//! batch fails, the escrow movement made for it is undone.
//!
//! The counted weight is the escrowed stake unless a delegation resolver is
//! configured, in which case the resolver decides it.

use crate::delegation::{DelegationError, DelegationResolver};
use crate::error::GovernanceError;
use crate::escrow::{EscrowManager, EscrowPurpose};
use crate::ledger::{proposal_key, vote_key, GovernanceLedger, Stored};
use crate::locks::ProposalLocks;
use crate::proposal::{Proposal, ProposalStatus, Tallies};
use crate::vote::{Ballot, Vote};
use agora_store::WriteBatch;
use agora_types::{Amount, Clock, ProposalId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Acknowledgement of a cast.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteReceipt {
    pub vote: Vote,
    /// Whether this cast overwrote an earlier vote by the same voter.
    pub replaced: bool,
    /// Proposal tallies after the cast.
    pub tallies: Tallies,
}

#[derive(Clone)]
pub struct VotingEngine {
    ledger: GovernanceLedger,
    escrow: EscrowManager,
    locks: Arc<ProposalLocks>,
    clock: Arc<dyn Clock>,
    delegation: Option<Arc<dyn DelegationResolver>>,
    timeout: Duration,
}

impl VotingEngine {
    pub fn new(
        ledger: GovernanceLedger,
        escrow: EscrowManager,
        locks: Arc<ProposalLocks>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            escrow,
            locks,
            clock,
            delegation: None,
            timeout: crate::engine::DEFAULT_TIMEOUT,
        }
    }

    /// Count weight as reported by `resolver`, consulted with `timeout`.
    pub fn with_delegation(mut self, resolver: Arc<dyn DelegationResolver>, timeout: Duration) -> Self {
        self.delegation = Some(resolver);
        self.timeout = timeout;
        self
    }

    /// Cast or replace `ballot.voter`'s vote on `id`.
    ///
    /// Re-submitting an identical ballot is a no-op that returns the stored vote.
    pub async fn cast(&self, id: &ProposalId, ballot: Ballot) -> Result<VoteReceipt, GovernanceError> {
        if !ballot.voter.is_valid() {
            return Err(GovernanceError::InvalidRequest(format!(
                "malformed voter identity {:?}",
                ballot.voter.as_str()
            )));
        }
        let weight = self.counted_weight(id, &ballot).await?;
        let guard = self.locks.acquire(*id).await;
        let current = self.ledger.load_proposal(id)?;
        let proposal = &current.value;
        if proposal.status != ProposalStatus::Open {
            return Err(GovernanceError::ProposalNotOpen {
                status: proposal.status,
            });
        }
        let now = self.clock.now();
        let deadline = proposal
            .voting_deadline
            .ok_or(GovernanceError::ProposalNotOpen {
                status: proposal.status,
            })?;
        if now >= deadline {
            return Err(GovernanceError::DeadlinePassed { deadline, now });
        }

        let previous = self.ledger.load_vote(id, &ballot.voter)?;
        let mut vote = Vote::new(
            *id,
            ballot.voter.clone(),
            ballot.choice,
            ballot.stake,
            weight,
            now,
        );
        if let Some(prev) = &previous {
            if prev.value.same_ballot(&vote) {
                return Ok(VoteReceipt {
                    vote: prev.value.clone(),
                    replaced: false,
                    tallies: proposal.tallies,
                });
            }
            vote.revisions = prev.value.revisions + 1;
        }

        let change = match &previous {
            None => self
                .escrow
                .lock(&guard, &vote.voter, EscrowPurpose::VoteStake, vote.stake)?,
            Some(_) => self
                .escrow
                .adjust(&guard, &vote.voter, EscrowPurpose::VoteStake, vote.stake)?,
        };

        let mut next = proposal.clone();
        next.tallies.apply(previous.as_ref().map(|s| &s.value), &vote);
        next.updated_at = now;

        let written = self.persist(&current, &next, previous.as_ref(), &vote);
        if let Err(e) = written {
            if let Err(undo) = self.escrow.undo(&guard, change) {
                tracing::error!(proposal = %id, voter = %vote.voter, error = %undo, "failed to undo vote escrow");
            }
            return Err(e);
        }

        tracing::info!(
            proposal = %id,
            voter = %vote.voter,
            choice = %vote.choice,
            weight = %vote.weight,
            revision = vote.revisions,
            "vote recorded"
        );
        Ok(VoteReceipt {
            vote,
            replaced: previous.is_some(),
            tallies: next.tallies,
        })
    }

    /// Weight the ballot counts with.
    ///
    /// Without a resolver only escrowed stake backs weight, so a claim above
    /// the stake is refused. With one, a claim must match the resolved weight.
    async fn counted_weight(&self, id: &ProposalId, ballot: &Ballot) -> Result<Amount, GovernanceError> {
        let Some(resolver) = &self.delegation else {
            return match ballot.weight {
                Some(claimed) if claimed > ballot.stake => Err(GovernanceError::InvalidWeight {
                    claimed,
                    backed: ballot.stake,
                }),
                Some(claimed) => Ok(claimed),
                None => Ok(ballot.stake),
            };
        };
        let resolved = tokio::time::timeout(self.timeout, resolver.resolve(id, &ballot.voter, ballot.stake))
            .await
            .map_err(|_| {
                GovernanceError::DelegationUnavailable(format!(
                    "timed out after {}ms",
                    self.timeout.as_millis()
                ))
            })?
            .map_err(|DelegationError::Unavailable(reason)| GovernanceError::DelegationUnavailable(reason))?;
        match ballot.weight {
            Some(claimed) if claimed != resolved => Err(GovernanceError::InvalidWeight {
                claimed,
                backed: resolved,
            }),
            _ => Ok(resolved),
        }
    }

    fn persist(
        &self,
        current: &Stored<Proposal>,
        next: &Proposal,
        previous: Option<&Stored<Vote>>,
        vote: &Vote,
    ) -> Result<(), GovernanceError> {
        let mut batch = WriteBatch::new();
        GovernanceLedger::stage_update(&mut batch, proposal_key(&next.id), Some(current), next)?;
        GovernanceLedger::stage_update(
            &mut batch,
            vote_key(&vote.proposal_id, &vote.voter),
            previous,
            vote,
        )?;
        self.ledger.commit(batch)
    }
}
