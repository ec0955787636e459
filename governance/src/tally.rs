//! Tally & threshold evaluator.
//!
//! Closing a vote is two guarded steps under the proposal lock:
//! `Open → Tallying` (capturing the threshold snapshot), then
//! `Tallying → Approved | Rejected` with the persisted [`TallyResult`].
//! Both are committed separately, so a close interrupted between them is
//! finished by the next close or sweep using the captured snapshot.
//!
//! Once a result exists, closing again returns it and re-runs escrow
//! settlement, which is idempotent.

use crate::error::GovernanceError;
use crate::escrow::{EscrowManager, EscrowPurpose};
use crate::ledger::{GovernanceLedger, Stored};
use crate::locks::{ProposalGuard, ProposalLocks};
use crate::params::ParamsHandle;
use crate::proposal::{Proposal, ProposalStatus, RejectionReason, Tallies, TallyResult};
use crate::threshold::{ThresholdRegistry, ThresholdSnapshot};
use crate::vote::VoteChoice;
use agora_types::{Amount, Clock, ProposalId, Timestamp};
use std::sync::Arc;

/// Compute the outcome of `tallies`.
///
/// Abstain weight counts toward quorum but not toward the approval ratio.
pub fn evaluate(
    tallies: &Tallies,
    quorum_weight: Amount,
    threshold: ThresholdSnapshot,
    now: Timestamp,
) -> TallyResult {
    let quorum_met = tallies.total() >= quorum_weight;
    TallyResult {
        tallies: *tallies,
        quorum_weight,
        quorum_met,
        approved: quorum_met && threshold.is_met(tallies.yes, tallies.no),
        threshold,
        tallied_at: now,
    }
}

#[derive(Clone)]
pub struct TallyEvaluator {
    ledger: GovernanceLedger,
    escrow: EscrowManager,
    locks: Arc<ProposalLocks>,
    thresholds: Arc<ThresholdRegistry>,
    params: ParamsHandle,
    clock: Arc<dyn Clock>,
}

impl TallyEvaluator {
    pub fn new(
        ledger: GovernanceLedger,
        escrow: EscrowManager,
        locks: Arc<ProposalLocks>,
        thresholds: Arc<ThresholdRegistry>,
        params: ParamsHandle,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            escrow,
            locks,
            thresholds,
            params,
            clock,
        }
    }

    /// Close voting on `id` and return the outcome.
    ///
    /// Escrow settlement runs after the outcome is recorded. If it fails the
    /// call returns `SettlementIncomplete`; closing again re-runs the
    /// settlement, which skips escrows already settled, and returns the
    /// recorded result.
    pub async fn close(&self, id: &ProposalId) -> Result<TallyResult, GovernanceError> {
        let guard = self.locks.acquire(*id).await;
        let mut current = self.ledger.load_proposal(id)?;

        match (current.value.status, current.value.result.clone()) {
            (ProposalStatus::Draft | ProposalStatus::ComplianceReview, _) => {
                return Err(GovernanceError::ProposalNotOpen {
                    status: current.value.status,
                });
            }
            (ProposalStatus::Open, _) => {
                current = self.begin_tally(current)?;
            }
            (ProposalStatus::Tallying, _) => {}
            (ProposalStatus::Approved | ProposalStatus::Executed, Some(result)) => {
                self.settle(&guard, &current.value, &result)?;
                return Ok(result);
            }
            (ProposalStatus::Rejected, Some(result))
                if current.value.rejection == Some(RejectionReason::Vote) =>
            {
                self.settle(&guard, &current.value, &result)?;
                return Ok(result);
            }
            (status, _) => {
                return Err(GovernanceError::InvalidStateTransition {
                    from: status,
                    to: ProposalStatus::Tallying,
                });
            }
        }

        let result = self.finish_tally(current)?;
        let proposal = self.ledger.load_proposal(id).map_err(|e| {
            let status = if result.approved {
                ProposalStatus::Approved
            } else {
                ProposalStatus::Rejected
            };
            GovernanceError::settlement_incomplete(status, e)
        })?;
        self.settle(&guard, &proposal.value, &result)?;
        Ok(result)
    }

    /// Close every proposal whose voting deadline has passed, plus any tally
    /// left unfinished. Returns the outcomes that completed.
    pub async fn sweep_expired(&self) -> Result<Vec<(ProposalId, TallyResult)>, GovernanceError> {
        let now = self.clock.now();
        let due: Vec<ProposalId> = self
            .ledger
            .list_proposals()?
            .into_iter()
            .filter(|p| match p.status {
                ProposalStatus::Open => p.voting_deadline.is_some_and(|d| now >= d),
                ProposalStatus::Tallying => true,
                _ => false,
            })
            .map(|p| p.id)
            .collect();

        let mut closed = Vec::with_capacity(due.len());
        for id in due {
            match self.close(&id).await {
                Ok(result) => closed.push((id, result)),
                Err(e) => tracing::warn!(proposal = %id, error = %e, "sweep failed to close proposal"),
            }
        }
        if !closed.is_empty() {
            tracing::info!(count = closed.len(), "swept expired proposals");
        }
        Ok(closed)
    }

    fn begin_tally(&self, current: Stored<Proposal>) -> Result<Stored<Proposal>, GovernanceError> {
        let now = self.clock.now();
        let proposal = &current.value;
        let deadline = proposal.voting_deadline.unwrap_or(now);
        let params = self.params.get();
        let quorum_reached = proposal.tallies.total() >= params.minimum_quorum_weight();
        if now < deadline && !(params.early_close_on_quorum && quorum_reached) {
            return Err(GovernanceError::VotingInProgress { deadline });
        }

        let mut next = proposal.clone();
        next.transition(ProposalStatus::Tallying, now)?;
        let snapshot = self.thresholds.snapshot();
        next.threshold_snapshot = Some(snapshot);
        let stored = self.ledger.update_proposal(&current, &next)?;
        tracing::info!(
            proposal = %next.id,
            threshold_bps = snapshot.bps,
            threshold_version = snapshot.version,
            early = now < deadline,
            "tallying started"
        );
        Ok(stored)
    }

    fn finish_tally(&self, current: Stored<Proposal>) -> Result<TallyResult, GovernanceError> {
        let now = self.clock.now();
        let proposal = &current.value;
        let snapshot = match proposal.threshold_snapshot {
            Some(s) => s,
            None => self.thresholds.snapshot(),
        };
        let result = evaluate(
            &proposal.tallies,
            self.params.get().minimum_quorum_weight(),
            snapshot,
            now,
        );

        let mut next = proposal.clone();
        next.threshold_snapshot = Some(snapshot);
        if result.approved {
            next.transition(ProposalStatus::Approved, now)?;
        } else {
            next.transition(ProposalStatus::Rejected, now)?;
            next.rejection = Some(RejectionReason::Vote);
        }
        next.result = Some(result.clone());
        self.ledger.update_proposal(&current, &next)?;
        tracing::info!(
            proposal = %next.id,
            yes = %result.tallies.yes,
            no = %result.tallies.no,
            abstain = %result.tallies.abstain,
            voters = result.tallies.voters,
            quorum_met = result.quorum_met,
            approved = result.approved,
            "tally complete"
        );
        Ok(result)
    }

    /// Release or forfeit every voter escrow, and the fee on rejection.
    fn settle(
        &self,
        guard: &ProposalGuard,
        proposal: &Proposal,
        result: &TallyResult,
    ) -> Result<(), GovernanceError> {
        self.settle_escrows(guard, proposal, result)
            .map_err(|e| GovernanceError::settlement_incomplete(proposal.status, e))
    }

    fn settle_escrows(
        &self,
        guard: &ProposalGuard,
        proposal: &Proposal,
        result: &TallyResult,
    ) -> Result<(), GovernanceError> {
        let policy = self.params.get().settlement;
        for vote in self.ledger.list_votes(&proposal.id)? {
            let losing = match vote.choice {
                VoteChoice::Yes => !result.approved,
                VoteChoice::No => result.approved,
                VoteChoice::Abstain => false,
            };
            if policy.forfeit_losing_voter_stake && losing {
                self.escrow.forfeit(guard, &vote.voter, EscrowPurpose::VoteStake)?;
            } else {
                self.escrow.release(guard, &vote.voter, EscrowPurpose::VoteStake)?;
            }
        }
        if !result.approved {
            if policy.forfeit_fee_on_vote_rejection {
                self.escrow
                    .forfeit(guard, &proposal.proposer, EscrowPurpose::ProposerFee)?;
            } else {
                self.escrow
                    .release(guard, &proposal.proposer, EscrowPurpose::ProposerFee)?;
            }
        }
        Ok(())
    }
}
