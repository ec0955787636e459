//! Compliance gate: policy checks a proposal must pass before it opens for voting.
//!
//! The policy runs outside the proposal lock and under a caller-supplied
//! timeout. Its verdict is then applied under the lock against a fresh read of
//! the proposal, so a concurrent revert or second review is never overwritten.
//!
//! History is append-only except that a retry after an `Unavailable` outcome
//! replaces that entry instead of stacking another one.

use crate::error::GovernanceError;
use crate::escrow::{EscrowManager, EscrowPurpose};
use crate::ledger::{compliance_key, proposal_key, GovernanceLedger, Stored};
use crate::locks::{ProposalGuard, ProposalLocks};
use crate::params::ParamsHandle;
use crate::proposal::{Proposal, ProposalDetails, ProposalStatus, RejectionReason};
use agora_store::WriteBatch;
use agora_types::{Amount, Clock, Identity, ProposalId, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComplianceOutcome {
    Passed,
    Failed,
    /// The policy could not be evaluated (timeout or backend failure).
    Unavailable,
}

/// One entry in a proposal's compliance history.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceRecord {
    pub proposal_id: ProposalId,
    pub checked_at: Timestamp,
    pub passed: bool,
    pub outcome: ComplianceOutcome,
    pub notes: Vec<String>,
    /// 1-based count of reviews run for this proposal, retries included.
    pub attempt: u32,
}

/// What the policy sees.
#[derive(Clone, Debug)]
pub struct ComplianceSubject {
    pub proposal_id: ProposalId,
    pub proposer: Identity,
    pub details: ProposalDetails,
    pub fee: Amount,
}

impl From<&Proposal> for ComplianceSubject {
    fn from(p: &Proposal) -> Self {
        Self {
            proposal_id: p.id,
            proposer: p.proposer.clone(),
            details: p.details.clone(),
            fee: p.fee,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyVerdict {
    pub passed: bool,
    pub notes: Vec<String>,
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("policy backend unavailable: {0}")]
    Unavailable(String),
}

/// A compliance policy.
///
/// Returning `Err` means the policy could not decide; an explicit failure is
/// `Ok` with `passed == false`.
#[async_trait]
pub trait CompliancePolicy: Send + Sync {
    async fn check(&self, subject: &ComplianceSubject) -> Result<PolicyVerdict, PolicyError>;
}

/// Fee sufficiency, proposer blacklist and content well-formedness.
pub struct StandardPolicy {
    params: ParamsHandle,
    blacklist: HashSet<Identity>,
}

impl StandardPolicy {
    pub fn new(params: ParamsHandle, blacklist: impl IntoIterator<Item = Identity>) -> Self {
        Self {
            params,
            blacklist: blacklist.into_iter().collect(),
        }
    }
}

#[async_trait]
impl CompliancePolicy for StandardPolicy {
    async fn check(&self, subject: &ComplianceSubject) -> Result<PolicyVerdict, PolicyError> {
        let params = self.params.get();
        let mut notes = Vec::new();

        if subject.fee < params.minimum_fee() {
            notes.push(format!(
                "fee {} below minimum {}",
                subject.fee,
                params.minimum_fee()
            ));
        }
        if self.blacklist.contains(&subject.proposer) {
            notes.push(format!("proposer {} is blacklisted", subject.proposer));
        }
        if !subject.proposer.is_valid() {
            notes.push("proposer identity is malformed".to_string());
        }
        let details = &subject.details;
        if details.kind.trim().is_empty() {
            notes.push("proposal kind is empty".to_string());
        }
        if details.title.trim().is_empty() {
            notes.push("title is empty".to_string());
        } else if details.title.chars().count() > params.max_title_len {
            notes.push(format!("title longer than {} characters", params.max_title_len));
        }
        if details.description.chars().count() > params.max_description_len {
            notes.push(format!(
                "description longer than {} characters",
                params.max_description_len
            ));
        }

        let passed = notes.is_empty();
        if passed {
            notes.push("all checks passed".to_string());
        }
        Ok(PolicyVerdict { passed, notes })
    }
}

/// Result of a passing review.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub passed: bool,
    pub notes: Vec<String>,
    pub voting_deadline: Option<Timestamp>,
}

#[derive(Clone)]
pub struct ComplianceGate {
    ledger: GovernanceLedger,
    escrow: EscrowManager,
    locks: Arc<ProposalLocks>,
    policy: Arc<dyn CompliancePolicy>,
    params: ParamsHandle,
    clock: Arc<dyn Clock>,
}

impl ComplianceGate {
    pub fn new(
        ledger: GovernanceLedger,
        escrow: EscrowManager,
        locks: Arc<ProposalLocks>,
        policy: Arc<dyn CompliancePolicy>,
        params: ParamsHandle,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            escrow,
            locks,
            policy,
            params,
            clock,
        }
    }

    /// Full compliance history, oldest first.
    pub fn history(&self, id: &ProposalId) -> Result<Vec<ComplianceRecord>, GovernanceError> {
        self.ledger.load_proposal(id)?;
        Ok(self
            .ledger
            .load_compliance(id)?
            .map(|s| s.value)
            .unwrap_or_default())
    }

    /// Run the policy and move the proposal to `Open` or `Rejected`.
    ///
    /// Repeating a review that already completed returns the same outcome.
    pub async fn review(
        &self,
        id: &ProposalId,
        timeout: Duration,
    ) -> Result<ComplianceReport, GovernanceError> {
        let snapshot = self.ledger.load_proposal(id)?.value;
        match snapshot.status {
            ProposalStatus::Draft | ProposalStatus::ComplianceReview => {}
            _ => {
                let guard = self.locks.acquire(*id).await;
                return self.completed_review(&guard);
            }
        }

        let subject = ComplianceSubject::from(&snapshot);
        let verdict = match tokio::time::timeout(timeout, self.policy.check(&subject)).await {
            Ok(Ok(verdict)) => Ok(verdict),
            Ok(Err(PolicyError::Unavailable(reason))) => Err(reason),
            Err(_) => Err(format!("policy timed out after {}ms", timeout.as_millis())),
        };

        let guard = self.locks.acquire(*id).await;
        let current = self.ledger.load_proposal(id)?;
        if !matches!(
            current.value.status,
            ProposalStatus::Draft | ProposalStatus::ComplianceReview
        ) {
            // Another review finished (or an admin reverted) while the policy ran.
            return self.completed_review(&guard);
        }
        let now = self.clock.now();
        let history = self.ledger.load_compliance(id)?;

        match verdict {
            Err(reason) => {
                tracing::warn!(proposal = %id, %reason, "compliance policy unavailable");
                let record = self.record(id, history.as_ref(), ComplianceOutcome::Unavailable, vec![reason.clone()], now);
                let mut batch = WriteBatch::new();
                stage_history(&mut batch, id, history.as_ref(), record)?;
                self.ledger.commit(batch)?;
                Err(GovernanceError::ComplianceUnavailable(reason))
            }
            Ok(verdict) if verdict.passed => {
                let mut next = current.value.clone();
                if next.status == ProposalStatus::Draft {
                    next.transition(ProposalStatus::ComplianceReview, now)?;
                }
                next.transition(ProposalStatus::Open, now)?;
                let deadline = now.plus_secs(self.params.get().voting_period_secs);
                next.voting_deadline = Some(deadline);

                let record = self.record(id, history.as_ref(), ComplianceOutcome::Passed, verdict.notes.clone(), now);
                let mut batch = WriteBatch::new();
                GovernanceLedger::stage_update(&mut batch, proposal_key(id), Some(&current), &next)?;
                stage_history(&mut batch, id, history.as_ref(), record)?;
                self.ledger.commit(batch)?;
                tracing::info!(proposal = %id, %deadline, "compliance passed, voting open");
                Ok(ComplianceReport {
                    passed: true,
                    notes: verdict.notes,
                    voting_deadline: Some(deadline),
                })
            }
            Ok(verdict) => {
                let mut next = current.value.clone();
                if next.status == ProposalStatus::Draft {
                    next.transition(ProposalStatus::ComplianceReview, now)?;
                }
                next.transition(ProposalStatus::Rejected, now)?;
                next.rejection = Some(RejectionReason::Compliance);

                let record = self.record(id, history.as_ref(), ComplianceOutcome::Failed, verdict.notes.clone(), now);
                let mut batch = WriteBatch::new();
                GovernanceLedger::stage_update(&mut batch, proposal_key(id), Some(&current), &next)?;
                stage_history(&mut batch, id, history.as_ref(), record)?;
                self.ledger.commit(batch)?;
                tracing::info!(proposal = %id, notes = ?verdict.notes, "compliance rejected proposal");

                self.settle_fee(&guard, &next)?;
                Err(GovernanceError::ComplianceRejected(verdict.notes.join("; ")))
            }
        }
    }

    /// Outcome for a proposal whose review is already behind it.
    fn completed_review(&self, guard: &ProposalGuard) -> Result<ComplianceReport, GovernanceError> {
        let id = guard.proposal_id();
        let proposal = self.ledger.load_proposal(&id)?.value;
        let last = self
            .ledger
            .load_compliance(&id)?
            .and_then(|s| s.value.last().cloned());

        match (proposal.status, proposal.rejection, last) {
            (ProposalStatus::Rejected, Some(RejectionReason::Compliance), last) => {
                self.settle_fee(guard, &proposal)?;
                let notes = last.map(|r| r.notes.join("; ")).unwrap_or_default();
                Err(GovernanceError::ComplianceRejected(notes))
            }
            (ProposalStatus::Open, _, Some(record)) if record.passed => Ok(ComplianceReport {
                passed: true,
                notes: record.notes,
                voting_deadline: proposal.voting_deadline,
            }),
            (status, _, _) => Err(GovernanceError::InvalidStateTransition {
                from: status,
                to: ProposalStatus::Open,
            }),
        }
    }

    fn settle_fee(&self, guard: &ProposalGuard, proposal: &Proposal) -> Result<(), GovernanceError> {
        if self.params.get().settlement.forfeit_fee_on_compliance_rejection {
            self.escrow
                .forfeit(guard, &proposal.proposer, EscrowPurpose::ProposerFee)?;
        } else {
            self.escrow
                .release(guard, &proposal.proposer, EscrowPurpose::ProposerFee)?;
        }
        Ok(())
    }

    fn record(
        &self,
        id: &ProposalId,
        history: Option<&Stored<Vec<ComplianceRecord>>>,
        outcome: ComplianceOutcome,
        notes: Vec<String>,
        now: Timestamp,
    ) -> ComplianceRecord {
        let attempt = history
            .and_then(|h| h.value.last())
            .map_or(1, |r| r.attempt + 1);
        ComplianceRecord {
            proposal_id: *id,
            checked_at: now,
            passed: outcome == ComplianceOutcome::Passed,
            outcome,
            notes,
            attempt,
        }
    }
}

fn stage_history(
    batch: &mut WriteBatch,
    id: &ProposalId,
    current: Option<&Stored<Vec<ComplianceRecord>>>,
    record: ComplianceRecord,
) -> Result<(), GovernanceError> {
    let mut entries = current.map(|s| s.value.clone()).unwrap_or_default();
    match entries.last_mut() {
        Some(last) if last.outcome == ComplianceOutcome::Unavailable => *last = record,
        _ => entries.push(record),
    }
    GovernanceLedger::stage_update(batch, compliance_key(id), current, &entries)?;
    Ok(())
}
