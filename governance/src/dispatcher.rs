//! Execution dispatcher: applies approved proposals and handles reverts.
//!
//! The executor runs without the proposal lock. The lock is held only to
//! check `Approved` before the call and to commit `Approved → Executed`
//! after it. Executors may stage their effect in `invoke` and make it live in
//! `commit`, which runs under the lock just before `Executed` is recorded. If
//! a revert lands in between, nothing is committed: the executor is asked to
//! withdraw what it did and the caller gets a conflict.

use crate::auth::AdminSet;
use crate::error::GovernanceError;
use crate::escrow::{EscrowManager, EscrowPurpose, EscrowState};
use crate::ledger::GovernanceLedger;
use crate::locks::{ProposalGuard, ProposalLocks};
use crate::params::ParamsHandle;
use crate::proposal::{Proposal, ProposalStatus};
use agora_types::{Clock, Identity, ProposalId, Timestamp};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

/// What an executor is asked to apply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub proposal_id: ProposalId,
    pub proposer: Identity,
    pub kind: String,
    pub params: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    pub summary: String,
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    /// The executor ran and refused or failed to apply the proposal.
    #[error("{0}")]
    Failed(String),
    /// The executor could not be reached.
    #[error("{0}")]
    Unavailable(String),
}

/// Capability that applies the effect of an approved proposal.
///
/// Implementations must not retry internally; retry policy belongs to the
/// caller of `execute`.
#[async_trait]
pub trait Executor: Send + Sync {
    fn name(&self) -> &str;

    /// Apply or stage the effect. Runs without the proposal lock.
    async fn invoke(&self, request: &ExecutionRequest) -> Result<ExecutionReceipt, ExecutorError>;

    /// Make an effect staged by `invoke` live.
    ///
    /// Called under the proposal lock while it is still `Approved`, right
    /// before `Executed` is recorded. Must not block. An error leaves the
    /// proposal `Approved`.
    fn commit(&self, _request: &ExecutionRequest) -> Result<(), ExecutorError> {
        Ok(())
    }

    /// Withdraw what `invoke` did after the proposal left `Approved` while it
    /// ran. Executors that apply effects directly in `invoke` should override
    /// this.
    async fn compensate(
        &self,
        _request: &ExecutionRequest,
        _receipt: &ExecutionReceipt,
    ) -> Result<(), ExecutorError> {
        Err(ExecutorError::Failed(format!(
            "{} cannot withdraw an applied effect",
            self.name()
        )))
    }
}

impl From<ExecutorError> for GovernanceError {
    fn from(e: ExecutorError) -> Self {
        match e {
            ExecutorError::Failed(reason) => Self::ExecutionFailed(reason),
            ExecutorError::Unavailable(reason) => Self::ExecutorUnavailable(reason),
        }
    }
}

/// Executors selected by proposal kind.
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    by_kind: HashMap<String, Arc<dyn Executor>>,
    fallback: Option<Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, executor: Arc<dyn Executor>) -> &mut Self {
        self.by_kind.insert(kind.into(), executor);
        self
    }

    /// Executor used for kinds with no dedicated registration.
    pub fn set_fallback(&mut self, executor: Arc<dyn Executor>) -> &mut Self {
        self.fallback = Some(executor);
        self
    }

    /// Whether `kind` has a dedicated executor.
    pub fn contains(&self, kind: &str) -> bool {
        self.by_kind.contains_key(kind)
    }

    pub fn resolve(&self, kind: &str) -> Option<Arc<dyn Executor>> {
        self.by_kind.get(kind).or(self.fallback.as_ref()).cloned()
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.by_kind.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}

/// Result of a successful execution.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub proposal_id: ProposalId,
    pub executor: String,
    pub summary: String,
    pub executed_at: Timestamp,
}

/// Marks a proposal as executing; cleared on drop.
struct InFlight {
    set: Arc<Mutex<HashSet<ProposalId>>>,
    id: ProposalId,
}

impl InFlight {
    fn claim(set: &Arc<Mutex<HashSet<ProposalId>>>, id: ProposalId) -> Option<Self> {
        let inserted = set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(id);
        inserted.then(|| Self {
            set: set.clone(),
            id,
        })
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(&self.id);
    }
}

#[derive(Clone)]
pub struct ExecutionDispatcher {
    ledger: GovernanceLedger,
    escrow: EscrowManager,
    locks: Arc<ProposalLocks>,
    executors: Arc<ExecutorRegistry>,
    admins: Arc<AdminSet>,
    params: ParamsHandle,
    clock: Arc<dyn Clock>,
    in_flight: Arc<Mutex<HashSet<ProposalId>>>,
}

impl ExecutionDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        ledger: GovernanceLedger,
        escrow: EscrowManager,
        locks: Arc<ProposalLocks>,
        executors: Arc<ExecutorRegistry>,
        admins: Arc<AdminSet>,
        params: ParamsHandle,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            escrow,
            locks,
            executors,
            admins,
            params,
            clock,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Invoke the executor for an `Approved` proposal.
    ///
    /// On failure the proposal stays `Approved` and the call may be retried.
    /// Executing an `Executed` proposal returns the recorded outcome without
    /// invoking the executor again, finishing the fee release if an earlier
    /// call ended with `SettlementIncomplete`.
    pub async fn execute(
        &self,
        id: &ProposalId,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<ExecutionOutcome, GovernanceError> {
        let (request, executor, _in_flight) = {
            let guard = self.locks.acquire(*id).await;
            let proposal = self.ledger.load_proposal(id)?.value;
            if proposal.status == ProposalStatus::Executed {
                self.release_fee(&guard, &proposal)?;
                return Ok(recorded_outcome(&proposal));
            }
            if proposal.status != ProposalStatus::Approved {
                return Err(GovernanceError::InvalidStateTransition {
                    from: proposal.status,
                    to: ProposalStatus::Executed,
                });
            }
            let executor = self
                .executors
                .resolve(&proposal.details.kind)
                .ok_or_else(|| GovernanceError::UnknownProposalKind(proposal.details.kind.clone()))?;
            let in_flight = InFlight::claim(&self.in_flight, *id)
                .ok_or(GovernanceError::ExecutionInProgress(*id))?;
            let request = ExecutionRequest {
                proposal_id: *id,
                proposer: proposal.proposer.clone(),
                kind: proposal.details.kind.clone(),
                params,
            };
            (request, executor, in_flight)
        };

        tracing::info!(proposal = %id, executor = executor.name(), kind = %request.kind, "invoking executor");
        let outcome = tokio::time::timeout(timeout, executor.invoke(&request)).await;

        let receipt = match outcome {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(e)) => {
                self.record_failure(id, &e.to_string()).await;
                return Err(e.into());
            }
            Err(_) => {
                let reason = format!("executor timed out after {}ms", timeout.as_millis());
                self.record_failure(id, &reason).await;
                return Err(GovernanceError::ExecutorUnavailable(reason));
            }
        };

        let guard = self.locks.acquire(*id).await;
        let current = self.ledger.load_proposal(id)?;
        if current.value.status != ProposalStatus::Approved {
            drop(guard);
            let status = current.value.status;
            let compensated = match tokio::time::timeout(timeout, executor.compensate(&request, &receipt)).await {
                Ok(Ok(())) => true,
                Ok(Err(e)) => {
                    tracing::error!(proposal = %id, error = %e, "executor could not withdraw its effect");
                    false
                }
                Err(_) => {
                    tracing::error!(proposal = %id, "executor timed out withdrawing its effect");
                    false
                }
            };
            tracing::warn!(
                proposal = %id,
                %status,
                compensated,
                "executor finished after proposal left Approved"
            );
            return Err(GovernanceError::ExecutionConflict { status, compensated });
        }
        if let Err(e) = executor.commit(&request) {
            drop(guard);
            self.record_failure(id, &e.to_string()).await;
            return Err(e.into());
        }

        let now = self.clock.now();
        let mut next = current.value.clone();
        next.transition(ProposalStatus::Executed, now)?;
        next.execution_attempts += 1;
        next.last_execution_error = None;
        next.executed_at = Some(now);
        next.executed_by = Some(executor.name().to_string());
        next.execution_summary = Some(receipt.summary.clone());
        if let Err(e) = self.ledger.update_proposal(&current, &next) {
            tracing::error!(proposal = %id, error = %e, "effect committed but Executed could not be recorded");
            return Err(e);
        }
        tracing::info!(proposal = %id, summary = %receipt.summary, "proposal executed");

        self.release_fee(&guard, &next)?;
        Ok(recorded_outcome(&next))
    }

    fn release_fee(&self, guard: &ProposalGuard, proposal: &Proposal) -> Result<(), GovernanceError> {
        self.escrow
            .release(guard, &proposal.proposer, EscrowPurpose::ProposerFee)
            .map(|_| ())
            .map_err(|e| GovernanceError::settlement_incomplete(proposal.status, e))
    }

    /// Withdraw a proposal. Only administrators may revert.
    ///
    /// Reverting an already reverted proposal re-runs settlement and succeeds.
    pub async fn revert(
        &self,
        id: &ProposalId,
        actor: &Identity,
        reason: &str,
    ) -> Result<Proposal, GovernanceError> {
        self.admins.authorize(actor)?;
        let guard = self.locks.acquire(*id).await;
        let current = self.ledger.load_proposal(id)?;
        if current.value.status == ProposalStatus::Reverted {
            self.settle_revert(&guard, &current.value)
                .map_err(|e| GovernanceError::settlement_incomplete(ProposalStatus::Reverted, e))?;
            return Ok(current.value);
        }

        let now = self.clock.now();
        let mut next = current.value.clone();
        next.transition(ProposalStatus::Reverted, now)?;
        next.revert_reason = Some(reason.to_string());
        self.ledger.update_proposal(&current, &next)?;
        tracing::info!(proposal = %id, actor = %actor, reason, "proposal reverted");

        self.settle_revert(&guard, &next)
            .map_err(|e| GovernanceError::settlement_incomplete(ProposalStatus::Reverted, e))?;
        Ok(next)
    }

    fn settle_revert(&self, guard: &ProposalGuard, proposal: &Proposal) -> Result<(), GovernanceError> {
        if self.params.get().settlement.forfeit_fee_on_revert {
            self.escrow
                .forfeit(guard, &proposal.proposer, EscrowPurpose::ProposerFee)?;
        } else {
            self.escrow
                .release(guard, &proposal.proposer, EscrowPurpose::ProposerFee)?;
        }
        // Voter stake already settled by a tally stays as it is.
        for escrow in self.escrow.list_for_proposal(&proposal.id)? {
            if escrow.purpose == EscrowPurpose::VoteStake && escrow.state == EscrowState::Locked {
                self.escrow
                    .release(guard, &escrow.holder, EscrowPurpose::VoteStake)?;
            }
        }
        Ok(())
    }

    async fn record_failure(&self, id: &ProposalId, reason: &str) {
        tracing::warn!(proposal = %id, reason, "execution failed");
        let _guard = self.locks.acquire(*id).await;
        let result = self.ledger.load_proposal(id).and_then(|current| {
            if current.value.status != ProposalStatus::Approved {
                return Ok(());
            }
            let mut next = current.value.clone();
            next.execution_attempts += 1;
            next.last_execution_error = Some(reason.to_string());
            next.updated_at = self.clock.now();
            self.ledger.update_proposal(&current, &next).map(|_| ())
        });
        if let Err(e) = result {
            tracing::error!(proposal = %id, error = %e, "failed to record execution failure");
        }
    }
}

/// Outcome of an `Executed` proposal, as recorded on it.
fn recorded_outcome(proposal: &Proposal) -> ExecutionOutcome {
    ExecutionOutcome {
        proposal_id: proposal.id,
        executor: proposal
            .executed_by
            .clone()
            .unwrap_or_else(|| proposal.details.kind.clone()),
        summary: proposal.execution_summary.clone().unwrap_or_default(),
        executed_at: proposal.executed_at.unwrap_or(proposal.updated_at),
    }
}
