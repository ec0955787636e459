//! Governance engine: the operation surface over every component.
//!
//! Owns the shared lock table, threshold registry and parameter handle, and
//! wires them into the compliance gate, voting engine, tally evaluator and
//! execution dispatcher.

use crate::auth::AdminSet;
use crate::compliance::{ComplianceGate, CompliancePolicy, ComplianceRecord, ComplianceReport, StandardPolicy};
use crate::delegation::DelegationResolver;
use crate::dispatcher::{ExecutionDispatcher, ExecutionOutcome, ExecutorRegistry};
use crate::error::GovernanceError;
use crate::escrow::{Escrow, EscrowManager, EscrowPurpose};
use crate::ledger::{proposal_key, GovernanceLedger};
use crate::locks::ProposalLocks;
use crate::param_change::{ParameterChangeExecutor, PARAMETER_CHANGE_KIND};
use crate::params::ParamsHandle;
use crate::proposal::{Proposal, ProposalDetails, ProposalStatus, TallyResult};
use crate::tally::TallyEvaluator;
use crate::threshold::{ThresholdRegistry, ThresholdSnapshot};
use crate::vote::{Ballot, Vote};
use crate::voting::{VoteReceipt, VotingEngine};
use agora_store::{AccountStore, LedgerGateway, WriteBatch};
use agora_types::{Amount, Clock, Identity, ProposalId, SystemClock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default bound on compliance and executor calls.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// A new proposal as submitted by its proposer.
#[derive(Clone, Debug)]
pub struct ProposalSubmission {
    pub proposer: Identity,
    pub details: ProposalDetails,
    pub fee: Amount,
    /// Caller-assigned id; derived from the contents when absent.
    pub id: Option<ProposalId>,
}

impl ProposalSubmission {
    pub fn new(proposer: Identity, details: ProposalDetails, fee: Amount) -> Self {
        Self {
            proposer,
            details,
            fee,
            id: None,
        }
    }

    pub fn with_id(mut self, id: ProposalId) -> Self {
        self.id = Some(id);
        self
    }
}

pub struct GovernanceEngineBuilder {
    ledger: Option<Arc<dyn LedgerGateway>>,
    accounts: Option<Arc<dyn AccountStore>>,
    clock: Arc<dyn Clock>,
    params: ParamsHandle,
    policy: Option<Arc<dyn CompliancePolicy>>,
    delegation: Option<Arc<dyn DelegationResolver>>,
    executors: ExecutorRegistry,
    administrators: Vec<Identity>,
    default_timeout: Duration,
}

impl GovernanceEngineBuilder {
    pub fn ledger(mut self, ledger: Arc<dyn LedgerGateway>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn accounts(mut self, accounts: Arc<dyn AccountStore>) -> Self {
        self.accounts = Some(accounts);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn params(mut self, params: ParamsHandle) -> Self {
        self.params = params;
        self
    }

    pub fn policy(mut self, policy: Arc<dyn CompliancePolicy>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Resolver that vouches for weight beyond a voter's escrowed stake.
    pub fn delegation(mut self, resolver: Arc<dyn DelegationResolver>) -> Self {
        self.delegation = Some(resolver);
        self
    }

    pub fn executors(mut self, executors: ExecutorRegistry) -> Self {
        self.executors = executors;
        self
    }

    pub fn administrators(mut self, admins: impl IntoIterator<Item = Identity>) -> Self {
        self.administrators = admins.into_iter().collect();
        self
    }

    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn build(self) -> Result<GovernanceEngine, GovernanceError> {
        let gateway = self
            .ledger
            .ok_or_else(|| GovernanceError::InvalidRequest("ledger gateway not configured".into()))?;
        let accounts = self
            .accounts
            .ok_or_else(|| GovernanceError::InvalidRequest("account store not configured".into()))?;
        let clock = self.clock;
        let params = self.params;

        let thresholds = Arc::new(ThresholdRegistry::new(
            params.get().initial_threshold_bps,
            clock.now(),
        )?);
        let policy = self
            .policy
            .unwrap_or_else(|| Arc::new(StandardPolicy::new(params.clone(), std::iter::empty())));
        let mut executors = self.executors;
        if !executors.contains(PARAMETER_CHANGE_KIND) {
            executors.register(
                PARAMETER_CHANGE_KIND,
                Arc::new(ParameterChangeExecutor::new(params.clone())),
            );
        }

        let ledger = GovernanceLedger::new(gateway);
        let locks = Arc::new(ProposalLocks::new());
        let admins = Arc::new(AdminSet::new(self.administrators));
        let escrow = EscrowManager::new(ledger.clone(), accounts, clock.clone());
        let mut voting = VotingEngine::new(ledger.clone(), escrow.clone(), locks.clone(), clock.clone());
        if let Some(resolver) = self.delegation {
            voting = voting.with_delegation(resolver, self.default_timeout);
        }

        Ok(GovernanceEngine {
            compliance: ComplianceGate::new(
                ledger.clone(),
                escrow.clone(),
                locks.clone(),
                policy,
                params.clone(),
                clock.clone(),
            ),
            voting,
            tally: TallyEvaluator::new(
                ledger.clone(),
                escrow.clone(),
                locks.clone(),
                thresholds.clone(),
                params.clone(),
                clock.clone(),
            ),
            dispatcher: ExecutionDispatcher::new(
                ledger.clone(),
                escrow.clone(),
                locks.clone(),
                Arc::new(executors),
                admins.clone(),
                params.clone(),
                clock.clone(),
            ),
            ledger,
            escrow,
            locks,
            thresholds,
            params,
            admins,
            clock,
            nonce: AtomicU64::new(0),
            default_timeout: self.default_timeout,
        })
    }
}

pub struct GovernanceEngine {
    ledger: GovernanceLedger,
    escrow: EscrowManager,
    locks: Arc<ProposalLocks>,
    thresholds: Arc<ThresholdRegistry>,
    params: ParamsHandle,
    admins: Arc<AdminSet>,
    clock: Arc<dyn Clock>,
    compliance: ComplianceGate,
    voting: VotingEngine,
    tally: TallyEvaluator,
    dispatcher: ExecutionDispatcher,
    nonce: AtomicU64,
    default_timeout: Duration,
}

impl GovernanceEngine {
    pub fn builder() -> GovernanceEngineBuilder {
        GovernanceEngineBuilder {
            ledger: None,
            accounts: None,
            clock: Arc::new(SystemClock),
            params: ParamsHandle::default(),
            policy: None,
            delegation: None,
            executors: ExecutorRegistry::new(),
            administrators: Vec::new(),
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn params(&self) -> &ParamsHandle {
        &self.params
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Create a proposal, lock its fee in escrow and queue it for compliance review.
    pub async fn submit_proposal(&self, submission: ProposalSubmission) -> Result<Proposal, GovernanceError> {
        let ProposalSubmission {
            proposer,
            details,
            fee,
            id,
        } = submission;
        if !proposer.is_valid() {
            return Err(GovernanceError::InvalidRequest(format!(
                "malformed proposer identity {:?}",
                proposer.as_str()
            )));
        }
        let now = self.clock.now();
        let id = id.unwrap_or_else(|| {
            let nonce = self.nonce.fetch_add(1, Ordering::Relaxed);
            ProposalId::derive(&[
                proposer.as_str().as_bytes(),
                details.kind.as_bytes(),
                details.title.as_bytes(),
                details.description.as_bytes(),
                &fee.raw().to_le_bytes(),
                &now.as_secs().to_le_bytes(),
                &nonce.to_le_bytes(),
            ])
        });

        let guard = self.locks.acquire(id).await;
        if self.ledger.find_proposal(&id)?.is_some() {
            return Err(GovernanceError::DuplicateProposal(id));
        }
        let mut proposal = Proposal::new(id, proposer, details, fee, now);
        proposal.transition(ProposalStatus::ComplianceReview, now)?;

        let change = self
            .escrow
            .lock(&guard, &proposal.proposer, EscrowPurpose::ProposerFee, fee)?;
        let mut batch = WriteBatch::new();
        let written = GovernanceLedger::stage_update(&mut batch, proposal_key(&id), None, &proposal)
            .and_then(|_| self.ledger.commit(batch));
        if let Err(e) = written {
            if let Err(undo) = self.escrow.undo(&guard, change) {
                tracing::error!(proposal = %id, error = %undo, "failed to undo proposer fee escrow");
            }
            return Err(match e {
                GovernanceError::Store(agora_store::StoreError::Conflict(_)) => {
                    GovernanceError::DuplicateProposal(id)
                }
                other => other,
            });
        }

        tracing::info!(
            proposal = %id,
            proposer = %proposal.proposer,
            kind = %proposal.details.kind,
            %fee,
            "proposal submitted"
        );
        Ok(proposal)
    }

    pub async fn review_compliance(&self, id: &ProposalId) -> Result<ComplianceReport, GovernanceError> {
        self.compliance.review(id, self.default_timeout).await
    }

    pub async fn review_compliance_with_timeout(
        &self,
        id: &ProposalId,
        timeout: Duration,
    ) -> Result<ComplianceReport, GovernanceError> {
        self.compliance.review(id, timeout).await
    }

    pub async fn cast_vote(&self, id: &ProposalId, ballot: Ballot) -> Result<VoteReceipt, GovernanceError> {
        self.voting.cast(id, ballot).await
    }

    /// Tally and settle. Safe to retry: on a closed proposal this finishes any
    /// settlement left incomplete and returns the recorded result.
    pub async fn close_voting(&self, id: &ProposalId) -> Result<TallyResult, GovernanceError> {
        self.tally.close(id).await
    }

    /// Run the proposal's executor. Safe to retry: on an executed proposal
    /// this releases the fee if still locked and returns the recorded outcome.
    pub async fn execute(
        &self,
        id: &ProposalId,
        params: serde_json::Value,
    ) -> Result<ExecutionOutcome, GovernanceError> {
        self.dispatcher.execute(id, params, self.default_timeout).await
    }

    pub async fn execute_with_timeout(
        &self,
        id: &ProposalId,
        params: serde_json::Value,
        timeout: Duration,
    ) -> Result<ExecutionOutcome, GovernanceError> {
        self.dispatcher.execute(id, params, timeout).await
    }

    pub async fn revert(
        &self,
        id: &ProposalId,
        actor: &Identity,
        reason: &str,
    ) -> Result<Proposal, GovernanceError> {
        self.dispatcher.revert(id, actor, reason).await
    }

    pub fn get_proposal(&self, id: &ProposalId) -> Result<Proposal, GovernanceError> {
        Ok(self.ledger.load_proposal(id)?.value)
    }

    /// All proposals, optionally filtered by status.
    pub fn list_proposals(&self, status: Option<ProposalStatus>) -> Result<Vec<Proposal>, GovernanceError> {
        let mut proposals = self.ledger.list_proposals()?;
        if let Some(status) = status {
            proposals.retain(|p| p.status == status);
        }
        Ok(proposals)
    }

    pub fn compliance_history(&self, id: &ProposalId) -> Result<Vec<ComplianceRecord>, GovernanceError> {
        self.compliance.history(id)
    }

    pub fn get_vote(&self, id: &ProposalId, voter: &Identity) -> Result<Vote, GovernanceError> {
        self.ledger
            .load_vote(id, voter)?
            .map(|s| s.value)
            .ok_or_else(|| GovernanceError::NotFound(format!("vote by {voter} on {id}")))
    }

    pub fn list_votes(&self, id: &ProposalId) -> Result<Vec<Vote>, GovernanceError> {
        self.ledger.load_proposal(id)?;
        self.ledger.list_votes(id)
    }

    pub fn get_escrow(
        &self,
        id: &ProposalId,
        holder: &Identity,
        purpose: EscrowPurpose,
    ) -> Result<Escrow, GovernanceError> {
        self.escrow
            .get(id, holder, purpose)?
            .ok_or_else(|| GovernanceError::NotFound(format!("{purpose} escrow for {holder} on {id}")))
    }

    pub fn list_escrows(&self, id: &ProposalId) -> Result<Vec<Escrow>, GovernanceError> {
        self.ledger.load_proposal(id)?;
        self.escrow.list_for_proposal(id)
    }

    /// Replace the approval threshold. Tallies already under way keep their snapshot.
    pub fn set_delegation_threshold(
        &self,
        actor: &Identity,
        bps: u32,
    ) -> Result<ThresholdSnapshot, GovernanceError> {
        self.admins.authorize(actor)?;
        self.thresholds.set(bps, self.clock.now())
    }

    pub fn delegation_threshold(&self) -> ThresholdSnapshot {
        self.thresholds.snapshot()
    }

    /// Tally every proposal past its deadline and drop idle lock-table entries.
    pub async fn sweep_expired(&self) -> Result<Vec<(ProposalId, TallyResult)>, GovernanceError> {
        let closed = self.tally.sweep_expired().await?;
        let pruned = self.locks.prune();
        if pruned > 0 {
            tracing::debug!(pruned, "pruned idle proposal locks");
        }
        Ok(closed)
    }
}
