//! Shared harness: an engine over nullable collaborators plus scripted
//! compliance-policy and executor doubles.

#![allow(dead_code)]

use agora_governance::{
    Ballot, CompliancePolicy, ComplianceSubject, DelegationResolver, ExecutionReceipt,
    ExecutionRequest, Executor, ExecutorError, ExecutorRegistry, GovernanceEngine,
    GovernanceParams, ParamsHandle, PolicyError, PolicyVerdict, ProposalDetails,
    ProposalSubmission, VoteChoice, VoteReceipt,
};
use agora_nullables::{NullAccounts, NullClock, NullLedger};
use agora_types::{Amount, Identity, ProposalId};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

pub const START: u64 = 1_700_000_000;
pub const VOTING_PERIOD: u64 = 3_600;
pub const INITIAL_BALANCE: u128 = 1_000;
pub const SCRIPTED_KIND: &str = "scripted";

pub fn who(name: &str) -> Identity {
    Identity::new(name)
}

pub fn amount(n: u128) -> Amount {
    Amount::new(n)
}

pub fn details(kind: &str) -> ProposalDetails {
    ProposalDetails {
        kind: kind.into(),
        title: "Fund the archive".into(),
        description: "Move 500 units to the archive maintainers".into(),
    }
}

// ---------------------------------------------------------------------------
// Scripted policy
// ---------------------------------------------------------------------------

pub enum PolicyStep {
    Pass,
    Fail(&'static str),
    Unavailable,
    Hang(Duration),
}

#[derive(Default)]
pub struct ScriptedPolicy {
    steps: Mutex<VecDeque<PolicyStep>>,
    calls: AtomicUsize,
}

impl ScriptedPolicy {
    pub fn push(&self, step: PolicyStep) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompliancePolicy for ScriptedPolicy {
    async fn check(&self, _subject: &ComplianceSubject) -> Result<PolicyVerdict, PolicyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(PolicyStep::Pass);
        match step {
            PolicyStep::Pass => Ok(PolicyVerdict {
                passed: true,
                notes: vec!["ok".into()],
            }),
            PolicyStep::Fail(note) => Ok(PolicyVerdict {
                passed: false,
                notes: vec![note.into()],
            }),
            PolicyStep::Unavailable => Err(PolicyError::Unavailable("registry offline".into())),
            PolicyStep::Hang(d) => {
                tokio::time::sleep(d).await;
                Ok(PolicyVerdict {
                    passed: true,
                    notes: vec![],
                })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Scripted executor
// ---------------------------------------------------------------------------

pub enum ExecStep {
    Succeed,
    Fail(&'static str),
    Unavailable,
    Hang(Duration),
    /// Signal `started`, then wait for `release` before succeeding.
    Gate {
        started: Arc<Notify>,
        release: Arc<Notify>,
    },
}

#[derive(Default)]
pub struct ScriptedExecutor {
    steps: Mutex<VecDeque<ExecStep>>,
    invocations: Mutex<Vec<ExecutionRequest>>,
    compensations: Mutex<Vec<ProposalId>>,
}

impl ScriptedExecutor {
    pub fn push(&self, step: ExecStep) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn invocations(&self) -> Vec<ExecutionRequest> {
        self.invocations.lock().unwrap().clone()
    }

    pub fn compensations(&self) -> Vec<ProposalId> {
        self.compensations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    fn name(&self) -> &str {
        SCRIPTED_KIND
    }

    async fn invoke(&self, request: &ExecutionRequest) -> Result<ExecutionReceipt, ExecutorError> {
        self.invocations.lock().unwrap().push(request.clone());
        let step = self.steps.lock().unwrap().pop_front().unwrap_or(ExecStep::Succeed);
        match step {
            ExecStep::Succeed => {}
            ExecStep::Fail(reason) => return Err(ExecutorError::Failed(reason.into())),
            ExecStep::Unavailable => return Err(ExecutorError::Unavailable("vm offline".into())),
            ExecStep::Hang(d) => tokio::time::sleep(d).await,
            ExecStep::Gate { started, release } => {
                started.notify_one();
                release.notified().await;
            }
        }
        Ok(ExecutionReceipt {
            summary: format!("applied {}", request.proposal_id),
        })
    }

    async fn compensate(
        &self,
        request: &ExecutionRequest,
        _receipt: &ExecutionReceipt,
    ) -> Result<(), ExecutorError> {
        self.compensations.lock().unwrap().push(request.proposal_id);
        Ok(())
    }
}

/// Wraps an executor: signals `started` once `inner.invoke` returns, then
/// waits for `release` before reporting back.
pub struct GatedExecutor {
    pub inner: Arc<dyn Executor>,
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl GatedExecutor {
    pub fn new(inner: Arc<dyn Executor>) -> Self {
        Self {
            inner,
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl Executor for GatedExecutor {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn invoke(&self, request: &ExecutionRequest) -> Result<ExecutionReceipt, ExecutorError> {
        let receipt = self.inner.invoke(request).await;
        self.started.notify_one();
        self.release.notified().await;
        receipt
    }

    fn commit(&self, request: &ExecutionRequest) -> Result<(), ExecutorError> {
        self.inner.commit(request)
    }

    async fn compensate(
        &self,
        request: &ExecutionRequest,
        receipt: &ExecutionReceipt,
    ) -> Result<(), ExecutorError> {
        self.inner.compensate(request, receipt).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub engine: Arc<GovernanceEngine>,
    pub ledger: Arc<NullLedger>,
    pub accounts: Arc<NullAccounts>,
    pub clock: Arc<NullClock>,
    pub policy: Arc<ScriptedPolicy>,
    pub executor: Arc<ScriptedExecutor>,
    pub params: ParamsHandle,
}

pub fn test_params() -> GovernanceParams {
    GovernanceParams {
        voting_period_secs: VOTING_PERIOD,
        minimum_quorum_weight: 100,
        minimum_fee: 10,
        initial_threshold_bps: 5_000,
        early_close_on_quorum: false,
        ..GovernanceParams::default()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_params(test_params())
    }

    pub fn with_params(params: GovernanceParams) -> Self {
        Self::build(params, None, |_, _| {})
    }

    /// Engine whose vote weight comes from `resolver`.
    pub fn with_delegation(resolver: Arc<dyn DelegationResolver>) -> Self {
        Self::build(test_params(), Some(resolver), |_, _| {})
    }

    /// Engine with extra executors registered next to the scripted one.
    pub fn with_executors(register: impl FnOnce(&mut ExecutorRegistry, &ParamsHandle)) -> Self {
        Self::build(test_params(), None, register)
    }

    fn build(
        params: GovernanceParams,
        delegation: Option<Arc<dyn DelegationResolver>>,
        register: impl FnOnce(&mut ExecutorRegistry, &ParamsHandle),
    ) -> Self {
        let ledger = Arc::new(NullLedger::new());
        let accounts = Arc::new(NullAccounts::with_balances(
            ["proposer", "alice", "bob", "carol", "dave", "erin"]
                .into_iter()
                .map(|n| (who(n), amount(INITIAL_BALANCE))),
        ));
        let clock = Arc::new(NullClock::new(START));
        let policy = Arc::new(ScriptedPolicy::default());
        let executor = Arc::new(ScriptedExecutor::default());
        let params = ParamsHandle::new(params);

        let mut executors = ExecutorRegistry::new();
        executors.register(SCRIPTED_KIND, executor.clone());
        register(&mut executors, &params);

        let mut builder = GovernanceEngine::builder();
        if let Some(resolver) = delegation {
            builder = builder.delegation(resolver);
        }
        let engine = builder
            .ledger(ledger.clone())
            .accounts(accounts.clone())
            .clock(clock.clone())
            .params(params.clone())
            .policy(policy.clone())
            .executors(executors)
            .administrators([who("root")])
            .default_timeout(Duration::from_secs(2))
            .build()
            .expect("engine builds");

        Self {
            engine: Arc::new(engine),
            ledger,
            accounts,
            clock,
            policy,
            executor,
            params,
        }
    }

    pub fn balance(&self, name: &str) -> Amount {
        use agora_store::AccountStore;
        self.accounts.balance(&who(name)).unwrap()
    }

    /// Submit a scripted-kind proposal from `proposer`.
    pub async fn submit(&self, fee: u128) -> ProposalId {
        self.engine
            .submit_proposal(ProposalSubmission::new(
                who("proposer"),
                details(SCRIPTED_KIND),
                amount(fee),
            ))
            .await
            .expect("submit")
            .id
    }

    /// Submit and pass compliance.
    pub async fn open(&self, fee: u128) -> ProposalId {
        let id = self.submit(fee).await;
        self.engine.review_compliance(&id).await.expect("review");
        id
    }

    pub async fn vote(
        &self,
        id: &ProposalId,
        voter: &str,
        choice: VoteChoice,
        stake: u128,
    ) -> VoteReceipt {
        self.engine
            .cast_vote(id, Ballot::new(who(voter), choice, amount(stake)))
            .await
            .expect("vote")
    }

    pub fn pass_deadline(&self) {
        self.clock.advance(VOTING_PERIOD + 1);
    }
}
