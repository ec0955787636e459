use crate::escrow::{EscrowPurpose, EscrowState};
use crate::proposal::ProposalStatus;
use agora_store::StoreError;
use agora_types::{Amount, ProposalId, Timestamp};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GovernanceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        from: ProposalStatus,
        to: ProposalStatus,
    },

    #[error("compliance check unavailable: {0}")]
    ComplianceUnavailable(String),

    #[error("proposal rejected by compliance: {0}")]
    ComplianceRejected(String),

    #[error("executor unavailable: {0}")]
    ExecutorUnavailable(String),

    #[error("execution failed: {0}")]
    ExecutionFailed(String),

    #[error("execution finished but proposal is now {status}; effect {}", conflict_effect(.compensated))]
    ExecutionConflict {
        status: ProposalStatus,
        /// Whether the executor withdrew what it had done.
        compensated: bool,
    },

    #[error("outcome recorded as {status} but escrow settlement is incomplete ({reason}); retry to finish")]
    SettlementIncomplete {
        status: ProposalStatus,
        reason: String,
    },

    #[error("proposal {0} is already being executed")]
    ExecutionInProgress(ProposalId),

    #[error("no executor registered for proposal kind {0:?}")]
    UnknownProposalKind(String),

    #[error("insufficient balance: need {needed}, have {available}")]
    InsufficientBalance { needed: Amount, available: Amount },

    #[error("voting deadline {deadline} has passed (now {now})")]
    DeadlinePassed { deadline: Timestamp, now: Timestamp },

    #[error("proposal is not open for voting (status {status})")]
    ProposalNotOpen { status: ProposalStatus },

    #[error("voting is still in progress until {deadline} and quorum is not reached")]
    VotingInProgress { deadline: Timestamp },

    #[error("invalid vote choice: {0:?}")]
    InvalidChoice(String),

    #[error("claimed weight {claimed} is not backed (backed weight {backed})")]
    InvalidWeight { claimed: Amount, backed: Amount },

    #[error("delegation resolver unavailable: {0}")]
    DelegationUnavailable(String),

    #[error("{purpose} escrow already locked for {holder}")]
    AlreadyLocked {
        holder: String,
        purpose: EscrowPurpose,
    },

    #[error("escrow cannot be settled while proposal is {0}")]
    EscrowActive(ProposalStatus),

    #[error("escrow already {0}")]
    EscrowSettled(EscrowState),

    #[error("proposal {0} already exists")]
    DuplicateProposal(ProposalId),

    #[error("{0} is not authorized for this operation")]
    Unauthorized(String),

    #[error("threshold must be at most 10000 basis points, got {0}")]
    InvalidThreshold(u32),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("store error: {0}")]
    Store(StoreError),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl GovernanceError {
    /// The outcome was recorded as `status`, but settling escrow failed with `cause`.
    pub fn settlement_incomplete(status: ProposalStatus, cause: GovernanceError) -> Self {
        match cause {
            already @ Self::SettlementIncomplete { .. } => already,
            cause => Self::SettlementIncomplete {
                status,
                reason: cause.to_string(),
            },
        }
    }

    /// Whether the caller may retry the same call later and expect progress.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ComplianceUnavailable(_)
                | Self::ExecutorUnavailable(_)
                | Self::ExecutionFailed(_)
                | Self::ExecutionInProgress(_)
                | Self::SettlementIncomplete { .. }
                | Self::DelegationUnavailable(_)
                | Self::Store(StoreError::Conflict(_))
                | Self::Store(StoreError::Backend(_))
        )
    }

    /// Stable machine-readable tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::InvalidStateTransition { .. } => "invalid_state_transition",
            Self::ComplianceUnavailable(_) => "compliance_unavailable",
            Self::ComplianceRejected(_) => "compliance_rejected",
            Self::ExecutorUnavailable(_) => "executor_unavailable",
            Self::ExecutionFailed(_) => "execution_failed",
            Self::ExecutionConflict { .. } => "execution_conflict",
            Self::ExecutionInProgress(_) => "execution_in_progress",
            Self::SettlementIncomplete { .. } => "settlement_incomplete",
            Self::UnknownProposalKind(_) => "unknown_proposal_kind",
            Self::InsufficientBalance { .. } => "insufficient_balance",
            Self::DeadlinePassed { .. } => "deadline_passed",
            Self::ProposalNotOpen { .. } => "proposal_not_open",
            Self::VotingInProgress { .. } => "voting_in_progress",
            Self::InvalidChoice(_) => "invalid_choice",
            Self::InvalidWeight { .. } => "invalid_weight",
            Self::DelegationUnavailable(_) => "delegation_unavailable",
            Self::AlreadyLocked { .. } => "already_locked",
            Self::EscrowActive(_) => "escrow_active",
            Self::EscrowSettled(_) => "escrow_settled",
            Self::DuplicateProposal(_) => "duplicate_proposal",
            Self::Unauthorized(_) => "unauthorized",
            Self::InvalidThreshold(_) => "invalid_threshold",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Store(_) => "store",
            Self::Serialization(_) => "serialization",
        }
    }
}

fn conflict_effect(compensated: &bool) -> &'static str {
    if *compensated {
        "withdrawn"
    } else {
        "could not be withdrawn"
    }
}

impl From<StoreError> for GovernanceError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientBalance {
                needed, available, ..
            } => Self::InsufficientBalance { needed, available },
            other => Self::Store(other),
        }
    }
}

impl From<bincode::Error> for GovernanceError {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
