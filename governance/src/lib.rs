//! Governance proposals for Agora.
//!
//! Lifecycle: Draft → ComplianceReview → Open → Tallying → Approved → Executed,
//! with rejection by compliance or vote and administrative revert.
//!
//! Votes are weighted by escrowed stake, plus delegated weight when a
//! delegation resolver vouches for it. Every mutating operation on a
//! proposal runs under that proposal's lock and commits through conditional
//! ledger batches; different proposals proceed concurrently.

pub mod auth;
pub mod compliance;
pub mod delegation;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod escrow;
pub mod ledger;
pub mod locks;
pub mod param_change;
pub mod params;
pub mod proposal;
pub mod tally;
pub mod threshold;
pub mod vote;
pub mod voting;

pub use auth::AdminSet;
pub use compliance::{
    ComplianceOutcome, CompliancePolicy, ComplianceRecord, ComplianceReport, ComplianceSubject,
    PolicyError, PolicyVerdict, StandardPolicy,
};
pub use delegation::{DelegationError, DelegationResolver, DelegationTable};
pub use dispatcher::{
    ExecutionOutcome, ExecutionReceipt, ExecutionRequest, Executor, ExecutorError, ExecutorRegistry,
};
pub use engine::{GovernanceEngine, GovernanceEngineBuilder, ProposalSubmission, DEFAULT_TIMEOUT};
pub use error::GovernanceError;
pub use escrow::{Escrow, EscrowPurpose, EscrowState};
pub use param_change::{ParameterChangeExecutor, PARAMETER_CHANGE_KIND};
pub use params::{GovernableParam, GovernanceParams, ParamsHandle, SettlementPolicy};
pub use proposal::{Proposal, ProposalDetails, ProposalStatus, RejectionReason, Tallies, TallyResult};
pub use threshold::{ThresholdSnapshot, BPS_DENOMINATOR};
pub use vote::{Ballot, Vote, VoteChoice};
pub use voting::VoteReceipt;
