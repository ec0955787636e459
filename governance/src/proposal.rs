//! Governance proposals and their lifecycle.
//!
//! ```text
//! Draft → ComplianceReview → Open → Tallying → Approved → Executed
//!               │                       │
//!               └──────→ Rejected ←─────┘
//! Open | Tallying | Approved → Reverted
//! ```
//!
//! Every status change goes through [`Proposal::transition`], which only
//! accepts the edges above.

use crate::error::GovernanceError;
use crate::threshold::ThresholdSnapshot;
use crate::vote::{Vote, VoteChoice};
use agora_types::{Amount, Identity, ProposalId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle status of a proposal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalStatus {
    /// Created, fee not yet under review.
    Draft,
    /// Waiting for (or re-running) the compliance gate.
    ComplianceReview,
    /// Accepting votes until the voting deadline.
    Open,
    /// Votes frozen; outcome being computed.
    Tallying,
    /// Majority and threshold met; awaiting execution.
    Approved,
    /// Failed compliance or the vote.
    Rejected,
    /// The executor applied the proposal.
    Executed,
    /// Withdrawn by an administrator.
    Reverted,
}

impl ProposalStatus {
    pub const ALL: [ProposalStatus; 8] = [
        Self::Draft,
        Self::ComplianceReview,
        Self::Open,
        Self::Tallying,
        Self::Approved,
        Self::Rejected,
        Self::Executed,
        Self::Reverted,
    ];

    /// Whether `self → next` is an edge of the lifecycle graph.
    pub fn can_transition_to(self, next: ProposalStatus) -> bool {
        use ProposalStatus::*;
        matches!(
            (self, next),
            (Draft, ComplianceReview)
                | (ComplianceReview, Open)
                | (ComplianceReview, Rejected)
                | (Open, Tallying)
                | (Tallying, Approved)
                | (Tallying, Rejected)
                | (Approved, Executed)
                | (Open, Reverted)
                | (Tallying, Reverted)
                | (Approved, Reverted)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Executed | Self::Rejected | Self::Reverted)
    }

    /// Whether escrows tied to the proposal may be released or forfeited.
    pub fn settles_escrow(self) -> bool {
        matches!(
            self,
            Self::Approved | Self::Rejected | Self::Executed | Self::Reverted
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::ComplianceReview => "compliance_review",
            Self::Open => "open",
            Self::Tallying => "tallying",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Executed => "executed",
            Self::Reverted => "reverted",
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalStatus {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| GovernanceError::InvalidRequest(format!("unknown status {s:?}")))
    }
}

/// What a proposal asks for.
///
/// `kind` selects the executor that applies the proposal once approved.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalDetails {
    pub kind: String,
    pub title: String,
    pub description: String,
}

/// Why a proposal ended up `Rejected`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectionReason {
    Compliance,
    Vote,
}

/// Running weighted totals of the latest vote per voter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tallies {
    pub yes: Amount,
    pub no: Amount,
    pub abstain: Amount,
    pub voters: u32,
}

impl Tallies {
    /// Total participating weight, abstentions included.
    pub fn total(&self) -> Amount {
        self.yes.saturating_add(self.no).saturating_add(self.abstain)
    }

    fn bucket(&mut self, choice: VoteChoice) -> &mut Amount {
        match choice {
            VoteChoice::Yes => &mut self.yes,
            VoteChoice::No => &mut self.no,
            VoteChoice::Abstain => &mut self.abstain,
        }
    }

    /// Replace `previous` (if any) with `current` in the totals.
    pub fn apply(&mut self, previous: Option<&Vote>, current: &Vote) {
        match previous {
            Some(old) => {
                let bucket = self.bucket(old.choice);
                *bucket = bucket.saturating_sub(old.weight);
            }
            None => self.voters += 1,
        }
        let bucket = self.bucket(current.choice);
        *bucket = bucket.saturating_add(current.weight);
    }
}

/// Outcome of a completed tally, persisted on the proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyResult {
    pub tallies: Tallies,
    pub quorum_weight: Amount,
    pub quorum_met: bool,
    pub approved: bool,
    pub threshold: ThresholdSnapshot,
    pub tallied_at: Timestamp,
}

/// A governance proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub proposer: Identity,
    pub details: ProposalDetails,
    /// Stake paid to submit; held in escrow until the proposal settles.
    pub fee: Amount,
    pub status: ProposalStatus,
    pub created_at: Timestamp,
    /// Set when the proposal opens for voting.
    pub voting_deadline: Option<Timestamp>,
    pub tallies: Tallies,
    /// Threshold captured when tallying began.
    pub threshold_snapshot: Option<ThresholdSnapshot>,
    pub result: Option<TallyResult>,
    pub rejection: Option<RejectionReason>,
    pub revert_reason: Option<String>,
    pub execution_attempts: u32,
    pub last_execution_error: Option<String>,
    pub executed_at: Option<Timestamp>,
    /// Name of the executor that applied the proposal.
    pub executed_by: Option<String>,
    pub execution_summary: Option<String>,
    pub updated_at: Timestamp,
}

impl Proposal {
    /// A fresh proposal in `Draft`.
    pub fn new(
        id: ProposalId,
        proposer: Identity,
        details: ProposalDetails,
        fee: Amount,
        now: Timestamp,
    ) -> Self {
        Self {
            id,
            proposer,
            details,
            fee,
            status: ProposalStatus::Draft,
            created_at: now,
            voting_deadline: None,
            tallies: Tallies::default(),
            threshold_snapshot: None,
            result: None,
            rejection: None,
            revert_reason: None,
            execution_attempts: 0,
            last_execution_error: None,
            executed_at: None,
            executed_by: None,
            execution_summary: None,
            updated_at: now,
        }
    }

    /// Move to `next`, failing unless the edge exists from the current status.
    pub fn transition(&mut self, next: ProposalStatus, now: Timestamp) -> Result<(), GovernanceError> {
        if !self.status.can_transition_to(next) {
            return Err(GovernanceError::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }
        tracing::debug!(proposal = %self.id, from = %self.status, to = %next, "proposal transition");
        self.status = next;
        self.updated_at = now;
        Ok(())
    }

    /// Like [`transition`](Self::transition) but also requires the current
    /// status to be exactly `expected`.
    pub fn transition_from(
        &mut self,
        expected: ProposalStatus,
        next: ProposalStatus,
        now: Timestamp,
    ) -> Result<(), GovernanceError> {
        if self.status != expected {
            return Err(GovernanceError::InvalidStateTransition {
                from: self.status,
                to: next,
            });
        }
        self.transition(next, now)
    }

    /// Whether votes are currently accepted at `now`.
    pub fn accepts_votes_at(&self, now: Timestamp) -> bool {
        self.status == ProposalStatus::Open && self.voting_deadline.is_some_and(|d| now < d)
    }
}
