//! Votes and vote choices.

use crate::error::GovernanceError;
use agora_types::{Amount, Identity, ProposalId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A voter's position on a proposal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VoteChoice {
    Yes,
    No,
    /// Counts toward quorum but not toward the approval ratio.
    Abstain,
}

impl VoteChoice {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Yes => "yes",
            Self::No => "no",
            Self::Abstain => "abstain",
        }
    }
}

impl fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteChoice {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yes" | "yea" => Ok(Self::Yes),
            "no" | "nay" => Ok(Self::No),
            "abstain" => Ok(Self::Abstain),
            _ => Err(GovernanceError::InvalidChoice(s.to_string())),
        }
    }
}

/// The latest vote of one voter on one proposal.
///
/// Stored under `(proposal, voter)`; a re-vote overwrites the record in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub proposal_id: ProposalId,
    pub voter: Identity,
    pub choice: VoteChoice,
    /// Stake held in escrow for this vote.
    pub stake: Amount,
    /// Counted weight: the stake, or an externally resolved delegated weight.
    pub weight: Amount,
    pub cast_at: Timestamp,
    /// Number of times this voter has changed their vote.
    pub revisions: u32,
}

impl Vote {
    pub fn new(
        proposal_id: ProposalId,
        voter: Identity,
        choice: VoteChoice,
        stake: Amount,
        weight: Amount,
        cast_at: Timestamp,
    ) -> Self {
        Self {
            proposal_id,
            voter,
            choice,
            stake,
            weight,
            cast_at,
            revisions: 0,
        }
    }

    /// Whether `other` carries the same choice, stake and weight.
    pub fn same_ballot(&self, other: &Vote) -> bool {
        self.choice == other.choice && self.stake == other.stake && self.weight == other.weight
    }
}

/// A vote as submitted by the caller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ballot {
    pub voter: Identity,
    pub choice: VoteChoice,
    pub stake: Amount,
    /// Weight claimed for the voter. Without a delegation resolver it may not
    /// exceed `stake`; with one it must match what the resolver reports.
    pub weight: Option<Amount>,
}

impl Ballot {
    pub fn new(voter: Identity, choice: VoteChoice, stake: Amount) -> Self {
        Self {
            voter,
            choice,
            stake,
            weight: None,
        }
    }

    pub fn with_weight(mut self, weight: Amount) -> Self {
        self.weight = Some(weight);
        self
    }
}
