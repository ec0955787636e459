//! Governance parameters and the settlement policy.
//!
//! Amount-valued parameters are stored as `u64` so they survive TOML, which
//! has no 128-bit integers; accessors widen them to [`Amount`].

use crate::error::GovernanceError;
use agora_types::Amount;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

/// Decides what happens to escrowed stake when a proposal settles.
///
/// Voter stake is always released in the base policy; deployments that
/// penalize the losing side set `forfeit_losing_voter_stake`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementPolicy {
    /// Forfeit the proposer fee when compliance rejects the proposal.
    pub forfeit_fee_on_compliance_rejection: bool,
    /// Forfeit the proposer fee when the vote rejects the proposal.
    pub forfeit_fee_on_vote_rejection: bool,
    /// Forfeit the proposer fee when an administrator reverts the proposal.
    pub forfeit_fee_on_revert: bool,
    /// Forfeit stake of voters on the losing side (No on approval, Yes on rejection).
    pub forfeit_losing_voter_stake: bool,
}

impl Default for SettlementPolicy {
    fn default() -> Self {
        Self {
            forfeit_fee_on_compliance_rejection: true,
            forfeit_fee_on_vote_rejection: true,
            forfeit_fee_on_revert: true,
            forfeit_losing_voter_stake: false,
        }
    }
}

/// Tunable governance parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernanceParams {
    /// How long a proposal stays open once it passes compliance.
    pub voting_period_secs: u64,
    /// Minimum total weight (Yes + No + Abstain) for a tally to count.
    pub minimum_quorum_weight: u64,
    /// Minimum proposer fee accepted by the standard compliance policy.
    pub minimum_fee: u64,
    /// Approval threshold at startup, in basis points.
    pub initial_threshold_bps: u32,
    pub max_title_len: usize,
    pub max_description_len: usize,
    /// Allow closing before the deadline once quorum weight is reached.
    pub early_close_on_quorum: bool,
    pub settlement: SettlementPolicy,
}

impl GovernanceParams {
    pub fn minimum_quorum_weight(&self) -> Amount {
        Amount::new(u128::from(self.minimum_quorum_weight))
    }

    pub fn minimum_fee(&self) -> Amount {
        Amount::new(u128::from(self.minimum_fee))
    }
}

impl Default for GovernanceParams {
    fn default() -> Self {
        Self {
            voting_period_secs: 7 * 24 * 3600,
            minimum_quorum_weight: 100,
            minimum_fee: 10,
            initial_threshold_bps: 5_000,
            max_title_len: 200,
            max_description_len: 10_000,
            early_close_on_quorum: true,
            settlement: SettlementPolicy::default(),
        }
    }
}

/// Shared, live view of the parameters.
///
/// Cheap to clone. Parameter-change proposals update it in place; readers
/// take a copy per operation.
#[derive(Clone, Debug)]
pub struct ParamsHandle {
    inner: Arc<RwLock<GovernanceParams>>,
}

impl ParamsHandle {
    pub fn new(params: GovernanceParams) -> Self {
        Self {
            inner: Arc::new(RwLock::new(params)),
        }
    }

    /// Copy of the current parameters.
    pub fn get(&self) -> GovernanceParams {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Mutate the parameters in place.
    pub fn update<F>(&self, f: F) -> Result<GovernanceParams, GovernanceError>
    where
        F: FnOnce(&mut GovernanceParams) -> Result<(), GovernanceError>,
    {
        let mut guard = self
            .inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut next = guard.clone();
        f(&mut next)?;
        *guard = next.clone();
        Ok(next)
    }
}

impl Default for ParamsHandle {
    fn default() -> Self {
        Self::new(GovernanceParams::default())
    }
}

/// Parameters that an approved `parameter_change` proposal may modify.
///
/// The approval threshold is deliberately absent: it only changes through
/// the administrative threshold operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GovernableParam {
    VotingPeriodSecs,
    MinimumQuorumWeight,
    MinimumFee,
    MaxTitleLen,
    MaxDescriptionLen,
}

impl GovernableParam {
    /// Human-readable name of this parameter.
    pub fn name(&self) -> &'static str {
        match self {
            Self::VotingPeriodSecs => "voting_period_secs",
            Self::MinimumQuorumWeight => "minimum_quorum_weight",
            Self::MinimumFee => "minimum_fee",
            Self::MaxTitleLen => "max_title_len",
            Self::MaxDescriptionLen => "max_description_len",
        }
    }

    /// Write `value` into the matching field.
    pub fn apply(&self, params: &mut GovernanceParams, value: u64) -> Result<(), GovernanceError> {
        let as_len = || {
            usize::try_from(value)
                .map_err(|_| GovernanceError::InvalidRequest(format!("{value} too large")))
        };
        match self {
            Self::VotingPeriodSecs => {
                if value == 0 {
                    return Err(GovernanceError::InvalidRequest(
                        "voting period must be non-zero".into(),
                    ));
                }
                params.voting_period_secs = value;
            }
            Self::MinimumQuorumWeight => params.minimum_quorum_weight = value,
            Self::MinimumFee => params.minimum_fee = value,
            Self::MaxTitleLen => params.max_title_len = as_len()?,
            Self::MaxDescriptionLen => params.max_description_len = as_len()?,
        }
        Ok(())
    }
}

impl fmt::Display for GovernableParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GovernableParam {
    type Err = GovernanceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "voting_period_secs" => Ok(Self::VotingPeriodSecs),
            "minimum_quorum_weight" => Ok(Self::MinimumQuorumWeight),
            "minimum_fee" => Ok(Self::MinimumFee),
            "max_title_len" => Ok(Self::MaxTitleLen),
            "max_description_len" => Ok(Self::MaxDescriptionLen),
            other => Err(GovernanceError::InvalidRequest(format!(
                "unknown governable parameter {other:?}"
            ))),
        }
    }
}
