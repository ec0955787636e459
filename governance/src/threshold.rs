//! Versioned approval threshold.
//!
//! The threshold is read-mostly process-wide configuration. A tally captures a
//! [`ThresholdSnapshot`] when it enters `Tallying` and evaluates against that
//! copy, so later administrative updates never change an in-flight outcome.

use crate::error::GovernanceError;
use agora_types::{Amount, Timestamp};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};

/// Denominator for basis-point ratios (10000 = 100%).
pub const BPS_DENOMINATOR: u128 = 10_000;

/// One version of the approval threshold.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdSnapshot {
    /// Minimum Yes / (Yes + No) ratio in basis points.
    pub bps: u32,
    /// Incremented on every update, starting at 1.
    pub version: u64,
    pub set_at: Timestamp,
}

impl ThresholdSnapshot {
    /// Whether `yes / (yes + no) >= bps / 10000`.
    ///
    /// With no Yes or No weight at all the ratio is undefined and the
    /// threshold is not met.
    pub fn is_met(&self, yes: Amount, no: Amount) -> bool {
        let (mut yes, mut no) = (yes.raw(), no.raw());
        if yes == 0 && no == 0 {
            return false;
        }
        // Scale both sides down until the cross-multiplication fits in u128.
        while yes
            .checked_add(no)
            .and_then(|t| t.checked_mul(BPS_DENOMINATOR))
            .is_none()
        {
            yes >>= 1;
            no >>= 1;
        }
        let total = yes + no;
        yes * BPS_DENOMINATOR >= u128::from(self.bps) * total
    }
}

/// Holder of the current threshold.
pub struct ThresholdRegistry {
    current: RwLock<Arc<ThresholdSnapshot>>,
}

impl ThresholdRegistry {
    pub fn new(bps: u32, now: Timestamp) -> Result<Self, GovernanceError> {
        validate(bps)?;
        Ok(Self {
            current: RwLock::new(Arc::new(ThresholdSnapshot {
                bps,
                version: 1,
                set_at: now,
            })),
        })
    }

    /// The active threshold.
    pub fn snapshot(&self) -> ThresholdSnapshot {
        let guard = self
            .current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        **guard
    }

    /// Replace the threshold, returning the new version.
    pub fn set(&self, bps: u32, now: Timestamp) -> Result<ThresholdSnapshot, GovernanceError> {
        validate(bps)?;
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let next = ThresholdSnapshot {
            bps,
            version: guard.version + 1,
            set_at: now,
        };
        *guard = Arc::new(next);
        tracing::info!(bps, version = next.version, "delegation threshold updated");
        Ok(next)
    }
}

fn validate(bps: u32) -> Result<(), GovernanceError> {
    if u128::from(bps) > BPS_DENOMINATOR {
        return Err(GovernanceError::InvalidThreshold(bps));
    }
    Ok(())
}
