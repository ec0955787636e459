//! Escrow manager: locks stake against a proposal, then releases or forfeits it.
//!
//! Each escrow is keyed by `(proposal, holder, purpose)`. Funds move between
//! the holder's available balance (the [`AccountStore`]) and the escrow row:
//!
//! - `lock`: debit balance, create a `Locked` row
//! - `adjust`: debit or credit the difference for a re-vote with new stake
//! - `release`: credit balance, row becomes `Released`
//! - `forfeit`: row becomes `Forfeited`, nothing is credited
//!
//! Settled rows never change again; repeating the same settlement is a no-op.
//! Every balance movement is compensated if the matching row write fails,
//! so a failed call leaves both sides untouched.

use crate::error::GovernanceError;
use crate::ledger::{escrow_key, GovernanceLedger, Stored};
use crate::locks::ProposalGuard;
use agora_store::{AccountStore, WriteBatch};
use agora_types::{Amount, Clock, Identity, ProposalId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// What the escrowed stake backs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowPurpose {
    /// The fee paid to submit a proposal.
    ProposerFee,
    /// Stake behind a vote.
    VoteStake,
}

impl EscrowPurpose {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProposerFee => "fee",
            Self::VoteStake => "stake",
        }
    }
}

impl fmt::Display for EscrowPurpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EscrowState {
    Locked,
    Released,
    Forfeited,
}

impl fmt::Display for EscrowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Locked => "locked",
            Self::Released => "released",
            Self::Forfeited => "forfeited",
        })
    }
}

/// Stake held against a proposal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Escrow {
    pub proposal_id: ProposalId,
    pub holder: Identity,
    pub purpose: EscrowPurpose,
    pub amount: Amount,
    pub state: EscrowState,
    pub locked_at: Timestamp,
    pub settled_at: Option<Timestamp>,
}

/// Record of a `lock` or `adjust`, sufficient to undo it.
#[derive(Clone, Debug)]
pub struct EscrowChange {
    previous: Option<Stored<Escrow>>,
    current: Stored<Escrow>,
}

impl EscrowChange {
    pub fn escrow(&self) -> &Escrow {
        &self.current.value
    }

    pub fn previous(&self) -> Option<&Escrow> {
        self.previous.as_ref().map(|s| &s.value)
    }
}

#[derive(Clone)]
pub struct EscrowManager {
    ledger: GovernanceLedger,
    accounts: Arc<dyn AccountStore>,
    clock: Arc<dyn Clock>,
}

impl EscrowManager {
    pub fn new(
        ledger: GovernanceLedger,
        accounts: Arc<dyn AccountStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            ledger,
            accounts,
            clock,
        }
    }

    pub fn get(
        &self,
        id: &ProposalId,
        holder: &Identity,
        purpose: EscrowPurpose,
    ) -> Result<Option<Escrow>, GovernanceError> {
        Ok(self.ledger.load_escrow(id, holder, purpose)?.map(|s| s.value))
    }

    pub fn list_for_proposal(&self, id: &ProposalId) -> Result<Vec<Escrow>, GovernanceError> {
        self.ledger.list_escrows(id)
    }

    /// Debit `amount` from `holder` and hold it against the guarded proposal.
    ///
    /// Fails with `AlreadyLocked` if any escrow already exists for the key.
    pub fn lock(
        &self,
        guard: &ProposalGuard,
        holder: &Identity,
        purpose: EscrowPurpose,
        amount: Amount,
    ) -> Result<EscrowChange, GovernanceError> {
        let id = guard.proposal_id();
        if self.ledger.load_escrow(&id, holder, purpose)?.is_some() {
            return Err(GovernanceError::AlreadyLocked {
                holder: holder.to_string(),
                purpose,
            });
        }
        let escrow = Escrow {
            proposal_id: id,
            holder: holder.clone(),
            purpose,
            amount,
            state: EscrowState::Locked,
            locked_at: self.clock.now(),
            settled_at: None,
        };
        if !amount.is_zero() {
            self.accounts.debit(holder, amount)?;
        }
        let written = self.write(None, &escrow).inspect_err(|_| {
            self.compensate_credit(holder, amount);
        })?;
        tracing::debug!(proposal = %id, holder = %holder, %purpose, %amount, "escrow locked");
        Ok(EscrowChange {
            previous: None,
            current: written,
        })
    }

    /// Change the amount of an existing `Locked` escrow, moving only the difference.
    pub fn adjust(
        &self,
        guard: &ProposalGuard,
        holder: &Identity,
        purpose: EscrowPurpose,
        amount: Amount,
    ) -> Result<EscrowChange, GovernanceError> {
        let id = guard.proposal_id();
        let current = self
            .ledger
            .load_escrow(&id, holder, purpose)?
            .ok_or_else(|| GovernanceError::NotFound(format!("{purpose} escrow for {holder}")))?;
        if current.value.state != EscrowState::Locked {
            return Err(GovernanceError::EscrowSettled(current.value.state));
        }
        let old = current.value.amount;
        if old == amount {
            return Ok(EscrowChange {
                previous: Some(current.clone()),
                current,
            });
        }
        let mut next = current.value.clone();
        next.amount = amount;
        if amount > old {
            let extra = amount - old;
            self.accounts.debit(holder, extra)?;
            let written = self
                .write(Some(&current), &next)
                .inspect_err(|_| self.compensate_credit(holder, extra))?;
            return Ok(EscrowChange {
                previous: Some(current),
                current: written,
            });
        }
        // Shrinking: write first so a failed write never releases funds.
        let refund = old - amount;
        let written = self.write(Some(&current), &next)?;
        if let Err(e) = self.accounts.credit(holder, refund) {
            self.restore(&written, Some(&current))?;
            return Err(e.into());
        }
        tracing::debug!(proposal = %id, holder = %holder, %old, new = %amount, "escrow adjusted");
        Ok(EscrowChange {
            previous: Some(current),
            current: written,
        })
    }

    /// Reverse a `lock` or `adjust` whose enclosing operation failed.
    pub fn undo(&self, guard: &ProposalGuard, change: EscrowChange) -> Result<(), GovernanceError> {
        debug_assert_eq!(change.current.value.proposal_id, guard.proposal_id());
        let holder = &change.current.value.holder;
        let now_amount = change.current.value.amount;
        let before_amount = change
            .previous
            .as_ref()
            .map(|s| s.value.amount)
            .unwrap_or(Amount::ZERO);
        if change.previous.as_ref().map(|p| &p.raw) == Some(&change.current.raw) {
            return Ok(());
        }
        self.restore(&change.current, change.previous.as_ref())?;
        if now_amount > before_amount {
            self.accounts.credit(holder, now_amount - before_amount)?;
        } else if before_amount > now_amount {
            self.accounts.debit(holder, before_amount - now_amount)?;
        }
        tracing::debug!(proposal = %guard.proposal_id(), holder = %holder, "escrow change undone");
        Ok(())
    }

    /// Return the escrowed amount to the holder.
    ///
    /// Only valid once the proposal has settled (Approved, Rejected, Executed
    /// or Reverted). Releasing an already released escrow succeeds without
    /// effect.
    pub fn release(
        &self,
        guard: &ProposalGuard,
        holder: &Identity,
        purpose: EscrowPurpose,
    ) -> Result<Escrow, GovernanceError> {
        self.settle(guard, holder, purpose, EscrowState::Released)
    }

    /// Keep the escrowed amount; the holder does not get it back.
    ///
    /// Same preconditions and idempotence as [`release`](Self::release).
    pub fn forfeit(
        &self,
        guard: &ProposalGuard,
        holder: &Identity,
        purpose: EscrowPurpose,
    ) -> Result<Escrow, GovernanceError> {
        self.settle(guard, holder, purpose, EscrowState::Forfeited)
    }

    fn settle(
        &self,
        guard: &ProposalGuard,
        holder: &Identity,
        purpose: EscrowPurpose,
        target: EscrowState,
    ) -> Result<Escrow, GovernanceError> {
        let id = guard.proposal_id();
        let status = self.ledger.load_proposal(&id)?.value.status;
        if !status.settles_escrow() {
            return Err(GovernanceError::EscrowActive(status));
        }
        let current = self
            .ledger
            .load_escrow(&id, holder, purpose)?
            .ok_or_else(|| GovernanceError::NotFound(format!("{purpose} escrow for {holder}")))?;
        match current.value.state {
            state if state == target => return Ok(current.value),
            EscrowState::Locked => {}
            settled => return Err(GovernanceError::EscrowSettled(settled)),
        }
        let mut next = current.value.clone();
        next.state = target;
        next.settled_at = Some(self.clock.now());
        let amount = next.amount;

        if target == EscrowState::Released && !amount.is_zero() {
            self.accounts.credit(holder, amount)?;
            if let Err(e) = self.write(Some(&current), &next) {
                self.compensate_debit(holder, amount);
                return Err(e);
            }
        } else {
            self.write(Some(&current), &next)?;
        }
        tracing::info!(proposal = %id, holder = %holder, %purpose, %amount, state = %target, "escrow settled");
        Ok(next)
    }

    fn write(&self, current: Option<&Stored<Escrow>>, next: &Escrow) -> Result<Stored<Escrow>, GovernanceError> {
        let mut batch = WriteBatch::new();
        let raw = GovernanceLedger::stage_update(
            &mut batch,
            escrow_key(&next.proposal_id, &next.holder, next.purpose),
            current,
            next,
        )?;
        self.ledger.commit(batch)?;
        Ok(Stored {
            value: next.clone(),
            raw,
        })
    }

    /// Put back `previous` (or delete the row) where `written` is stored now.
    fn restore(&self, written: &Stored<Escrow>, previous: Option<&Stored<Escrow>>) -> Result<(), GovernanceError> {
        let e = &written.value;
        let key = escrow_key(&e.proposal_id, &e.holder, e.purpose);
        let mut batch = WriteBatch::new();
        batch.expect(key.clone(), written.raw.clone());
        match previous {
            Some(prev) => batch.put(key, prev.raw.clone()),
            None => batch.delete(key),
        };
        self.ledger.commit(batch)
    }

    fn compensate_credit(&self, holder: &Identity, amount: Amount) {
        if amount.is_zero() {
            return;
        }
        if let Err(e) = self.accounts.credit(holder, amount) {
            tracing::error!(holder = %holder, %amount, error = %e, "failed to refund escrow debit");
        }
    }

    fn compensate_debit(&self, holder: &Identity, amount: Amount) {
        if let Err(e) = self.accounts.debit(holder, amount) {
            tracing::error!(holder = %holder, %amount, error = %e, "failed to reclaim escrow credit");
        }
    }
}
