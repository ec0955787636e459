//! Per-proposal lock table.
//!
//! All mutating operations on one proposal serialize on that proposal's
//! lock; different proposals proceed in parallel. The table is sharded by the
//! first id byte so lookups on unrelated proposals rarely contend.

use agora_types::ProposalId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

const SHARDS: usize = 16;

type Shard = Mutex<HashMap<ProposalId, Arc<AsyncMutex<()>>>>;

pub struct ProposalLocks {
    shards: Vec<Shard>,
}

/// Proof that the holder owns a proposal's lock. Dropping it releases the lock.
pub struct ProposalGuard {
    proposal_id: ProposalId,
    _guard: OwnedMutexGuard<()>,
}

impl ProposalGuard {
    pub fn proposal_id(&self) -> ProposalId {
        self.proposal_id
    }
}

impl ProposalLocks {
    pub fn new() -> Self {
        Self {
            shards: (0..SHARDS).map(|_| Mutex::new(HashMap::new())).collect(),
        }
    }

    fn shard(&self, id: &ProposalId) -> &Shard {
        &self.shards[usize::from(id.as_bytes()[0]) % SHARDS]
    }

    fn entry(&self, id: ProposalId) -> Arc<AsyncMutex<()>> {
        let mut shard = self
            .shard(&id)
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        shard.entry(id).or_default().clone()
    }

    /// Wait for and take the lock for `id`.
    pub async fn acquire(&self, id: ProposalId) -> ProposalGuard {
        let lock = self.entry(id);
        ProposalGuard {
            proposal_id: id,
            _guard: lock.lock_owned().await,
        }
    }

    /// Take the lock for `id` only if nobody holds it.
    pub fn try_acquire(&self, id: ProposalId) -> Option<ProposalGuard> {
        let lock = self.entry(id);
        lock.try_lock_owned().ok().map(|guard| ProposalGuard {
            proposal_id: id,
            _guard: guard,
        })
    }

    /// Drop table entries nobody is holding or waiting on.
    pub fn prune(&self) -> usize {
        let mut removed = 0;
        for shard in &self.shards {
            let mut shard = shard.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let before = shard.len();
            shard.retain(|_, lock| Arc::strong_count(lock) > 1);
            removed += before - shard.len();
        }
        removed
    }

    /// Number of proposals with a table entry.
    pub fn len(&self) -> usize {
        self.shards
            .iter()
            .map(|s| s.lock().unwrap_or_else(|p| p.into_inner()).len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ProposalLocks {
    fn default() -> Self {
        Self::new()
    }
}
