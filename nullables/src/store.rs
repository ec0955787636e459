//! Nullable stores: thread-safe in-memory ledger and balances.

use agora_store::{AccountStore, LedgerGateway, RecordKey, StoreError, WriteBatch, WriteOp};
use agora_types::{Amount, Identity};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

/// An in-memory ledger gateway.
///
/// Batches are applied under a single mutex, so every commit is atomic with
/// respect to every other commit and read.
pub struct NullLedger {
    records: Mutex<BTreeMap<RecordKey, Vec<u8>>>,
    /// Commits to let through before failing, and the error to fail with.
    fail_commit: Mutex<Option<(u64, StoreError)>>,
    commits: Mutex<u64>,
}

impl NullLedger {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(BTreeMap::new()),
            fail_commit: Mutex::new(None),
            commits: Mutex::new(0),
        }
    }

    /// Make the next `commit` fail with `err` without writing anything.
    pub fn fail_next_commit(&self, err: StoreError) {
        self.fail_commit_after(0, err);
    }

    /// Let `successes` more commits through, then fail the one after with `err`.
    pub fn fail_commit_after(&self, successes: u64, err: StoreError) {
        *self.fail_commit.lock().unwrap() = Some((successes, err));
    }

    /// Number of successful commits so far.
    pub fn commit_count(&self) -> u64 {
        *self.commits.lock().unwrap()
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for NullLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl LedgerGateway for NullLedger {
    fn get(&self, key: &RecordKey) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.records.lock().unwrap().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &RecordKey) -> Result<Vec<(RecordKey, Vec<u8>)>, StoreError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let mut records = self.records.lock().unwrap();
        {
            let mut pending = self.fail_commit.lock().unwrap();
            match pending.as_mut() {
                Some((0, _)) => {
                    if let Some((_, err)) = pending.take() {
                        return Err(err);
                    }
                }
                Some((remaining, _)) => *remaining -= 1,
                None => {}
            }
        }
        for pre in &batch.preconditions {
            let current = records.get(pre.key()).map(Vec::as_slice);
            if !pre.holds(current) {
                return Err(StoreError::Conflict(pre.key().to_string()));
            }
        }
        for op in batch.ops {
            match op {
                WriteOp::Put(key, value) => {
                    records.insert(key, value);
                }
                WriteOp::Delete(key) => {
                    records.remove(&key);
                }
            }
        }
        *self.commits.lock().unwrap() += 1;
        Ok(())
    }
}

/// In-memory balances with optional injected failures.
pub struct NullAccounts {
    balances: Mutex<HashMap<Identity, Amount>>,
    fail_next_debit: Mutex<Option<StoreError>>,
    fail_next_credit: Mutex<Option<StoreError>>,
}

impl NullAccounts {
    pub fn new() -> Self {
        Self {
            balances: Mutex::new(HashMap::new()),
            fail_next_debit: Mutex::new(None),
            fail_next_credit: Mutex::new(None),
        }
    }

    /// Create with the given starting balances.
    pub fn with_balances<I>(balances: I) -> Self
    where
        I: IntoIterator<Item = (Identity, Amount)>,
    {
        let accounts = Self::new();
        accounts.balances.lock().unwrap().extend(balances);
        accounts
    }

    pub fn set_balance(&self, account: &Identity, amount: Amount) {
        self.balances
            .lock()
            .unwrap()
            .insert(account.clone(), amount);
    }

    /// Sum of every account's available balance.
    pub fn total(&self) -> Amount {
        self.balances.lock().unwrap().values().copied().sum()
    }

    pub fn fail_next_debit(&self, err: StoreError) {
        *self.fail_next_debit.lock().unwrap() = Some(err);
    }

    pub fn fail_next_credit(&self, err: StoreError) {
        *self.fail_next_credit.lock().unwrap() = Some(err);
    }
}

impl Default for NullAccounts {
    fn default() -> Self {
        Self::new()
    }
}

impl AccountStore for NullAccounts {
    fn balance(&self, account: &Identity) -> Result<Amount, StoreError> {
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(account)
            .copied()
            .unwrap_or(Amount::ZERO))
    }

    fn debit(&self, account: &Identity, amount: Amount) -> Result<(), StoreError> {
        if let Some(err) = self.fail_next_debit.lock().unwrap().take() {
            return Err(err);
        }
        let mut balances = self.balances.lock().unwrap();
        let available = balances.get(account).copied().unwrap_or(Amount::ZERO);
        let remaining =
            available
                .checked_sub(amount)
                .ok_or_else(|| StoreError::InsufficientBalance {
                    account: account.to_string(),
                    needed: amount,
                    available,
                })?;
        balances.insert(account.clone(), remaining);
        Ok(())
    }

    fn credit(&self, account: &Identity, amount: Amount) -> Result<(), StoreError> {
        if let Some(err) = self.fail_next_credit.lock().unwrap().take() {
            return Err(err);
        }
        let mut balances = self.balances.lock().unwrap();
        let entry = balances.entry(account.clone()).or_insert(Amount::ZERO);
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| StoreError::Backend(format!("balance overflow for {account}")))?;
        Ok(())
    }
}
