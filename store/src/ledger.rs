//! Ledger gateway: durable records keyed by namespaced ids.
//!
//! Writes go through [`WriteBatch`]: a set of puts/deletes guarded by
//! preconditions on the current bytes of any key. A backend applies a batch
//! all-or-nothing, which gives callers both multi-record atomicity and
//! compare-and-set on a single record.

use crate::StoreError;
use std::fmt;

/// A namespaced record key, e.g. `proposal/<id>` or `vote/<id>/<voter>`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RecordKey(String);

impl RecordKey {
    /// Build a key from path segments joined with `/`.
    pub fn from_parts(parts: &[&str]) -> Self {
        Self(parts.join("/"))
    }

    /// Build a prefix matching every key under the given segments.
    pub fn prefix(parts: &[&str]) -> Self {
        let mut s = parts.join("/");
        s.push('/');
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn starts_with(&self, prefix: &RecordKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Condition that must hold for a batch to apply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Precondition {
    /// The key must not exist.
    Absent(RecordKey),
    /// The key must hold exactly these bytes.
    Equals(RecordKey, Vec<u8>),
}

impl Precondition {
    pub fn key(&self) -> &RecordKey {
        match self {
            Self::Absent(k) | Self::Equals(k, _) => k,
        }
    }

    /// Whether `current` (the stored bytes, if any) satisfies this condition.
    pub fn holds(&self, current: Option<&[u8]>) -> bool {
        match self {
            Self::Absent(_) => current.is_none(),
            Self::Equals(_, expected) => current == Some(expected.as_slice()),
        }
    }
}

/// A single mutation inside a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteOp {
    Put(RecordKey, Vec<u8>),
    Delete(RecordKey),
}

/// An atomic, conditional group of writes.
#[derive(Clone, Debug, Default)]
pub struct WriteBatch {
    pub preconditions: Vec<Precondition>,
    pub ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `key` to be absent when the batch applies.
    pub fn expect_absent(&mut self, key: RecordKey) -> &mut Self {
        self.preconditions.push(Precondition::Absent(key));
        self
    }

    /// Require `key` to hold `bytes` when the batch applies.
    pub fn expect(&mut self, key: RecordKey, bytes: Vec<u8>) -> &mut Self {
        self.preconditions.push(Precondition::Equals(key, bytes));
        self
    }

    /// Require `key` to hold `bytes`, or be absent when `bytes` is `None`.
    pub fn expect_current(&mut self, key: RecordKey, bytes: Option<Vec<u8>>) -> &mut Self {
        match bytes {
            Some(b) => self.expect(key, b),
            None => self.expect_absent(key),
        }
    }

    pub fn put(&mut self, key: RecordKey, value: Vec<u8>) -> &mut Self {
        self.ops.push(WriteOp::Put(key, value));
        self
    }

    pub fn delete(&mut self, key: RecordKey) -> &mut Self {
        self.ops.push(WriteOp::Delete(key));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Durable key-value store with atomic conditional batches.
pub trait LedgerGateway: Send + Sync {
    /// Fetch the latest committed bytes for a key.
    fn get(&self, key: &RecordKey) -> Result<Option<Vec<u8>>, StoreError>;

    /// All committed records whose key starts with `prefix`, in key order.
    fn scan_prefix(&self, prefix: &RecordKey) -> Result<Vec<(RecordKey, Vec<u8>)>, StoreError>;

    /// Apply every op in `batch` if and only if every precondition holds.
    ///
    /// Returns [`StoreError::Conflict`] naming the first failed key otherwise,
    /// in which case nothing is written.
    fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;

    /// Single-record compare-and-set.
    fn compare_and_swap(
        &self,
        key: &RecordKey,
        expected: Option<Vec<u8>>,
        new: Vec<u8>,
    ) -> Result<(), StoreError> {
        let mut batch = WriteBatch::new();
        batch
            .expect_current(key.clone(), expected)
            .put(key.clone(), new);
        self.commit(batch)
    }
}
